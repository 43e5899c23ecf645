//! Permission evaluator capability surface (§6, §4.9).
//!
//! Compound actions are not decomposed here as a single generic table --
//! §4.9 decomposes each compound action into constituent checks performed
//! independently, and the order/short-circuiting differs by call site
//! (e.g. §4.6's createOrRead only checks READ *or* CREATE depending on
//! whether the record already exists, while §4.7 always checks CREATE
//! then UPDATE). Each call site in `hot_path.rs`/`handler.rs` composes its
//! own sequence of [`evaluate`] calls; this module only owns the trait and
//! the outcome mapping shared by all of them.

use async_trait::async_trait;
use topgun_core::{Action, CacheRecord, SenderContext};

use super::error::PermissionError;

/// §6: `canPerformAction(user, msg, cb(err, allowed), authData, sender)`.
///
/// `record` is the record's current value, gated behind the Stability
/// Gate by the caller (§4.3/§4.4: a permission-evaluator read must not
/// observe a record mid-write) -- `None` when the record does not exist.
/// An evaluator that only inspects `sender`/`action` can ignore it.
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn can_perform_action(
        &self,
        action: Action,
        name: &str,
        record: Option<&CacheRecord>,
        sender: &SenderContext,
    ) -> Result<bool, String>;
}

/// Runs one constituent check and maps it onto [`PermissionError`], the
/// type every call site branches on (`Ok(())` means proceed).
///
/// Per §4.9: "On denial, emit `MESSAGE_DENIED`... On evaluator error, log
/// and emit `MESSAGE_PERMISSION_ERROR`." Emitting the actual outbound
/// message is the caller's job, since only the caller knows which
/// `originalAction`/`correlationId` to attach.
pub async fn evaluate(
    evaluator: &dyn PermissionEvaluator,
    action: Action,
    name: &str,
    record: Option<&CacheRecord>,
    sender: &SenderContext,
) -> Result<(), PermissionError> {
    match evaluator.can_perform_action(action, name, record, sender).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(PermissionError::Denied),
        Err(reason) => Err(PermissionError::EvaluatorFailed(reason)),
    }
}

/// Permission evaluator that allows everything; the default for tests and
/// for deployments that perform authorization entirely upstream.
#[derive(Default)]
pub struct AllowAllEvaluator;

#[async_trait]
impl PermissionEvaluator for AllowAllEvaluator {
    async fn can_perform_action(
        &self,
        _action: Action,
        _name: &str,
        _record: Option<&CacheRecord>,
        _sender: &SenderContext,
    ) -> Result<bool, String> {
        Ok(true)
    }
}

/// Permission evaluator that denies everything, useful for exercising the
/// `MESSAGE_DENIED` path in tests.
#[derive(Default)]
pub struct DenyAllEvaluator;

#[async_trait]
impl PermissionEvaluator for DenyAllEvaluator {
    async fn can_perform_action(
        &self,
        _action: Action,
        _name: &str,
        _record: Option<&CacheRecord>,
        _sender: &SenderContext,
    ) -> Result<bool, String> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_evaluator_permits_every_action() {
        let sender = SenderContext::default();
        let result = evaluate(&AllowAllEvaluator, Action::Create, "a/1", None, &sender).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn deny_all_evaluator_reports_denied() {
        let sender = SenderContext::default();
        let result = evaluate(&DenyAllEvaluator, Action::Update, "a/1", None, &sender).await;
        assert!(matches!(result, Err(PermissionError::Denied)));
    }

    struct FailingEvaluator;

    #[async_trait]
    impl PermissionEvaluator for FailingEvaluator {
        async fn can_perform_action(
            &self,
            _action: Action,
            _name: &str,
            _record: Option<&CacheRecord>,
            _sender: &SenderContext,
        ) -> Result<bool, String> {
            Err("backend unreachable".to_string())
        }
    }

    #[tokio::test]
    async fn evaluator_error_is_distinguished_from_denial() {
        let sender = SenderContext::default();
        let result = evaluate(&FailingEvaluator, Action::Read, "a/1", None, &sender).await;
        assert!(matches!(result, Err(PermissionError::EvaluatorFailed(_))));
    }
}
