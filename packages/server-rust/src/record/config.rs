//! Configuration for the record-handling core.

/// Server-level configuration for record dispatch, hot-path bypass, and
/// durable-storage exclusion.
///
/// Follows the same plain-struct-with-`Default` convention as the rest of
/// this workspace's server configuration types.
#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Node identifier, carried into tracing spans and remote-origin checks.
    pub node_id: String,
    /// Name prefixes that activate the hot-path write bypass (§4.7).
    ///
    /// §9A resolves the source's substring-vs-prefix ambiguity in favor of
    /// a prefix match (`str::starts_with`).
    pub storage_hot_path_prefixes: Vec<String>,
    /// Name prefixes that suppress durable-storage writes (§4.1 Storage
    /// Facade, invariant 8 in §8).
    pub storage_exclusion_prefixes: Vec<String>,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            storage_hot_path_prefixes: Vec::new(),
            storage_exclusion_prefixes: Vec::new(),
        }
    }
}

impl RecordConfig {
    /// Whether `name` matches any configured hot-path prefix.
    #[must_use]
    pub fn is_hot_path(&self, name: &str) -> bool {
        self.storage_hot_path_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Whether durable-storage writes are suppressed for `name`.
    #[must_use]
    pub fn is_storage_excluded(&self, name: &str) -> bool {
        self.storage_exclusion_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_path_prefix_match() {
        let config = RecordConfig {
            storage_hot_path_prefixes: vec!["hot/".to_string()],
            ..RecordConfig::default()
        };
        assert!(config.is_hot_path("hot/x"));
        assert!(!config.is_hot_path("nothot/x"));
        assert!(!config.is_hot_path("x/hot/"), "must be a prefix match, not substring");
    }

    #[test]
    fn exclusion_prefix_match() {
        let config = RecordConfig {
            storage_exclusion_prefixes: vec!["ephemeral/".to_string()],
            ..RecordConfig::default()
        };
        assert!(config.is_storage_excluded("ephemeral/session-1"));
        assert!(!config.is_storage_excluded("durable/record-1"));
    }

    #[test]
    fn default_has_no_prefixes() {
        let config = RecordConfig::default();
        assert!(!config.is_hot_path("anything"));
        assert!(!config.is_storage_excluded("anything"));
    }
}
