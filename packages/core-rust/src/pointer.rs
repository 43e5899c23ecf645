//! Dot/bracket path grammar for record patches and erases.
//!
//! §6A: segments are separated by `.`; array indices are written
//! `[n]` and may immediately follow a key or another index
//! (`a.b[2].c`, `items[0][1]`). An empty path addresses the whole
//! record value.

use serde_json::Value;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PointerError {
    #[error("empty path segment in {path:?}")]
    EmptySegment { path: String },
    #[error("unterminated index in {path:?}")]
    UnterminatedIndex { path: String },
    #[error("invalid index {text:?} in {path:?}")]
    InvalidIndex { path: String, text: String },
    #[error("cannot descend into a {kind} at {path:?}")]
    NotIndexable { path: String, kind: &'static str },
}

fn parse(path: &str) -> Result<Vec<Segment>, PointerError> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, segments: &mut Vec<Segment>| -> Result<(), PointerError> {
        if !current.is_empty() {
            segments.push(Segment::Key(std::mem::take(current)));
        }
        Ok(())
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                flush(&mut current, &mut segments)?;
            }
            '[' => {
                flush(&mut current, &mut segments)?;
                let mut index_text = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => index_text.push(d),
                        None => {
                            return Err(PointerError::UnterminatedIndex {
                                path: path.to_string(),
                            })
                        }
                    }
                }
                let index: usize = index_text.parse().map_err(|_| PointerError::InvalidIndex {
                    path: path.to_string(),
                    text: index_text,
                })?;
                segments.push(Segment::Index(index));
            }
            other => current.push(other),
        }
    }
    flush(&mut current, &mut segments)?;

    if segments.iter().any(|s| matches!(s, Segment::Key(k) if k.is_empty())) {
        return Err(PointerError::EmptySegment {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

/// Applies a patch at `path`, creating intermediate objects/array slots
/// as needed, and setting the final segment to `value`.
///
/// An empty path replaces the whole record value.
pub fn apply_patch(root: &mut Value, path: &str, value: Value) -> Result<(), PointerError> {
    let segments = parse(path)?;
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }
    let target = descend_create(root, &segments[..segments.len() - 1], path)?;
    set_segment(target, segments.last().unwrap(), value, path)
}

/// Removes the subtree addressed by `path`. A missing path is a no-op
/// (there is nothing to erase).
pub fn apply_erase(root: &mut Value, path: &str) -> Result<(), PointerError> {
    let segments = parse(path)?;
    if segments.is_empty() {
        *root = Value::Null;
        return Ok(());
    }
    let Some(target) = descend_existing(root, &segments[..segments.len() - 1]) else {
        return Ok(());
    };
    match (target, segments.last().unwrap()) {
        (Value::Object(map), Segment::Key(k)) => {
            map.remove(k);
        }
        (Value::Array(arr), Segment::Index(i)) => {
            if *i < arr.len() {
                arr.remove(*i);
            }
        }
        _ => {}
    }
    Ok(())
}

fn descend_create<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    path: &str,
) -> Result<&'a mut Value, PointerError> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            Segment::Key(key) => {
                if !current.is_object() {
                    if current.is_null() {
                        *current = Value::Object(serde_json::Map::new());
                    } else {
                        return Err(PointerError::NotIndexable {
                            path: path.to_string(),
                            kind: value_kind(current),
                        });
                    }
                }
                current
                    .as_object_mut()
                    .expect("just ensured object")
                    .entry(key.clone())
                    .or_insert(Value::Null)
            }
            Segment::Index(index) => {
                if !current.is_array() {
                    if current.is_null() {
                        *current = Value::Array(Vec::new());
                    } else {
                        return Err(PointerError::NotIndexable {
                            path: path.to_string(),
                            kind: value_kind(current),
                        });
                    }
                }
                let arr = current.as_array_mut().expect("just ensured array");
                if arr.len() <= *index {
                    arr.resize(index + 1, Value::Null);
                }
                &mut arr[*index]
            }
        };
    }
    Ok(current)
}

fn descend_existing<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get_mut(key)?,
            (Value::Array(arr), Segment::Index(index)) => arr.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_segment(
    target: &mut Value,
    segment: &Segment,
    value: Value,
    path: &str,
) -> Result<(), PointerError> {
    match segment {
        Segment::Key(key) => {
            if !target.is_object() {
                if target.is_null() {
                    *target = Value::Object(serde_json::Map::new());
                } else {
                    return Err(PointerError::NotIndexable {
                        path: path.to_string(),
                        kind: value_kind(target),
                    });
                }
            }
            target
                .as_object_mut()
                .expect("just ensured object")
                .insert(key.clone(), value);
        }
        Segment::Index(index) => {
            if !target.is_array() {
                if target.is_null() {
                    *target = Value::Array(Vec::new());
                } else {
                    return Err(PointerError::NotIndexable {
                        path: path.to_string(),
                        kind: value_kind(target),
                    });
                }
            }
            let arr = target.as_array_mut().expect("just ensured array");
            if arr.len() <= *index {
                arr.resize(*index + 1, Value::Null);
            }
            arr[*index] = value;
        }
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_top_level_key_on_empty_object() {
        let mut root = json!({});
        apply_patch(&mut root, "y", json!(2)).unwrap();
        assert_eq!(root, json!({"y": 2}));
    }

    #[test]
    fn patch_nested_path_creates_intermediate_objects() {
        let mut root = json!({});
        apply_patch(&mut root, "a.b.c", json!("v")).unwrap();
        assert_eq!(root, json!({"a": {"b": {"c": "v"}}}));
    }

    #[test]
    fn patch_array_index_creates_array() {
        let mut root = json!({});
        apply_patch(&mut root, "items[2]", json!("x")).unwrap();
        assert_eq!(root, json!({"items": [null, null, "x"]}));
    }

    #[test]
    fn patch_empty_path_replaces_whole_value() {
        let mut root = json!({"old": true});
        apply_patch(&mut root, "", json!({"new": 1})).unwrap();
        assert_eq!(root, json!({"new": 1}));
    }

    #[test]
    fn erase_removes_object_key() {
        let mut root = json!({"x": 1, "y": 2});
        apply_erase(&mut root, "y").unwrap();
        assert_eq!(root, json!({"x": 1}));
    }

    #[test]
    fn erase_removes_array_index_and_shifts() {
        let mut root = json!({"items": [1, 2, 3]});
        apply_erase(&mut root, "items[1]").unwrap();
        assert_eq!(root, json!({"items": [1, 3]}));
    }

    #[test]
    fn erase_missing_path_is_noop() {
        let mut root = json!({"x": 1});
        apply_erase(&mut root, "missing.deep").unwrap();
        assert_eq!(root, json!({"x": 1}));
    }

    #[test]
    fn erase_empty_path_nulls_whole_value() {
        let mut root = json!({"x": 1});
        apply_erase(&mut root, "").unwrap();
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn patch_through_scalar_is_an_error() {
        let mut root = json!({"x": 1});
        let err = apply_patch(&mut root, "x.y", json!(1)).unwrap_err();
        assert!(matches!(err, PointerError::NotIndexable { .. }));
    }

    #[test]
    fn unterminated_index_is_rejected() {
        assert!(matches!(
            parse("items[0"),
            Err(PointerError::UnterminatedIndex { .. })
        ));
    }
}
