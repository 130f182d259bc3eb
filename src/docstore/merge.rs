//! How bulk actions compose with the stored document.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::query::compare_values;
use super::{BulkAction, BulkFailure, FailureKind};

const LAST_MODIFIED: &str = "last_modified";

/// Compute the document an action would store on top of `existing`.
///
/// `Ok(None)` means the action changes nothing and must not be written.
pub fn apply_action(existing: Option<&Value>, action: &BulkAction) -> Result<Option<Value>, BulkFailure> {
    match action {
        BulkAction::Index { document, .. } => Ok(Some(document.clone())),
        BulkAction::Merge {
            document, preserve, ..
        } => match existing {
            None => Ok(Some(document.clone())),
            Some(stored) => Ok(merge_documents(stored, document, preserve)),
        },
        BulkAction::Update { index, id, partial } => match existing {
            None => Err(BulkFailure {
                kind: FailureKind::NotFound,
                reason: format!("document {}/{} does not exist", index.as_str(), id),
            }),
            Some(stored) => {
                let mut updated = stored.clone();
                deep_merge(&mut updated, partial);
                Ok((updated != *stored).then_some(updated))
            }
        },
    }
}

/// Merge a re-observed entity into its stored version.
///
/// Incoming non-null fields overwrite stored ones, except the `preserve`
/// keys which keep their stored value when one exists. When nothing but
/// `last_modified` would change the merge is a no-op, which keeps the
/// stored `last_modified` and with it every stage's staleness verdict.
pub fn merge_documents(stored: &Value, incoming: &Value, preserve: &[String]) -> Option<Value> {
    let (Some(stored_map), Some(incoming_map)) = (stored.as_object(), incoming.as_object()) else {
        return (stored != incoming).then(|| incoming.clone());
    };

    let mut merged: Map<String, Value> = stored_map.clone();
    for (key, value) in incoming_map {
        if key == LAST_MODIFIED || value.is_null() {
            continue;
        }
        let keep_stored = preserve.iter().any(|p| p == key)
            && stored_map.get(key).is_some_and(|v| !v.is_null());
        if !keep_stored {
            merged.insert(key.clone(), value.clone());
        }
    }

    if merged == *stored_map {
        return None;
    }

    let last_modified = match (stored_map.get(LAST_MODIFIED), incoming_map.get(LAST_MODIFIED)) {
        (Some(old), Some(new)) => match compare_values(old, new) {
            Some(Ordering::Greater) => old.clone(),
            _ => new.clone(),
        },
        (None, Some(new)) => new.clone(),
        (Some(old), None) => old.clone(),
        (None, None) => Value::Null,
    };
    if !last_modified.is_null() {
        merged.insert(LAST_MODIFIED.to_string(), last_modified);
    }
    Some(Value::Object(merged))
}

/// Recursively merge `partial` into `target`. Objects merge key by key,
/// anything else replaces.
pub fn deep_merge(target: &mut Value, partial: &Value) {
    match (target, partial) {
        (Value::Object(target_map), Value::Object(partial_map)) => {
            for (key, value) in partial_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, partial) => *target = partial.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::Index;
    use serde_json::json;

    #[test]
    fn identical_reobservation_is_noop() {
        let stored = json!({"id": "a", "url": "u", "last_modified": "2024-01-01T00:00:00Z",
            "url_query_parser": {"should_parse": false, "last_parsed": "2024-01-02T00:00:00Z"}});
        let incoming = json!({"id": "a", "url": "u", "last_modified": "2024-06-01T00:00:00Z",
            "url_query_parser": {"should_parse": true, "last_parsed": null}});
        let preserve = vec!["url_query_parser".to_string()];
        assert_eq!(merge_documents(&stored, &incoming, &preserve), None);
    }

    #[test]
    fn changed_field_advances_last_modified_and_keeps_status() {
        let stored = json!({"id": "a", "digest": "old", "last_modified": "2024-01-01T00:00:00Z",
            "url_query_parser": {"should_parse": false, "last_parsed": "2024-01-02T00:00:00Z"}});
        let incoming = json!({"id": "a", "digest": "new", "last_modified": "2024-06-01T00:00:00Z",
            "url_query_parser": {"should_parse": true, "last_parsed": null}});
        let preserve = vec!["url_query_parser".to_string()];
        let merged = merge_documents(&stored, &incoming, &preserve).unwrap();
        assert_eq!(merged["digest"], "new");
        assert_eq!(merged["last_modified"], "2024-06-01T00:00:00Z");
        assert_eq!(merged["url_query_parser"]["should_parse"], false);
    }

    #[test]
    fn last_modified_never_moves_backwards() {
        let stored = json!({"x": 1, "last_modified": "2024-06-01T00:00:00Z"});
        let incoming = json!({"x": 2, "last_modified": "2024-01-01T00:00:00Z"});
        let merged = merge_documents(&stored, &incoming, &[]).unwrap();
        assert_eq!(merged["last_modified"], "2024-06-01T00:00:00Z");
    }

    #[test]
    fn null_does_not_erase_derived_fields() {
        let stored = json!({"url_page": 3, "last_modified": "2024-01-01T00:00:00Z"});
        let incoming = json!({"url_page": null, "last_modified": "2024-02-01T00:00:00Z"});
        assert_eq!(merge_documents(&stored, &incoming, &[]), None);
    }

    #[test]
    fn deep_merge_nests() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": 1});
        deep_merge(&mut target, &json!({"a": {"c": 3}, "e": null}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 3}, "d": 1, "e": null}));
    }

    #[test]
    fn update_requires_existing_document() {
        let action = BulkAction::Update {
            index: Index::Serps,
            id: "missing".into(),
            partial: json!({"x": 1}),
        };
        let err = apply_action(None, &action).unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);
    }

    #[test]
    fn unchanged_update_is_noop() {
        let stored = json!({"x": 1});
        let action = BulkAction::Update {
            index: Index::Serps,
            id: "a".into(),
            partial: json!({"x": 1}),
        };
        assert_eq!(apply_action(Some(&stored), &action).unwrap(), None);
    }
}
