//! Filter expressions evaluated against JSON documents.
//!
//! Fields are addressed with dotted paths (`archive.priority`). Timestamp
//! comparisons parse RFC 3339 strings, so `IsBefore` works on any two
//! stored timestamps of the same document.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Field equals value (any element when the field is an array).
    Term { field: String, value: Value },
    /// Field is present and not null.
    Exists { field: String },
    Range {
        field: String,
        gte: Option<Value>,
        lt: Option<Value>,
    },
    /// `field` is strictly earlier than `other`; false if either is missing.
    IsBefore { field: String, other: String },
    Not(Box<Query>),
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn is_before(field: impl Into<String>, other: impl Into<String>) -> Self {
        Self::IsBefore {
            field: field.into(),
            other: other.into(),
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<Value>, lt: Option<Value>) -> Self {
        Self::Range {
            field: field.into(),
            gte,
            lt,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(query: Query) -> Self {
        Self::Not(Box::new(query))
    }

    pub fn and(queries: Vec<Query>) -> Self {
        Self::And(queries)
    }

    pub fn or(queries: Vec<Query>) -> Self {
        Self::Or(queries)
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => match lookup(doc, field) {
                Some(Value::Array(items)) => items.iter().any(|item| item == value),
                Some(found) => found == value,
                None => false,
            },
            Self::Exists { field } => lookup(doc, field).is_some_and(|v| !v.is_null()),
            Self::Range { field, gte, lt } => {
                let Some(found) = lookup(doc, field).filter(|v| !v.is_null()) else {
                    return false;
                };
                let lower_ok = gte.as_ref().map_or(true, |bound| {
                    compare_values(found, bound).is_some_and(|o| o != Ordering::Less)
                });
                let upper_ok = lt.as_ref().map_or(true, |bound| {
                    compare_values(found, bound) == Some(Ordering::Less)
                });
                lower_ok && upper_ok
            }
            Self::IsBefore { field, other } => {
                match (lookup(doc, field), lookup(doc, other)) {
                    (Some(a), Some(b)) => compare_values(a, b) == Some(Ordering::Less),
                    _ => false,
                }
            }
            Self::Not(inner) => !inner.matches(doc),
            Self::And(all) => all.iter().all(|q| q.matches(doc)),
            Self::Or(any) => any.iter().any(|q| q.matches(doc)),
        }
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Order two JSON scalars: numbers numerically, timestamps chronologically,
/// other strings lexically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "id": "a",
            "status_code": 200,
            "flags": ["x", "y"],
            "last_modified": "2024-01-02T00:00:00Z",
            "url_query_parser": {
                "should_parse": false,
                "last_parsed": "2024-01-01T12:00:00+00:00"
            },
            "warc_location": null
        })
    }

    #[test]
    fn term_on_nested_and_array_fields() {
        let d = doc();
        assert!(Query::term("status_code", 200).matches(&d));
        assert!(Query::term("url_query_parser.should_parse", false).matches(&d));
        assert!(Query::term("flags", "y").matches(&d));
        assert!(!Query::term("flags", "z").matches(&d));
        assert!(!Query::term("missing", 1).matches(&d));
    }

    #[test]
    fn exists_treats_null_as_absent() {
        let d = doc();
        assert!(Query::exists("url_query_parser").matches(&d));
        assert!(!Query::exists("warc_location").matches(&d));
        assert!(!Query::exists("nope").matches(&d));
    }

    #[test]
    fn is_before_compares_timestamps_across_offsets() {
        let d = doc();
        assert!(Query::is_before("url_query_parser.last_parsed", "last_modified").matches(&d));
        assert!(!Query::is_before("last_modified", "url_query_parser.last_parsed").matches(&d));
        assert!(!Query::is_before("missing", "last_modified").matches(&d));
    }

    #[test]
    fn range_bounds() {
        let d = doc();
        assert!(Query::range("status_code", Some(json!(200)), Some(json!(300))).matches(&d));
        assert!(!Query::range("status_code", Some(json!(201)), None).matches(&d));
        assert!(Query::range("last_modified", Some(json!("2024-01-01T00:00:00Z")), None).matches(&d));
    }

    #[test]
    fn boolean_combinators() {
        let d = doc();
        let q = Query::and(vec![
            Query::term("status_code", 200),
            Query::not(Query::exists("warc_location")),
            Query::or(vec![Query::term("id", "b"), Query::term("id", "a")]),
        ]);
        assert!(q.matches(&d));
        assert!(Query::MatchAll.matches(&d));
    }
}
