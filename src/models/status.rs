//! Embedded per-stage status records.
//!
//! A status is an immutable value: a stage produces a new one and the write
//! layer merges it into the stored document. The JSON key names depend on
//! the verb (`should_parse`/`last_parsed`, `should_fetch`/`last_fetched`,
//! `should_download`/`last_downloaded`).

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names the `should_*` / `last_*` key pair of a status.
pub trait StatusVerb: Send + Sync + 'static {
    const SHOULD: &'static str;
    const LAST: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parse;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetch;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Download;

impl StatusVerb for Parse {
    const SHOULD: &'static str = "should_parse";
    const LAST: &'static str = "last_parsed";
}

impl StatusVerb for Fetch {
    const SHOULD: &'static str = "should_fetch";
    const LAST: &'static str = "last_fetched";
}

impl StatusVerb for Download {
    const SHOULD: &'static str = "should_download";
    const LAST: &'static str = "last_downloaded";
}

/// Status of one stage for one entity.
pub struct Status<V> {
    /// Parser or downloader that produced the last result.
    pub id: Option<String>,
    pub should: bool,
    pub last: Option<DateTime<Utc>>,
    verb: PhantomData<V>,
}

impl<V: StatusVerb> Status<V> {
    /// A status that asks the stage to run.
    pub fn pending() -> Self {
        Self {
            id: None,
            should: true,
            last: None,
            verb: PhantomData,
        }
    }

    /// A status recording that the stage finished at `at`.
    pub fn done(id: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            should: false,
            last: Some(at),
            verb: PhantomData,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(ref id) = self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        map.insert(V::SHOULD.to_string(), Value::Bool(self.should));
        map.insert(
            V::LAST.to_string(),
            self.last
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

impl<V> Clone for Status<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            should: self.should,
            last: self.last,
            verb: PhantomData,
        }
    }
}

impl<V> PartialEq for Status<V> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.should == other.should && self.last == other.last
    }
}

impl<V: StatusVerb> fmt::Debug for Status<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("id", &self.id)
            .field(V::SHOULD, &self.should)
            .field(V::LAST, &self.last)
            .finish()
    }
}

impl<V: StatusVerb> Serialize for Status<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ref id) = self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry(V::SHOULD, &self.should)?;
        map.serialize_entry(V::LAST, &self.last)?;
        map.end()
    }
}

impl<'de, V: StatusVerb> Deserialize<'de> for Status<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        let id = match map.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => return Err(de::Error::custom(format!("invalid status id: {}", other))),
        };
        // A missing flag means the stage was never asked to skip.
        let should = map.get(V::SHOULD).and_then(Value::as_bool).unwrap_or(true);
        let last = match map.get(V::LAST) {
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(de::Error::custom)?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };
        Ok(Self {
            id,
            should,
            last,
            verb: PhantomData,
        })
    }
}

/// Where a stage's status lives inside a stored document.
///
/// `field` is `None` for entities that keep the flag pair at the top level
/// (archives and providers with `should_build_sources`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPaths {
    pub field: Option<&'static str>,
    pub should: &'static str,
    pub last: &'static str,
}

impl StatusPaths {
    pub fn embedded<V: StatusVerb>(field: &'static str) -> Self {
        Self {
            field: Some(field),
            should: V::SHOULD,
            last: V::LAST,
        }
    }

    pub fn top_level(should: &'static str, last: &'static str) -> Self {
        Self {
            field: None,
            should,
            last,
        }
    }

    /// Dotted path of the `should_*` flag.
    pub fn should_path(&self) -> String {
        match self.field {
            Some(f) => format!("{}.{}", f, self.should),
            None => self.should.to_string(),
        }
    }

    /// Dotted path of the `last_*` timestamp.
    pub fn last_path(&self) -> String {
        match self.field {
            Some(f) => format!("{}.{}", f, self.last),
            None => self.last.to_string(),
        }
    }

    /// Partial document marking the stage done.
    pub fn done_partial(&self, id: Option<&str>, at: DateTime<Utc>) -> Value {
        let mut inner = Map::new();
        if let (Some(_), Some(id)) = (self.field, id) {
            inner.insert("id".to_string(), Value::String(id.to_string()));
        }
        inner.insert(self.should.to_string(), Value::Bool(false));
        inner.insert(self.last.to_string(), Value::String(at.to_rfc3339()));
        match self.field {
            Some(f) => {
                let mut outer = Map::new();
                outer.insert(f.to_string(), Value::Object(inner));
                Value::Object(outer)
            }
            None => Value::Object(inner),
        }
    }

    /// Top-level key a merge must keep from the stored document.
    pub fn preserved_keys(&self) -> Vec<String> {
        match self.field {
            Some(f) => vec![f.to_string()],
            None => vec![self.should.to_string(), self.last.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn serializes_with_verb_names() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let status: Status<Parse> = Status::done(Some("p1".into()), at);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["id"], "p1");
        assert_eq!(value["should_parse"], false);
        assert!(value["last_parsed"].as_str().unwrap().starts_with("2024-01-02T03:04:05"));
    }

    #[test]
    fn deserialize_defaults_should_to_true() {
        let status: Status<Download> = serde_json::from_value(json!({})).unwrap();
        assert!(status.should);
        assert!(status.last.is_none());
    }

    #[test]
    fn deserialize_roundtrips_through_to_value() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let status: Status<Fetch> = Status::done(None, at);
        let back: Status<Fetch> = serde_json::from_value(status.to_value()).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn paths_for_embedded_and_top_level() {
        let embedded = StatusPaths::embedded::<Parse>("url_query_parser");
        assert_eq!(embedded.should_path(), "url_query_parser.should_parse");
        assert_eq!(embedded.last_path(), "url_query_parser.last_parsed");
        assert_eq!(embedded.preserved_keys(), vec!["url_query_parser"]);

        let top = StatusPaths::top_level("should_build_sources", "last_built_sources");
        assert_eq!(top.should_path(), "should_build_sources");
        assert_eq!(top.preserved_keys().len(), 2);
    }

    #[test]
    fn done_partial_nests_under_field() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let paths = StatusPaths::embedded::<Parse>("url_page_parser");
        let partial = paths.done_partial(Some("parser-a"), at);
        assert_eq!(partial["url_page_parser"]["should_parse"], false);
        assert_eq!(partial["url_page_parser"]["id"], "parser-a");

        let top = StatusPaths::top_level("should_build_sources", "last_built_sources");
        let partial = top.done_partial(Some("ignored"), at);
        assert_eq!(partial["should_build_sources"], false);
        assert!(partial.get("id").is_none());
    }
}
