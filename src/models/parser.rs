//! Stored parser definitions.
//!
//! These are the raw, string-typed records as persisted. The extraction
//! module compiles them into closed parser kinds once at load time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Entity;
use crate::docstore::Index;
use crate::ids::{derive_id, IdNamespace};

/// Which derived field a parser produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserTarget {
    UrlQuery,
    UrlPage,
    UrlOffset,
    WarcQuery,
    WarcSnippets,
    WarcDirectAnswers,
}

impl ParserTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlQuery => "url_query",
            Self::UrlPage => "url_page",
            Self::UrlOffset => "url_offset",
            Self::WarcQuery => "warc_query",
            Self::WarcSnippets => "warc_snippets",
            Self::WarcDirectAnswers => "warc_direct_answers",
        }
    }

    /// Whether parsers for this target read archived content rather than the URL.
    pub fn reads_document(&self) -> bool {
        matches!(
            self,
            Self::WarcQuery | Self::WarcSnippets | Self::WarcDirectAnswers
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserType {
    QueryParameter,
    FragmentParameter,
    PathSegment,
    Xpath,
    CssSelector,
}

impl ParserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryParameter => "query_parameter",
            Self::FragmentParameter => "fragment_parameter",
            Self::PathSegment => "path_segment",
            Self::Xpath => "xpath",
            Self::CssSelector => "css_selector",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserRecord {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target: ParserTarget,
    /// `None` applies the parser to every provider.
    #[serde(default)]
    pub provider_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    pub parser_type: ParserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Read this attribute of the selected element instead of its text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Treat the attribute as a URL and read this query parameter from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_parameter: Option<String>,
    /// Per-item expressions, relative to each node `xpath` selects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_pattern: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl ParserRecord {
    /// A bare record; callers fill the type-specific fields, then call
    /// [`ParserRecord::with_derived_id`].
    pub fn new(target: ParserTarget, parser_type: ParserType) -> Self {
        Self {
            id: Uuid::nil(),
            name: None,
            target,
            provider_id: None,
            url_pattern_regex: None,
            priority: None,
            parser_type,
            parameter: None,
            segment: None,
            xpath: None,
            selector: None,
            attribute: None,
            url_parameter: None,
            url_xpath: None,
            title_xpath: None,
            text_xpath: None,
            url_selector: None,
            title_selector: None,
            text_selector: None,
            remove_pattern: None,
            space_pattern: None,
            last_modified: Utc::now(),
        }
    }

    /// Recompute the id from the definition.
    pub fn with_derived_id(mut self) -> Self {
        self.id = self.derive_id();
        self
    }

    pub fn derive_id(&self) -> Uuid {
        let provider = self.provider_id.map(|p| p.to_string()).unwrap_or_default();
        let priority = self.priority.map(|p| p.to_string()).unwrap_or_default();
        let segment = self.segment.map(|s| s.to_string()).unwrap_or_default();
        let opt = |o: &Option<String>| o.clone().unwrap_or_default();
        derive_id(
            IdNamespace::Parser,
            &[
                self.target.as_str().to_string(),
                provider,
                opt(&self.url_pattern_regex),
                priority,
                self.parser_type.as_str().to_string(),
                opt(&self.parameter),
                segment,
                opt(&self.selector),
                opt(&self.attribute),
                opt(&self.url_parameter),
                opt(&self.url_selector),
                opt(&self.title_selector),
                opt(&self.text_selector),
                opt(&self.remove_pattern),
                opt(&self.space_pattern),
                opt(&self.xpath),
                opt(&self.url_xpath),
                opt(&self.title_xpath),
                opt(&self.text_xpath),
            ],
        )
    }
}

impl Entity for ParserRecord {
    const INDEX: Index = Index::Parsers;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_tracks_definition() {
        let mut a = ParserRecord::new(ParserTarget::UrlQuery, ParserType::QueryParameter);
        a.parameter = Some("q".into());
        let a = a.with_derived_id();

        let mut b = ParserRecord::new(ParserTarget::UrlQuery, ParserType::QueryParameter);
        b.parameter = Some("q".into());
        let b = b.with_derived_id();
        assert_eq!(a.id, b.id);

        let mut c = b.clone();
        c.parameter = Some("query".into());
        assert_ne!(c.derive_id(), a.id);
    }

    #[test]
    fn tags_are_snake_case() {
        let value = serde_json::to_value(ParserType::FragmentParameter).unwrap();
        assert_eq!(value, "fragment_parameter");
        let value = serde_json::to_value(ParserTarget::WarcDirectAnswers).unwrap();
        assert_eq!(value, "warc_direct_answers");
    }

    #[test]
    fn xpath_document_deserializes() {
        let record: ParserRecord = serde_json::from_value(serde_json::json!({
            "id": "6f1c1d1e-4d7c-5a0e-9a55-3f1d2f0e7b11",
            "target": "warc_query",
            "provider_id": null,
            "parser_type": "xpath",
            "xpath": "//input[@name='q']/@value",
            "remove_pattern": " - Search$",
            "last_modified": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.parser_type, ParserType::Xpath);
        assert_eq!(record.xpath.as_deref(), Some("//input[@name='q']/@value"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["parser_type"], "xpath");
        assert!(back.get("selector").is_none());
    }
}
