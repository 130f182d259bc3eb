//! Compiled parsers.
//!
//! Stored [`ParserRecord`]s are checked and compiled once. A record that
//! names a field its type needs but does not set, or an invalid regex or
//! selector, is a configuration error and aborts loading.

use regex::Regex;
use scraper::Selector;
use url::Url;

use super::cleanup::Cleanup;
use super::document::{query_parameter, CssExtractor, ExtractedItem, Page};
use super::xpath::{compile, XPathExtractor};
use super::ParserError;
use crate::models::{ParserRecord, ParserTarget, ParserType};

/// Closed set of extraction strategies.
#[derive(Debug, Clone)]
pub(crate) enum ParserKind {
    /// Named URL query parameter.
    QueryParameter(String),
    /// Named parameter of a `key=value&...` URL fragment.
    FragmentParameter(String),
    /// Index into the URL path split on `/`. The leading slash makes
    /// index 0 the empty string.
    PathSegment(usize),
    XPath(XPathExtractor),
    Css(CssExtractor),
}

#[derive(Debug, Clone)]
pub struct CompiledParser {
    pub id: String,
    pub target: ParserTarget,
    pub priority: Option<f32>,
    url_pattern: Option<Regex>,
    kind: ParserKind,
    cleanup: Cleanup,
}

impl CompiledParser {
    /// Whether this parser is meant for pages at `url`.
    pub fn applies_to(&self, url: &str) -> bool {
        self.url_pattern.as_ref().map_or(true, |re| re.is_match(url))
    }

    /// Extract from the URL alone. Document parsers yield nothing here.
    pub fn parse_url(&self, url: &Url) -> Option<String> {
        let raw = match &self.kind {
            ParserKind::QueryParameter(name) => query_parameter(url, name),
            ParserKind::FragmentParameter(name) => url.fragment().and_then(|fragment| {
                url::form_urlencoded::parse(fragment.as_bytes())
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
            }),
            ParserKind::PathSegment(index) => url
                .path()
                .split('/')
                .nth(*index)
                .and_then(|s| urlencoding::decode(s).ok().map(|d| d.into_owned())),
            ParserKind::XPath(_) | ParserKind::Css(_) => None,
        }?;
        self.cleanup.apply(&raw)
    }

    /// Single value from an archived document.
    pub fn parse_document_value(&self, page: &Page, base_url: Option<&Url>) -> Option<String> {
        match &self.kind {
            ParserKind::XPath(xpath) => xpath.extract_value(page.xml(), base_url, &self.cleanup),
            ParserKind::Css(css) => css.extract_value(page.html(), base_url, &self.cleanup),
            _ => None,
        }
    }

    /// Result blocks from an archived document.
    pub fn parse_document_items(&self, page: &Page, base_url: Option<&Url>) -> Vec<ExtractedItem> {
        match &self.kind {
            ParserKind::XPath(xpath) => xpath.extract_items(page.xml(), base_url, &self.cleanup),
            ParserKind::Css(css) => css.extract_items(page.html(), base_url, &self.cleanup),
            _ => Vec::new(),
        }
    }
}

impl TryFrom<&ParserRecord> for CompiledParser {
    type Error = ParserError;

    fn try_from(record: &ParserRecord) -> Result<Self, Self::Error> {
        let id = record.id.to_string();
        let missing = |field: &'static str| ParserError::MissingParameter {
            parser: id.clone(),
            parser_type: record.parser_type.as_str(),
            field,
        };
        let regex = |pattern: &Option<String>| -> Result<Option<Regex>, ParserError> {
            pattern
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|source| ParserError::InvalidPattern {
                        parser: id.clone(),
                        pattern: p.to_string(),
                        source,
                    })
                })
                .transpose()
        };
        let selector = |css: &Option<String>| -> Result<Option<Selector>, ParserError> {
            css.as_deref()
                .map(|s| {
                    Selector::parse(s).map_err(|e| ParserError::InvalidSelector {
                        parser: id.clone(),
                        selector: s.to_string(),
                        message: e.to_string(),
                    })
                })
                .transpose()
        };

        let kind = match record.parser_type {
            ParserType::QueryParameter => ParserKind::QueryParameter(
                record.parameter.clone().ok_or_else(|| missing("parameter"))?,
            ),
            ParserType::FragmentParameter => ParserKind::FragmentParameter(
                record.parameter.clone().ok_or_else(|| missing("parameter"))?,
            ),
            ParserType::PathSegment => {
                ParserKind::PathSegment(record.segment.ok_or_else(|| missing("segment"))?)
            }
            ParserType::Xpath => {
                let extractor = XPathExtractor {
                    expression: record.xpath.clone().ok_or_else(|| missing("xpath"))?,
                    url_parameter: record.url_parameter.clone(),
                    url_xpath: record.url_xpath.clone(),
                    title_xpath: record.title_xpath.clone(),
                    text_xpath: record.text_xpath.clone(),
                };
                for expression in extractor.expressions() {
                    compile(expression).map_err(|message| ParserError::InvalidXPath {
                        parser: id.clone(),
                        expression: expression.to_string(),
                        message,
                    })?;
                }
                ParserKind::XPath(extractor)
            }
            ParserType::CssSelector => ParserKind::Css(CssExtractor {
                selector: selector(&record.selector)?.ok_or_else(|| missing("selector"))?,
                attribute: record.attribute.clone(),
                url_parameter: record.url_parameter.clone(),
                url_selector: selector(&record.url_selector)?,
                title_selector: selector(&record.title_selector)?,
                text_selector: selector(&record.text_selector)?,
            }),
        };

        let reads_document = matches!(kind, ParserKind::XPath(_) | ParserKind::Css(_));
        if reads_document != record.target.reads_document() {
            return Err(ParserError::TargetMismatch {
                parser: id.clone(),
                parser_type: record.parser_type.as_str(),
                target: record.target.as_str(),
            });
        }

        Ok(Self {
            id: id.clone(),
            target: record.target,
            priority: record.priority,
            url_pattern: regex(&record.url_pattern_regex)?,
            kind,
            cleanup: Cleanup::new(regex(&record.remove_pattern)?, regex(&record.space_pattern)?),
        })
    }
}
