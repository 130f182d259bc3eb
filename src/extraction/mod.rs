//! Extraction chains: ordered parsers deriving SERP fields from capture
//! URLs and archived documents.

mod cache;
mod chain;
mod cleanup;
mod document;
mod parser;
mod xpath;

pub use cache::ParserCache;
pub use chain::{Extracted, ParserChain};
pub use cleanup::Cleanup;
pub use document::{CssExtractor, ExtractedItem, Page};
pub use parser::CompiledParser;

use thiserror::Error;

use crate::docstore::StoreError;

/// Parser configuration errors. These abort the run.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Parser {parser} of type {parser_type} is missing required field `{field}`")]
    MissingParameter {
        parser: String,
        parser_type: &'static str,
        field: &'static str,
    },

    #[error("Parser {parser} has invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        parser: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Parser {parser} has invalid selector {selector:?}: {message}")]
    InvalidSelector {
        parser: String,
        selector: String,
        message: String,
    },

    #[error("Parser {parser} has invalid XPath {expression:?}: {message}")]
    InvalidXPath {
        parser: String,
        expression: String,
        message: String,
    },

    #[error("Parser {parser} of type {parser_type} cannot produce {target}")]
    TargetMismatch {
        parser: String,
        parser_type: &'static str,
        target: &'static str,
    },

    #[error("Failed to load parsers: {0}")]
    Store(#[from] StoreError),
}

/// Parse an extracted numeric field. Values outside `i64` are rejected.
pub fn parse_integer(value: &str) -> Result<i64, std::num::ParseIntError> {
    value.trim().parse::<i64>()
}
