//! Capture index client.
//!
//! Lists URL captures from a CDX-style index as a lazy stream of
//! [`CaptureRecord`]s. Two paging dialects are supported, see
//! [`CdxDialect`].

mod client;
mod parse;

pub use client::CdxClient;
pub use parse::{
    format_cdx_timestamp, parse_cdx_body, parse_cdx_timestamp, parse_page_count, row_to_record,
    CdxBody, CdxQuery, CdxRow,
};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a CDX endpoint splits large result sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdxDialect {
    /// `showNumPages` request, then independent `page=N` requests.
    #[default]
    Paged,
    /// `showResumeKey`, following the returned `resumeKey` until none is left.
    ResumeKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Prefix,
    Host,
    Domain,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Host => "host",
            Self::Domain => "domain",
        }
    }
}

/// Inclusive capture time window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// One normalized index row.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub url: String,
    pub url_key: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub digest: String,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
    pub offset: Option<u64>,
    pub length: Option<u64>,
    pub flags: Vec<String>,
    pub collection: Option<String>,
    pub source: Option<String>,
    pub source_collection: Option<String>,
}

#[derive(Debug, Error)]
pub enum CdxError {
    #[error("CDX request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("CDX request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse CDX response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl CdxError {
    /// Timeouts, connection failures and gateway errors that outlasted the
    /// retry budget. The next run may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Parse { .. } => false,
        }
    }

    /// The index refuses to serve this URL space.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Status { status: 403, .. })
    }
}

/// Source of capture records.
pub trait CaptureIndex: Send + Sync {
    /// Lazily list every capture matching `url`. The stream is not
    /// resumable mid-way; restart by calling again.
    fn iterate_captures<'a>(
        &'a self,
        url: &str,
        match_type: MatchType,
        time_range: Option<TimeRange>,
    ) -> BoxStream<'a, Result<CaptureRecord, CdxError>>;
}
