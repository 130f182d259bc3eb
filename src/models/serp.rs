//! SERPs: captures confirmed to be search result pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ArchiveRef, Capture, CaptureRef, Download, Entity, Parse, ProviderRef, Status};
use crate::docstore::Index;

/// Coordinates of one record inside a shared compressed container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WarcLocation {
    pub file: String,
    pub offset: u64,
    pub length: u64,
}

/// Snippet summary embedded in the SERP; the full record lives in `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetRef {
    pub id: Uuid,
    pub rank: usize,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectAnswerRef {
    pub id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Serp {
    pub id: Uuid,
    pub last_modified: DateTime<Utc>,
    pub archive: ArchiveRef,
    pub provider: ProviderRef,
    pub capture: CaptureRef,
    pub url_query: String,
    #[serde(default)]
    pub url_query_parser: Option<Status<Parse>>,
    #[serde(default)]
    pub url_page: Option<i64>,
    #[serde(default)]
    pub url_page_parser: Option<Status<Parse>>,
    #[serde(default)]
    pub url_offset: Option<i64>,
    #[serde(default)]
    pub url_offset_parser: Option<Status<Parse>>,
    #[serde(default)]
    pub warc_location: Option<WarcLocation>,
    #[serde(default)]
    pub warc_downloader: Option<Status<Download>>,
    #[serde(default)]
    pub warc_query: Option<String>,
    #[serde(default)]
    pub warc_query_parser: Option<Status<Parse>>,
    #[serde(default)]
    pub warc_snippets: Option<Vec<SnippetRef>>,
    #[serde(default)]
    pub warc_snippets_parser: Option<Status<Parse>>,
    #[serde(default)]
    pub warc_direct_answers: Option<Vec<DirectAnswerRef>>,
    #[serde(default)]
    pub warc_direct_answers_parser: Option<Status<Parse>>,
}

impl Serp {
    /// A SERP shares its capture's id: one capture is at most one result page.
    pub fn from_capture(capture: &Capture, url_query: String, parser_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: capture.id,
            last_modified: now,
            archive: capture.archive.clone(),
            provider: capture.provider.clone(),
            capture: capture.to_ref(),
            url_query,
            url_query_parser: Some(Status::done(Some(parser_id.to_string()), now)),
            url_page: None,
            url_page_parser: Some(Status::pending()),
            url_offset: None,
            url_offset_parser: Some(Status::pending()),
            warc_location: None,
            warc_downloader: Some(Status::pending()),
            warc_query: None,
            warc_query_parser: Some(Status::pending()),
            warc_snippets: None,
            warc_snippets_parser: Some(Status::pending()),
            warc_direct_answers: None,
            warc_direct_answers_parser: Some(Status::pending()),
        }
    }

    /// Reference embedded in result documents.
    pub fn to_ref(&self) -> SerpRef {
        SerpRef {
            id: self.id,
            url_query: self.url_query.clone(),
        }
    }
}

impl Entity for Serp {
    const INDEX: Index = Index::Serps;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerpRef {
    pub id: Uuid,
    pub url_query: String,
}
