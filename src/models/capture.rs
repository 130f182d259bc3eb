//! Captures: single hits from a CDX index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ArchiveRef, Entity, Parse, ProviderRef, Status};
use crate::cdx::{format_cdx_timestamp, CaptureRecord};
use crate::docstore::Index;
use crate::ids::{derive_id, IdNamespace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: Uuid,
    pub last_modified: DateTime<Utc>,
    pub archive: ArchiveRef,
    pub provider: ProviderRef,
    pub url: String,
    pub url_key: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_collection: Option<String>,
    #[serde(default)]
    pub url_query_parser: Option<Status<Parse>>,
}

impl Capture {
    pub fn derive_id(cdx_api_url: &str, url: &str, timestamp: DateTime<Utc>) -> Uuid {
        derive_id(
            IdNamespace::Capture,
            &[cdx_api_url, url, &format_cdx_timestamp(timestamp)],
        )
    }

    /// Build a capture from an index row, due for URL query parsing.
    pub fn from_record(archive: &ArchiveRef, provider: &ProviderRef, record: CaptureRecord) -> Self {
        Self {
            id: Self::derive_id(&archive.cdx_api_url, &record.url, record.timestamp),
            last_modified: Utc::now(),
            archive: archive.clone(),
            provider: provider.clone(),
            url: record.url,
            url_key: record.url_key,
            timestamp: record.timestamp,
            status_code: record.status_code,
            digest: record.digest,
            mimetype: record.mimetype,
            filename: record.filename,
            offset: record.offset,
            length: record.length,
            flags: record.flags,
            collection: record.collection,
            source: record.source,
            source_collection: record.source_collection,
            url_query_parser: Some(Status::pending()),
        }
    }

    /// Reference embedded in SERPs and results.
    pub fn to_ref(&self) -> CaptureRef {
        CaptureRef {
            id: self.id,
            url: self.url.clone(),
            timestamp: self.timestamp,
            status_code: self.status_code,
            digest: self.digest.clone(),
            mimetype: self.mimetype.clone(),
        }
    }
}

impl Entity for Capture {
    const INDEX: Index = Index::Captures;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRef {
    pub id: Uuid,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}
