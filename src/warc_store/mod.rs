//! Byte-range addressed store for archived HTTP exchanges.
//!
//! Exchanges are appended as request/response WARC record pairs to rolling
//! `.warc.gz` containers. Every record is its own gzip member, so the
//! returned [`WarcLocation`] of the response member is enough to read it back
//! with one seek and one bounded read. A new container is started when the
//! next pair would push the current one past the size cap.

mod backing;
mod record;

pub use backing::{BlobBacking, LocalDirBacking};
pub use record::{parse_http_message, HttpMessage, StoredRecord, TAG_HEADER};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use warc::RecordType;

use crate::models::WarcLocation;
use record::{decode_member, encode_member, new_record_id, RecordSpec};

/// Default container size cap (1 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WarcStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed WARC record: {0}")]
    Malformed(String),

    #[error("Container {file} is truncated: record ends at byte {end}, file has {available}")]
    Truncated { file: String, end: u64, available: u64 },
}

/// One fetched exchange to archive, tagged with the id of the entity it
/// belongs to.
#[derive(Debug, Clone)]
pub struct ArchivedExchange {
    pub tag: String,
    pub target_uri: String,
    pub date: DateTime<Utc>,
    /// Raw HTTP request message.
    pub request: Vec<u8>,
    /// Raw HTTP response message: status line, headers, blank line, body.
    pub response: Vec<u8>,
}

impl ArchivedExchange {
    /// Assemble an exchange from a GET and its response parts.
    pub fn from_parts(
        tag: impl Into<String>,
        target_uri: impl Into<String>,
        date: DateTime<Utc>,
        status_line: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Self {
        let target_uri = target_uri.into();
        let request = build_get_request(&target_uri);

        let mut response = Vec::with_capacity(body.len() + 256);
        response.extend_from_slice(status_line.as_bytes());
        response.extend_from_slice(b"\r\n");
        for (name, value) in headers {
            response.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        response.extend_from_slice(b"\r\n");
        response.extend_from_slice(body);

        Self {
            tag: tag.into(),
            target_uri,
            date,
            request,
            response,
        }
    }
}

fn build_get_request(target_uri: &str) -> Vec<u8> {
    let parsed = url::Url::parse(target_uri).ok();
    let host = parsed
        .as_ref()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_default();
    let path = parsed
        .as_ref()
        .map(|u| match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        })
        .unwrap_or_else(|| "/".to_string());
    format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, host).into_bytes()
}

struct OpenContainer {
    name: String,
    size: u64,
}

/// Rolling-container WARC store.
pub struct WarcStore {
    backing: Arc<dyn BlobBacking>,
    max_file_size: u64,
    current: Mutex<Option<OpenContainer>>,
}

impl WarcStore {
    pub fn new(backing: Arc<dyn BlobBacking>, max_file_size: u64) -> Self {
        Self {
            backing,
            max_file_size,
            current: Mutex::new(None),
        }
    }

    /// Store backed by a local directory.
    pub fn local(dir: impl Into<std::path::PathBuf>, max_file_size: u64) -> Self {
        Self::new(Arc::new(LocalDirBacking::new(dir)), max_file_size)
    }

    /// Append one exchange. Returns its tag with the response's location.
    pub async fn write(&self, exchange: ArchivedExchange) -> Result<(String, WarcLocation), WarcStoreError> {
        let request_id = new_record_id();
        let response_id = new_record_id();

        let request_member = encode_member(RecordSpec {
            record_id: &request_id,
            warc_type: RecordType::Request,
            target_uri: &exchange.target_uri,
            date: exchange.date,
            tag: &exchange.tag,
            concurrent_to: None,
            content_type: "application/http; msgtype=request",
            content: exchange.request,
        })?;
        let response_member = encode_member(RecordSpec {
            record_id: &response_id,
            warc_type: RecordType::Response,
            target_uri: &exchange.target_uri,
            date: exchange.date,
            tag: &exchange.tag,
            concurrent_to: Some(&request_id),
            content_type: "application/http; msgtype=response",
            content: exchange.response,
        })?;

        let pair_size = (request_member.len() + response_member.len()) as u64;

        let mut current = self.current.lock().await;
        let roll = match current.as_ref() {
            None => true,
            Some(open) => open.size > 0 && open.size + pair_size > self.max_file_size,
        };
        if roll {
            let name = format!("{}.warc.gz", Uuid::new_v4());
            info!("Starting WARC container {}", name);
            *current = Some(OpenContainer { name, size: 0 });
        }
        let Some(open) = current.as_mut() else {
            return Err(WarcStoreError::Malformed("no open container".to_string()));
        };

        self.backing.append(&open.name, &request_member).await?;
        let offset = self
            .backing
            .append(&open.name, &response_member)
            .await?;
        open.size = offset + response_member.len() as u64;

        let location = WarcLocation {
            file: open.name.clone(),
            offset,
            length: response_member.len() as u64,
        };
        debug!(
            "Stored {} at {}:{}+{}",
            exchange.tag, location.file, location.offset, location.length
        );
        Ok((exchange.tag, location))
    }

    /// Append exchanges in order, returning one `(tag, location)` per input.
    pub async fn write_all(
        &self,
        exchanges: impl IntoIterator<Item = ArchivedExchange>,
    ) -> Result<Vec<(String, WarcLocation)>, WarcStoreError> {
        let mut out = Vec::new();
        for exchange in exchanges {
            out.push(self.write(exchange).await?);
        }
        Ok(out)
    }

    /// Read exactly the record at `location`.
    pub async fn read(&self, location: &WarcLocation) -> Result<StoredRecord, WarcStoreError> {
        // A missing container reports as size 0 and fails on open below.
        let available = self.backing.size(&location.file).await?;
        let end = location.offset.saturating_add(location.length);
        if available > 0 && end > available {
            return Err(WarcStoreError::Truncated {
                file: location.file.clone(),
                end,
                available,
            });
        }
        let bytes = self
            .backing
            .read_range(&location.file, location.offset, location.length)
            .await?;
        decode_member(&bytes).map_err(|e| match e {
            WarcStoreError::Io(io) => WarcStoreError::Malformed(io.to_string()),
            other => other,
        })
    }
}
