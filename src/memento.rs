//! Raw archived-page retrieval through a Memento endpoint.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cdx::format_cdx_timestamp;
use crate::http_client::HttpClient;

#[derive(Debug, Error)]
pub enum MementoError {
    #[error("Memento request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Memento request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl MementoError {
    /// Worth retrying on a later run.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// One archived response as served by the archive.
#[derive(Debug, Clone)]
pub struct FetchedMemento {
    pub url: String,
    pub status: u16,
    pub status_line: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Build a raw memento URL (original bytes, no archive toolbar).
pub fn build_raw_memento_url(
    memento_api_url: &str,
    timestamp: DateTime<Utc>,
    original_url: &str,
) -> String {
    format!(
        "{}/{}id_/{}",
        memento_api_url.trim_end_matches('/'),
        format_cdx_timestamp(timestamp),
        original_url
    )
}

pub struct MementoClient {
    http: HttpClient,
}

impl MementoClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Fetch the raw capture. Non-2xx statuses are errors.
    pub async fn fetch_raw(
        &self,
        memento_api_url: &str,
        timestamp: DateTime<Utc>,
        original_url: &str,
    ) -> Result<FetchedMemento, MementoError> {
        let url = build_raw_memento_url(memento_api_url, timestamp, original_url);
        let response = self
            .http
            .get(&url)
            .await
            .map_err(|source| MementoError::Transport {
                url: url.clone(),
                source,
            })?;

        if !response.is_success() {
            return Err(MementoError::Status {
                url,
                status: response.status.as_u16(),
            });
        }

        let status = response.status.as_u16();
        let status_line = response.status_line();
        let headers = response.headers.clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| MementoError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(FetchedMemento {
            url,
            status,
            status_line,
            headers,
            body,
        })
    }
}
