//! Archived-content download: fetch the raw capture of a SERP from its
//! archive's Memento endpoint and append it to the WARC store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::memento::{FetchedMemento, MementoClient};
use crate::models::Serp;
use crate::pipeline::{EntityProcessor, Outcome, PipelineError};
use crate::warc_store::{ArchivedExchange, WarcStore};

/// Status id recorded by the downloader.
pub const DOWNLOADER_ID: &str = "memento";

/// Headers describing the transfer rather than the stored body, which
/// reqwest has already decoded.
const TRANSFER_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

pub struct WarcDownloader {
    memento: MementoClient,
    warc_store: Arc<WarcStore>,
}

impl WarcDownloader {
    pub fn new(memento: MementoClient, warc_store: Arc<WarcStore>) -> Self {
        Self { memento, warc_store }
    }
}

fn exchange_for(serp: &Serp, memento: FetchedMemento) -> ArchivedExchange {
    let mut headers: Vec<(String, String)> = memento
        .headers
        .into_iter()
        .filter(|(name, _)| !TRANSFER_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .collect();
    headers.sort();
    headers.push(("Content-Length".to_string(), memento.body.len().to_string()));

    ArchivedExchange::from_parts(
        serp.id.to_string(),
        memento.url,
        Utc::now(),
        &memento.status_line,
        &headers,
        &memento.body,
    )
}

#[async_trait]
impl EntityProcessor for WarcDownloader {
    type Entity = Serp;

    async fn process(&self, serp: Serp) -> Result<Outcome, PipelineError> {
        let fetched = self
            .memento
            .fetch_raw(
                &serp.archive.memento_api_url,
                serp.capture.timestamp,
                &serp.capture.url,
            )
            .await;

        let memento = match fetched {
            Ok(memento) => memento,
            Err(e) if e.is_transient() => {
                return Ok(Outcome::Retry {
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                return Ok(Outcome::GiveUp {
                    reason: e.to_string(),
                })
            }
        };

        let (_, location) = self.warc_store.write(exchange_for(&serp, memento)).await?;
        debug!(
            "Stored SERP {} at {}@{}+{}",
            serp.id, location.file, location.offset, location.length
        );

        Ok(Outcome::Done {
            writes: Vec::new(),
            fields: Some(json!({ "warc_location": location })),
            status_id: Some(DOWNLOADER_ID.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::cdx::CaptureRecord;
    use crate::models::{Archive, Capture, Provider, Source};

    fn serp() -> Serp {
        let archive = Archive::new("a", "https://a/cdx", "https://a/web");
        let provider = Provider::new("p", vec!["search.example".into()], vec![]);
        let source = Source::new(&archive, &provider, "search.example", "");
        let capture = Capture::from_record(
            &source.archive,
            &source.provider,
            CaptureRecord {
                url: "https://search.example/?q=x".into(),
                url_key: "example,search)/?q=x".into(),
                timestamp: Utc::now(),
                status_code: 200,
                digest: "D".into(),
                mimetype: None,
                filename: None,
                offset: None,
                length: None,
                flags: Vec::new(),
                collection: None,
                source: None,
                source_collection: None,
            },
        );
        Serp::from_capture(&capture, "x".into(), "parser")
    }

    #[test]
    fn exchange_drops_transfer_headers() {
        let serp = serp();
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        headers.insert("Content-Encoding".to_string(), "gzip".to_string());
        headers.insert("Content-Length".to_string(), "999".to_string());
        let exchange = exchange_for(
            &serp,
            FetchedMemento {
                url: "https://a/web/20240101000000id_/https://search.example/?q=x".into(),
                status: 200,
                status_line: "HTTP/1.1 200 OK".into(),
                headers,
                body: b"<html></html>".to_vec(),
            },
        );

        assert_eq!(exchange.tag, serp.id.to_string());
        let text = String::from_utf8(exchange.response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.contains("Content-Length: 13\r\n"));
        assert!(!text.contains("gzip"));
        assert!(text.ends_with("\r\n\r\n<html></html>"));
    }
}
