//! Capture discovery: list every capture of a source from its archive's
//! CDX index and upsert it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{status_paths, StageName};
use crate::cdx::{CaptureIndex, CdxClient, MatchType};
use crate::docstore::{BulkAction, DocumentStore};
use crate::http_client::HttpClient;
use crate::models::{Capture, Source};
use crate::pipeline::{write_bulk, EntityProcessor, Outcome, PipelineError};

/// URLs longer than this are not stored.
pub const MAX_URL_LENGTH: usize = 32_766;

/// Captures written per bulk request while a source is still streaming.
const FLUSH_SIZE: usize = 500;

pub struct CaptureFetcher {
    store: Arc<dyn DocumentStore>,
    http: HttpClient,
    page_concurrency: usize,
}

impl CaptureFetcher {
    pub fn new(store: Arc<dyn DocumentStore>, http: HttpClient) -> Self {
        Self {
            store,
            http,
            page_concurrency: 1,
        }
    }

    pub fn with_page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = n.max(1);
        self
    }

    fn client_for(&self, source: &Source) -> CdxClient {
        CdxClient::new(
            self.http.clone(),
            &source.archive.cdx_api_url,
            source.archive.cdx_dialect,
        )
        .with_page_concurrency(self.page_concurrency)
    }
}

#[async_trait]
impl EntityProcessor for CaptureFetcher {
    type Entity = Source;

    async fn process(&self, source: Source) -> Result<Outcome, PipelineError> {
        let preserve = status_paths(StageName::ParseUrlQuery).preserved_keys();
        let client = self.client_for(&source);
        let pattern = source.capture_url_prefix();
        let mut captures = client.iterate_captures(&pattern, MatchType::Prefix, None);

        let mut batch = Vec::new();
        let mut seen = 0usize;
        let mut oversized = 0usize;

        while let Some(item) = captures.next().await {
            let record = match item {
                Ok(record) => record,
                Err(e) if e.is_permission_denied() => {
                    return Ok(Outcome::GiveUp {
                        reason: format!("{}: {}", pattern, e),
                    });
                }
                Err(e) if e.is_transient() => {
                    // What was listed so far is valid; keep it.
                    write_bulk(self.store.as_ref(), StageName::FetchCaptures.as_str(), batch).await?;
                    return Ok(Outcome::Retry {
                        reason: format!("{}: {}", pattern, e),
                    });
                }
                Err(e) => return Err(e.into()),
            };

            if record.url.len() > MAX_URL_LENGTH {
                oversized += 1;
                warn!(
                    "Skipping capture of {}... ({} bytes, limit {})",
                    record.url.chars().take(80).collect::<String>(),
                    record.url.len(),
                    MAX_URL_LENGTH
                );
                continue;
            }

            let capture = Capture::from_record(&source.archive, &source.provider, record);
            batch.push(BulkAction::merge_entity(&capture, preserve.clone())?);
            seen += 1;

            if batch.len() >= FLUSH_SIZE {
                debug!("Flushing {} captures of {}", batch.len(), pattern);
                write_bulk(
                    self.store.as_ref(),
                    StageName::FetchCaptures.as_str(),
                    std::mem::take(&mut batch),
                )
                .await?;
            }
        }

        info!(
            "Fetched {} capture(s) of {} from {} ({} oversized skipped)",
            seen,
            pattern,
            client.base_url(),
            oversized
        );
        Ok(Outcome::Done {
            writes: batch,
            fields: None,
            status_id: None,
        })
    }
}
