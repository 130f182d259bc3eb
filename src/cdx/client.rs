//! HTTP implementation of [`CaptureIndex`].

use std::collections::HashSet;
use std::sync::Mutex;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use super::parse::{parse_cdx_body, parse_page_count, row_to_record, CdxQuery, KNOWN_COLUMNS};
use super::{CaptureIndex, CaptureRecord, CdxDialect, CdxError, MatchType, TimeRange};
use crate::http_client::HttpClient;

/// Records of one response plus the continuation token, if any.
struct CdxPage {
    records: Vec<CaptureRecord>,
    resume_key: Option<String>,
}

/// Client for one CDX endpoint.
pub struct CdxClient {
    http: HttpClient,
    base_url: String,
    dialect: CdxDialect,
    page_concurrency: usize,
    page_size: Option<usize>,
    unknown_columns: Mutex<HashSet<String>>,
}

impl CdxClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>, dialect: CdxDialect) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            dialect,
            page_concurrency: 1,
            page_size: None,
            unknown_columns: Mutex::new(HashSet::new()),
        }
    }

    /// Number of pages fetched concurrently in the paged dialect. Output
    /// order stays page order.
    pub fn with_page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = n.max(1);
        self
    }

    /// Rows requested per call in the resume-key dialect.
    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_body(&self, url: &str) -> Result<String, CdxError> {
        let response = self.http.get(url).await.map_err(|source| CdxError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !response.is_success() {
            return Err(CdxError::Status {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }
        response.text().await.map_err(|source| CdxError::Transport {
            url: url.to_string(),
            source,
        })
    }

    async fn page_count(&self, query: &CdxQuery) -> Result<u64, CdxError> {
        let url = query.clone().show_num_pages().build();
        let body = self.get_body(&url).await?;
        parse_page_count(&body).map_err(|message| CdxError::Parse { url, message })
    }

    async fn fetch_page(&self, query: &CdxQuery) -> Result<CdxPage, CdxError> {
        let url = query.build();
        let body = self.get_body(&url).await?;
        let parsed = parse_cdx_body(&body).map_err(|message| CdxError::Parse {
            url: url.clone(),
            message,
        })?;

        let mut records = Vec::with_capacity(parsed.rows.len());
        for row in &parsed.rows {
            self.note_unknown_columns(row.columns());
            match row_to_record(row) {
                Ok(record) => records.push(record),
                Err(reason) => warn!("Skipping CDX row from {}: {}", url, reason),
            }
        }
        Ok(CdxPage {
            records,
            resume_key: parsed.resume_key,
        })
    }

    fn note_unknown_columns<'r>(&self, columns: impl Iterator<Item = &'r str>) {
        let Ok(mut seen) = self.unknown_columns.lock() else {
            return;
        };
        for column in columns {
            if !KNOWN_COLUMNS.contains(&column) && seen.insert(column.to_string()) {
                debug!("Ignoring unknown CDX column {:?} from {}", column, self.base_url);
            }
        }
    }

    fn paged(&self, query: CdxQuery) -> BoxStream<'_, Result<CdxPage, CdxError>> {
        let concurrency = self.page_concurrency;
        stream::once(async move {
            let pages = self.page_count(&query).await?;
            debug!("{} reports {} page(s) for {}", self.base_url, pages, query.build());
            let fetches = stream::iter(0..pages)
                .map(move |page| {
                    let query = query.clone().page(page);
                    async move { self.fetch_page(&query).await }
                })
                .buffered(concurrency);
            Ok::<_, CdxError>(fetches)
        })
        .try_flatten()
        .boxed()
    }

    fn resumable(&self, query: CdxQuery) -> BoxStream<'_, Result<CdxPage, CdxError>> {
        let query = match self.page_size {
            Some(n) => query.limit(n),
            None => query,
        }
        .show_resume_key();

        // State: `None` when done, `Some(None)` before the first request.
        stream::try_unfold(Some(None::<String>), move |state| {
            let query = query.clone();
            async move {
                let Some(key) = state else {
                    return Ok::<_, CdxError>(None);
                };
                let request = match &key {
                    Some(k) => query.resume_key(k.clone()),
                    None => query,
                };
                let page = self.fetch_page(&request).await?;
                let next = match &page.resume_key {
                    Some(next) if Some(next) == key.as_ref() => {
                        warn!("{} repeated resume key {:?}, stopping", self.base_url, next);
                        None
                    }
                    Some(next) => Some(Some(next.clone())),
                    None => None,
                };
                Ok::<_, CdxError>(Some((page, next)))
            }
        })
        .boxed()
    }
}

impl CaptureIndex for CdxClient {
    fn iterate_captures<'a>(
        &'a self,
        url: &str,
        match_type: MatchType,
        time_range: Option<TimeRange>,
    ) -> BoxStream<'a, Result<CaptureRecord, CdxError>> {
        let query = CdxQuery::new(self.base_url.clone(), url)
            .match_type(match_type)
            .time_range(time_range.as_ref());

        let pages = match self.dialect {
            CdxDialect::Paged => self.paged(query),
            CdxDialect::ResumeKey => self.resumable(query),
        };
        pages
            .map_ok(|page| stream::iter(page.records.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}
