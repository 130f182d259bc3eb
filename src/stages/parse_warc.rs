//! Document parsing stages: read a SERP's archived response back from the
//! WARC store and extract the query, the result snippets or the direct
//! answers with XPath or CSS parser chains.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::docstore::BulkAction;
use crate::extraction::{ExtractedItem, Page, ParserCache, ParserChain};
use crate::models::{
    DirectAnswerRef, ParserTarget, ResultKind, ResultRecord, Serp, SnippetRef,
};
use crate::pipeline::{EntityProcessor, Outcome, PipelineError};
use crate::warc_store::{StoredRecord, WarcStore, WarcStoreError};

/// Which field of the SERP a [`WarcParser`] fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarcField {
    Query,
    Snippets,
    DirectAnswers,
}

impl WarcField {
    pub fn target(&self) -> ParserTarget {
        match self {
            Self::Query => ParserTarget::WarcQuery,
            Self::Snippets => ParserTarget::WarcSnippets,
            Self::DirectAnswers => ParserTarget::WarcDirectAnswers,
        }
    }
}

pub struct WarcParser {
    parsers: Arc<ParserCache>,
    warc_store: Arc<WarcStore>,
    field: WarcField,
}

impl WarcParser {
    pub fn new(parsers: Arc<ParserCache>, warc_store: Arc<WarcStore>, field: WarcField) -> Self {
        Self {
            parsers,
            warc_store,
            field,
        }
    }

    /// Parse the stored response. Kept synchronous: the parsed tree must
    /// not live across an await point.
    fn extract(&self, chain: &ParserChain, serp: &Serp, record: &StoredRecord) -> Result<Outcome, PipelineError> {
        let Some(message) = record.http_response() else {
            return Ok(Outcome::GiveUp {
                reason: "stored record has no HTTP response".to_string(),
            });
        };
        let body = String::from_utf8_lossy(message.body);
        let page = Page::parse(&body);
        let url = serp.capture.url.as_str();

        match self.field {
            WarcField::Query => Ok(match chain.parse_document_value(url, &page) {
                Some(found) => Outcome::Done {
                    writes: Vec::new(),
                    fields: Some(json!({ "warc_query": found.value })),
                    status_id: Some(found.parser_id),
                },
                None => Outcome::empty(),
            }),
            WarcField::Snippets => {
                let Some(found) = chain.parse_document_items(url, &page) else {
                    return Ok(Outcome::empty());
                };
                let records = results(ResultKind::Snippet, serp, &found.parser_id, found.value);
                let refs: Vec<SnippetRef> = records
                    .iter()
                    .map(|r| SnippetRef {
                        id: r.id,
                        rank: r.rank,
                        content: r.content.clone(),
                        url: r.url.clone(),
                        title: r.title.clone(),
                        text: r.text.clone(),
                    })
                    .collect();
                Ok(Outcome::Done {
                    writes: result_writes(&records)?,
                    fields: Some(json!({ "warc_snippets": refs })),
                    status_id: Some(found.parser_id),
                })
            }
            WarcField::DirectAnswers => {
                let Some(found) = chain.parse_document_items(url, &page) else {
                    return Ok(Outcome::empty());
                };
                let records = results(ResultKind::DirectAnswer, serp, &found.parser_id, found.value);
                let refs: Vec<DirectAnswerRef> = records
                    .iter()
                    .map(|r| DirectAnswerRef {
                        id: r.id,
                        content: r.content.clone(),
                        url: r.url.clone(),
                        text: r.text.clone(),
                    })
                    .collect();
                Ok(Outcome::Done {
                    writes: result_writes(&records)?,
                    fields: Some(json!({ "warc_direct_answers": refs })),
                    status_id: Some(found.parser_id),
                })
            }
        }
    }
}

fn results(kind: ResultKind, serp: &Serp, parser_id: &str, items: Vec<ExtractedItem>) -> Vec<ResultRecord> {
    items
        .into_iter()
        .enumerate()
        .map(|(rank, item)| {
            let mut record = ResultRecord::new(kind, serp, parser_id, rank, item.content);
            record.url = item.url;
            record.title = item.title;
            record.text = item.text;
            record
        })
        .collect()
}

fn result_writes(records: &[ResultRecord]) -> Result<Vec<BulkAction>, PipelineError> {
    records
        .iter()
        .map(|r| BulkAction::merge_entity(r, Vec::new()).map_err(PipelineError::from))
        .collect()
}

#[async_trait]
impl EntityProcessor for WarcParser {
    type Entity = Serp;

    async fn process(&self, serp: Serp) -> Result<Outcome, PipelineError> {
        let Some(location) = serp.warc_location.clone() else {
            return Ok(Outcome::Retry {
                reason: "not downloaded yet".to_string(),
            });
        };

        let chain = self
            .parsers
            .chain(self.field.target(), serp.provider.id)
            .await?;
        if chain.is_empty() {
            debug!("No {} parsers for provider {}", self.field.target().as_str(), serp.provider.id);
            return Ok(Outcome::empty());
        }

        // Only transient I/O failures retry. A damaged or missing record
        // stays that way.
        let record = match self.warc_store.read(&location).await {
            Ok(record) => record,
            Err(WarcStoreError::Io(e)) if e.kind() != std::io::ErrorKind::NotFound => {
                return Ok(Outcome::Retry {
                    reason: format!("reading {}: {}", location.file, e),
                })
            }
            Err(e) => {
                warn!("SERP {} has unreadable archived content: {}", serp.id, e);
                return Ok(Outcome::GiveUp {
                    reason: e.to_string(),
                });
            }
        };

        self.extract(&chain, &serp, &record)
    }
}
