//! URL parsing stages: the query that makes a capture a SERP, and the
//! page number and result offset of a SERP.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::serp_preserved_keys;
use crate::docstore::BulkAction;
use crate::extraction::{parse_integer, ParserCache};
use crate::models::{Capture, ParserTarget, Serp};
use crate::pipeline::{EntityProcessor, Outcome, PipelineError};

/// Turns captures whose URL carries a query into SERPs.
pub struct UrlQueryParser {
    parsers: Arc<ParserCache>,
}

impl UrlQueryParser {
    pub fn new(parsers: Arc<ParserCache>) -> Self {
        Self { parsers }
    }
}

#[async_trait]
impl EntityProcessor for UrlQueryParser {
    type Entity = Capture;

    async fn process(&self, capture: Capture) -> Result<Outcome, PipelineError> {
        let chain = self
            .parsers
            .chain(ParserTarget::UrlQuery, capture.provider.id)
            .await?;

        let Some(found) = chain.parse_url(&capture.url) else {
            debug!("No query in {}", capture.url);
            return Ok(Outcome::empty());
        };

        let serp = Serp::from_capture(&capture, found.value, &found.parser_id);
        Ok(Outcome::Done {
            writes: vec![BulkAction::merge_entity(&serp, serp_preserved_keys())?],
            fields: None,
            status_id: Some(found.parser_id),
        })
    }
}

/// Extracts an integer field (`url_page` or `url_offset`) from a SERP URL.
pub struct UrlNumberParser {
    parsers: Arc<ParserCache>,
    target: ParserTarget,
}

impl UrlNumberParser {
    pub fn new(parsers: Arc<ParserCache>, target: ParserTarget) -> Self {
        Self { parsers, target }
    }
}

#[async_trait]
impl EntityProcessor for UrlNumberParser {
    type Entity = Serp;

    async fn process(&self, serp: Serp) -> Result<Outcome, PipelineError> {
        let chain = self.parsers.chain(self.target, serp.provider.id).await?;

        let Some(found) = chain.parse_url(&serp.capture.url) else {
            return Ok(Outcome::empty());
        };

        let fields = match parse_integer(&found.value) {
            Ok(number) => {
                let mut fields = serde_json::Map::new();
                fields.insert(self.target.as_str().to_string(), json!(number));
                Some(Value::Object(fields))
            }
            Err(e) => {
                warn!(
                    "Discarding {} {:?} of SERP {}: {}",
                    self.target.as_str(),
                    found.value,
                    serp.id,
                    e
                );
                None
            }
        };

        Ok(Outcome::Done {
            writes: Vec::new(),
            fields,
            status_id: Some(found.parser_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cdx::CaptureRecord;
    use crate::docstore::{DocumentStore, Index, MemoryStore};
    use crate::models::{Archive, ParserRecord, ParserType, Provider};
    use chrono::Utc;

    fn capture(url: &str) -> Capture {
        let archive = Archive::new("a", "https://a/cdx", "https://a/web");
        let provider = Provider::new("p", vec!["search.example".into()], vec![]);
        let source = crate::models::Source::new(&archive, &provider, "search.example", "");
        Capture::from_record(
            &source.archive,
            &source.provider,
            CaptureRecord {
                url: url.to_string(),
                url_key: "example,search)/".into(),
                timestamp: Utc::now(),
                status_code: 200,
                digest: "D".into(),
                mimetype: Some("text/html".into()),
                filename: None,
                offset: None,
                length: None,
                flags: Vec::new(),
                collection: None,
                source: None,
                source_collection: None,
            },
        )
    }

    async fn cache_with(records: Vec<ParserRecord>) -> Arc<ParserCache> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let actions = records
            .iter()
            .map(|r| BulkAction::index_entity(r).unwrap())
            .collect();
        store.bulk(actions).await.unwrap();
        Arc::new(ParserCache::new(store, Duration::from_secs(60)))
    }

    fn query_param(target: ParserTarget, name: &str) -> ParserRecord {
        let mut record = ParserRecord::new(target, ParserType::QueryParameter);
        record.parameter = Some(name.to_string());
        record.with_derived_id()
    }

    #[tokio::test]
    async fn query_hit_creates_serp_with_capture_id() {
        let parser = query_param(ParserTarget::UrlQuery, "q");
        let parser_id = parser.id.to_string();
        let stage = UrlQueryParser::new(cache_with(vec![parser]).await);
        let capture = capture("https://search.example/search?q=rust+lang&p=2");

        let outcome = stage.process(capture.clone()).await.unwrap();
        let Outcome::Done { writes, status_id, .. } = outcome else {
            panic!("expected done");
        };
        assert_eq!(status_id.as_deref(), Some(parser_id.as_str()));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].index(), Index::Serps);
        assert_eq!(writes[0].id(), capture.id.to_string());
        let BulkAction::Merge { document, .. } = &writes[0] else {
            panic!("expected merge");
        };
        assert_eq!(document["url_query"], "rust lang");
    }

    #[tokio::test]
    async fn exhausted_chain_is_done_without_serp() {
        let stage = UrlQueryParser::new(cache_with(vec![query_param(ParserTarget::UrlQuery, "q")]).await);
        let outcome = stage.process(capture("https://search.example/about")).await.unwrap();
        assert_eq!(outcome, Outcome::empty());
    }

    #[tokio::test]
    async fn page_number_overflow_is_discarded() {
        let parser = query_param(ParserTarget::UrlPage, "p");
        let stage = UrlNumberParser::new(cache_with(vec![parser]).await, ParserTarget::UrlPage);

        let serp = |url: &str| Serp::from_capture(&capture(url), "q".into(), "x");

        let Outcome::Done { fields, .. } = stage
            .process(serp("https://search.example/search?q=a&p=3"))
            .await
            .unwrap()
        else {
            panic!("expected done");
        };
        assert_eq!(fields.unwrap()["url_page"], 3);

        let Outcome::Done { fields, status_id, .. } = stage
            .process(serp("https://search.example/search?q=a&p=99999999999999999999"))
            .await
            .unwrap()
        else {
            panic!("expected done");
        };
        assert!(fields.is_none());
        assert!(status_id.is_some());
    }
}
