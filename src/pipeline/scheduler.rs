//! Incremental stage scheduling.
//!
//! A stage selects the entities of one index whose status says they are
//! due, lets an [`EntityProcessor`] derive documents from each, and writes
//! the derived documents together with one status update per entity in a
//! single bulk request. An entity is due when its status is absent, its
//! `should_*` flag is not `false`, or its `last_*` timestamp is older than
//! the entity's `last_modified`.
//!
//! Transient failures write nothing, so the entity stays due for the next
//! run. Permanent failures are marked done without a result.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::stage::{ChunkResult, PipelineEvent, PipelineStage};
use super::PipelineError;
use crate::docstore::merge::deep_merge;
use crate::docstore::{
    BulkAction, DocumentStore, FailureKind, Index, Query, Ranking, ScanId, StoreError,
    StoredDocument,
};
use crate::models::{Entity, StatusPaths};

/// What processing one entity produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Write `writes`, then mark the entity done. `fields` are merged into
    /// the entity alongside the status; `status_id` names the parser or
    /// downloader that produced the result.
    Done {
        writes: Vec<BulkAction>,
        fields: Option<Value>,
        status_id: Option<String>,
    },
    /// Could succeed later. Nothing is written.
    Retry { reason: String },
    /// Will never succeed. Marked done so it is not retried forever.
    GiveUp { reason: String },
}

impl Outcome {
    /// Done with nothing derived, e.g. an exhausted parser chain.
    pub fn empty() -> Self {
        Self::Done {
            writes: Vec::new(),
            fields: None,
            status_id: None,
        }
    }
}

/// Stage logic for one entity type.
#[async_trait]
pub trait EntityProcessor: Send + Sync {
    type Entity: Entity;

    /// Process one due entity. An `Err` is a configuration or storage
    /// failure and aborts the run.
    async fn process(&self, entity: Self::Entity) -> Result<Outcome, PipelineError>;
}

/// Which entities a stage works on and in what order.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: &'static str,
    pub index: Index,
    pub status: StatusPaths,
    /// Additional stage-specific selection, e.g. only HTTP 200 captures.
    pub filter: Option<Query>,
    pub ranking: Ranking,
    pub keep_alive: Duration,
    /// Entities processed concurrently within a chunk.
    pub concurrency: usize,
}

impl StageSpec {
    pub fn new(name: &'static str, index: Index, status: StatusPaths) -> Self {
        Self {
            name,
            index,
            status,
            filter: None,
            ranking: Ranking::default(),
            keep_alive: Duration::from_secs(300),
            concurrency: 1,
        }
    }

    pub fn with_filter(mut self, filter: Query) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_ranking(mut self, ranking: Ranking) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Staleness predicate plus the stage filter.
    pub fn due_query(&self) -> Query {
        let stale = Query::or(vec![
            Query::not(Query::exists(self.status_path_root())),
            Query::not(Query::term(self.status.should_path(), false)),
            Query::is_before(self.status.last_path(), "last_modified"),
        ]);
        match &self.filter {
            Some(filter) => Query::and(vec![filter.clone(), stale]),
            None => stale,
        }
    }

    fn status_path_root(&self) -> String {
        match self.status.field {
            Some(field) => field.to_string(),
            None => self.status.should_path(),
        }
    }

    /// Partial update marking the entity done.
    fn status_update(&self, id: &str, fields: Option<Value>, status_id: Option<&str>) -> BulkAction {
        let mut partial = fields.unwrap_or_else(|| Value::Object(Default::default()));
        deep_merge(&mut partial, &self.status.done_partial(status_id, Utc::now()));
        BulkAction::Update {
            index: self.index,
            id: id.to_string(),
            partial,
        }
    }
}

/// A [`PipelineStage`] that runs an [`EntityProcessor`] over due entities.
pub struct IncrementalStage<P: EntityProcessor> {
    spec: StageSpec,
    store: Arc<dyn DocumentStore>,
    processor: P,
    scan: Mutex<Option<ScanId>>,
    entity: PhantomData<fn() -> P::Entity>,
}

impl<P: EntityProcessor> IncrementalStage<P> {
    pub fn new(spec: StageSpec, store: Arc<dyn DocumentStore>, processor: P) -> Self {
        Self {
            spec,
            store,
            processor,
            scan: Mutex::new(None),
            entity: PhantomData,
        }
    }

    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    /// Next page of due entities, opening a scan on first use. Returns
    /// `None` when the scan is exhausted or has expired.
    async fn next_page(&self, size: usize) -> Result<Option<Vec<StoredDocument>>, PipelineError> {
        let mut scan = self.scan.lock().await;
        let scan_id = match scan.as_ref() {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .store
                    .open_scan(self.spec.index, &self.spec.due_query(), &self.spec.ranking, self.spec.keep_alive)
                    .await?;
                *scan = Some(id.clone());
                id
            }
        };

        match self.store.next_page(&scan_id, size).await {
            Ok(page) if page.is_empty() => {
                self.store.close_scan(&scan_id).await?;
                *scan = None;
                Ok(None)
            }
            Ok(page) => Ok(Some(page)),
            Err(StoreError::ScanExpired(id)) => {
                warn!(
                    "[{}] scan {} expired, ending this run early; remaining work is picked up next run",
                    self.spec.name, id
                );
                *scan = None;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn process_document(&self, doc: StoredDocument) -> (String, Result<Outcome, PipelineError>) {
        let id = doc.id.clone();
        let entity: P::Entity = match doc.decode() {
            Ok(entity) => entity,
            Err(e) => {
                warn!("[{}] skipping undecodable {}/{}: {}", self.spec.name, doc.index, id, e);
                return (
                    id,
                    Ok(Outcome::Retry {
                        reason: format!("undecodable document: {}", e),
                    }),
                );
            }
        };
        let outcome = self.processor.process(entity).await;
        (id, outcome)
    }
}

/// Send one bulk request. Items that lost every optimistic-concurrency
/// retry are logged and dropped; the stage picks them up again next run.
/// Any other item failure aborts.
pub async fn write_bulk(
    store: &dyn DocumentStore,
    stage: &str,
    actions: Vec<BulkAction>,
) -> Result<(), PipelineError> {
    if actions.is_empty() {
        return Ok(());
    }
    let response = store.bulk(actions).await?;
    for (item, failure) in response.failures() {
        match failure.kind {
            FailureKind::Conflict => warn!(
                "[{}] gave up on {}/{} after version conflicts: {}",
                stage, item.index, item.id, failure.reason
            ),
            _ => {
                return Err(PipelineError::BulkItem {
                    index: item.index,
                    id: item.id.clone(),
                    reason: failure.reason.clone(),
                })
            }
        }
    }
    debug!("[{}] bulk {:?}", stage, response.summary());
    Ok(())
}

#[async_trait]
impl<P: EntityProcessor> PipelineStage for IncrementalStage<P> {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn count(&self) -> Result<u64, PipelineError> {
        Ok(self.store.count(self.spec.index, &self.spec.due_query()).await?)
    }

    async fn run_chunk(
        &self,
        chunk_size: usize,
        remaining_limit: usize,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<ChunkResult, PipelineError> {
        let size = if remaining_limit > 0 {
            chunk_size.min(remaining_limit)
        } else {
            chunk_size
        };

        let Some(page) = self.next_page(size).await? else {
            return Ok(ChunkResult::default());
        };
        let fetched = page.len();

        let results: Vec<_> = stream::iter(page)
            .map(|doc| self.process_document(doc))
            .buffered(self.spec.concurrency)
            .collect()
            .await;

        let mut result = ChunkResult::default();
        let mut actions = Vec::new();
        for (id, outcome) in results {
            match outcome? {
                Outcome::Done {
                    writes,
                    fields,
                    status_id,
                } => {
                    actions.extend(writes);
                    actions.push(self.spec.status_update(&id, fields, status_id.as_deref()));
                    result.succeeded += 1;
                    let _ = event_tx
                        .send(PipelineEvent::ItemCompleted {
                            stage: self.spec.name.to_string(),
                            item_id: id,
                            detail: status_id,
                        })
                        .await;
                }
                Outcome::GiveUp { reason } => {
                    warn!("[{}] {} will not be retried: {}", self.spec.name, id, reason);
                    actions.push(self.spec.status_update(&id, None, None));
                    result.skipped += 1;
                    let _ = event_tx
                        .send(PipelineEvent::ItemSkipped {
                            stage: self.spec.name.to_string(),
                            item_id: id,
                        })
                        .await;
                }
                Outcome::Retry { reason } => {
                    debug!("[{}] {} left pending: {}", self.spec.name, id, reason);
                    result.failed += 1;
                    let _ = event_tx
                        .send(PipelineEvent::ItemFailed {
                            stage: self.spec.name.to_string(),
                            item_id: id,
                            error: reason,
                        })
                        .await;
                }
            }
        }

        write_bulk(self.store.as_ref(), self.spec.name, actions).await?;
        result.has_more = fetched == size;
        Ok(result)
    }

    async fn finish(&self) -> Result<(), PipelineError> {
        if let Some(scan) = self.scan.lock().await.take() {
            self.store.close_scan(&scan).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::MemoryStore;
    use crate::models::{Archive, Parse};
    use serde_json::json;

    #[test]
    fn due_query_matches_staleness_rules() {
        let spec = StageSpec::new(
            "parse-url-page",
            Index::Serps,
            StatusPaths::embedded::<Parse>("url_page_parser"),
        );
        let due = spec.due_query();

        assert!(due.matches(&json!({"last_modified": "2024-01-02T00:00:00Z"})));
        assert!(due.matches(&json!({"last_modified": "2024-01-02T00:00:00Z",
            "url_page_parser": {"should_parse": true}})));
        assert!(!due.matches(&json!({"last_modified": "2024-01-02T00:00:00Z",
            "url_page_parser": {"should_parse": false, "last_parsed": "2024-01-03T00:00:00Z"}})));
        assert!(due.matches(&json!({"last_modified": "2024-01-04T00:00:00Z",
            "url_page_parser": {"should_parse": false, "last_parsed": "2024-01-03T00:00:00Z"}})));
    }

    struct Echo;

    #[async_trait]
    impl EntityProcessor for Echo {
        type Entity = Archive;

        async fn process(&self, archive: Archive) -> Result<Outcome, PipelineError> {
            if archive.name == "flaky" {
                return Ok(Outcome::Retry {
                    reason: "timeout".into(),
                });
            }
            Ok(Outcome::empty())
        }
    }

    #[tokio::test]
    async fn transient_failures_stay_due() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let archives = [
            Archive::new("ok", "https://a/cdx", "https://a/web"),
            Archive::new("flaky", "https://b/cdx", "https://b/web"),
        ];
        let actions = archives
            .iter()
            .map(|a| BulkAction::index_entity(a).unwrap())
            .collect();
        store.bulk(actions).await.unwrap();

        let spec = StageSpec::new(
            "build-sources",
            Index::Archives,
            StatusPaths::top_level("should_build_sources", "last_built_sources"),
        );
        let stage = IncrementalStage::new(spec, store.clone(), Echo);
        assert_eq!(stage.count().await.unwrap(), 2);

        let (tx, _rx) = mpsc::channel(16);
        let result = stage.run_chunk(10, 0, &tx).await.unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.has_more);
        stage.finish().await.unwrap();

        assert_eq!(stage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_scan_ends_run_without_error() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let actions = ["a", "b"]
            .iter()
            .map(|n| {
                let archive = Archive::new(*n, format!("https://{}/cdx", n), format!("https://{}/web", n));
                BulkAction::index_entity(&archive).unwrap()
            })
            .collect();
        store.bulk(actions).await.unwrap();

        let spec = StageSpec::new(
            "build-sources",
            Index::Archives,
            StatusPaths::top_level("should_build_sources", "last_built_sources"),
        )
        .with_keep_alive(Duration::from_millis(20));
        let stage = IncrementalStage::new(spec, store.clone(), Echo);

        let (tx, _rx) = mpsc::channel(16);
        assert_eq!(stage.run_chunk(1, 0, &tx).await.unwrap().succeeded, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = stage.run_chunk(1, 0, &tx).await.unwrap();
        assert_eq!(result.total(), 0);
        assert!(!result.has_more);
        assert_eq!(stage.count().await.unwrap(), 1);
    }
}
