//! In-process document store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::merge::apply_action;
use super::{
    BulkAction, BulkItem, BulkOutcome, BulkResponse, DocumentStore, Index, Query, Ranking, ScanId,
    ScanRegistry, StoreError, StoredDocument,
};

type Collection = HashMap<String, (Value, u64)>;

/// Document store held entirely in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<Index, Collection>>,
    scans: ScanRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, index: Index, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let indices = self.indices.read().await;
        Ok(indices
            .get(&index)
            .and_then(|c| c.get(id))
            .map(|(source, seq_no)| StoredDocument {
                index,
                id: id.to_string(),
                seq_no: *seq_no,
                source: source.clone(),
            }))
    }

    async fn count(&self, index: Index, query: &Query) -> Result<u64, StoreError> {
        let indices = self.indices.read().await;
        Ok(indices
            .get(&index)
            .map(|c| c.values().filter(|(doc, _)| query.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn open_scan(
        &self,
        index: Index,
        query: &Query,
        ranking: &Ranking,
        keep_alive: Duration,
    ) -> Result<ScanId, StoreError> {
        let ids = {
            let indices = self.indices.read().await;
            match indices.get(&index) {
                Some(collection) => ranking.order(
                    collection
                        .iter()
                        .filter(|(_, (doc, _))| query.matches(doc))
                        .map(|(id, (doc, _))| (id.as_str(), doc)),
                ),
                None => Vec::new(),
            }
        };
        Ok(self.scans.open(index, query.clone(), ids, keep_alive).await)
    }

    async fn next_page(&self, scan: &ScanId, size: usize) -> Result<Vec<StoredDocument>, StoreError> {
        let mut page = Vec::with_capacity(size);
        while page.len() < size {
            let batch = self.scans.take(scan, size - page.len()).await?;
            if batch.ids.is_empty() {
                break;
            }
            for id in &batch.ids {
                // Documents updated since the scan opened may no longer match.
                if let Some(doc) = self.get(batch.index, id).await? {
                    if batch.query.matches(&doc.source) {
                        page.push(doc);
                    }
                }
            }
        }
        Ok(page)
    }

    async fn close_scan(&self, scan: &ScanId) -> Result<(), StoreError> {
        self.scans.close(scan).await;
        Ok(())
    }

    async fn bulk(&self, actions: Vec<BulkAction>) -> Result<BulkResponse, StoreError> {
        let mut indices = self.indices.write().await;
        let mut response = BulkResponse::default();

        for action in actions {
            let index = action.index();
            let id = action.id().to_string();
            let collection = indices.entry(index).or_default();
            let existing = collection.get(&id);

            let outcome = match apply_action(existing.map(|(doc, _)| doc), &action) {
                Err(failure) => BulkOutcome::Failed(failure),
                Ok(None) => BulkOutcome::Noop,
                Ok(Some(document)) => {
                    let created = existing.is_none();
                    let seq_no = existing.map(|(_, s)| s + 1).unwrap_or(0);
                    collection.insert(id.clone(), (document, seq_no));
                    if created {
                        BulkOutcome::Created
                    } else {
                        BulkOutcome::Updated
                    }
                }
            };
            response.items.push(BulkItem { index, id, outcome });
        }

        Ok(response)
    }
}
