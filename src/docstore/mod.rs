//! Document store abstraction.
//!
//! Every stage reads and writes through [`DocumentStore`]: point reads,
//! counts, ranked scans with keep-alive contexts, and batched writes whose
//! per-item outcomes are reported individually. Two backends exist, an
//! in-process [`MemoryStore`] and a SQLite-backed [`SqliteStore`].

mod memory;
pub mod merge;
mod query;
mod ranking;
mod scan;
mod schema;
mod sql_filter;
mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;
pub use query::{compare_values, lookup, Query};
pub use ranking::{RandomScore, RankFeature, Ranking};
pub use scan::{ScanId, ScanRegistry};
pub use sqlite::SqliteStore;

use crate::models::Entity;

/// Logical document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    Archives,
    Providers,
    Sources,
    Captures,
    Serps,
    Results,
    Parsers,
}

impl Index {
    pub const ALL: [Index; 7] = [
        Index::Archives,
        Index::Providers,
        Index::Sources,
        Index::Captures,
        Index::Serps,
        Index::Results,
        Index::Parsers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archives => "archives",
            Self::Providers => "providers",
            Self::Sources => "sources",
            Self::Captures => "captures",
            Self::Serps => "serps",
            Self::Results => "results",
            Self::Parsers => "parsers",
        }
    }
}

impl std::fmt::Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scan context expired: {0}")]
    ScanExpired(String),

    #[error("Unknown scan context: {0}")]
    UnknownScan(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// A stored document with its optimistic-concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub index: Index,
    pub id: String,
    pub seq_no: u64,
    pub source: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.source.clone())?)
    }
}

/// One write in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Overwrite the document.
    Index {
        index: Index,
        id: String,
        document: Value,
    },
    /// Upsert an entity, keeping stored values of the `preserve` keys.
    Merge {
        index: Index,
        id: String,
        document: Value,
        preserve: Vec<String>,
    },
    /// Deep-merge a partial document into an existing one.
    Update {
        index: Index,
        id: String,
        partial: Value,
    },
}

impl BulkAction {
    pub fn index(&self) -> Index {
        match self {
            Self::Index { index, .. } | Self::Merge { index, .. } | Self::Update { index, .. } => *index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Merge { id, .. } | Self::Update { id, .. } => id,
        }
    }

    /// Upsert an entity, preserving the given status keys.
    pub fn merge_entity<E: Entity>(entity: &E, preserve: Vec<String>) -> Result<Self, StoreError> {
        Ok(Self::Merge {
            index: E::INDEX,
            id: entity.id().to_string(),
            document: serde_json::to_value(entity)?,
            preserve,
        })
    }

    pub fn index_entity<E: Entity>(entity: &E) -> Result<Self, StoreError> {
        Ok(Self::Index {
            index: E::INDEX,
            id: entity.id().to_string(),
            document: serde_json::to_value(entity)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Lost an optimistic-concurrency race after all retries.
    Conflict,
    NotFound,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Created,
    Updated,
    Noop,
    Failed(BulkFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub index: Index,
    pub id: String,
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn failures(&self) -> impl Iterator<Item = (&BulkItem, &BulkFailure)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            BulkOutcome::Failed(failure) => Some((item, failure)),
            _ => None,
        })
    }

    /// Counts by outcome name, for logging.
    pub fn summary(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for item in &self.items {
            let key = match item.outcome {
                BulkOutcome::Created => "created",
                BulkOutcome::Updated => "updated",
                BulkOutcome::Noop => "noop",
                BulkOutcome::Failed(_) => "failed",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

/// Storage backend used by every stage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, index: Index, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    async fn count(&self, index: Index, query: &Query) -> Result<u64, StoreError>;

    /// Open a ranked scan over the documents matching `query`.
    async fn open_scan(
        &self,
        index: Index,
        query: &Query,
        ranking: &Ranking,
        keep_alive: Duration,
    ) -> Result<ScanId, StoreError>;

    /// Next page of an open scan. An empty page means the scan is exhausted.
    async fn next_page(&self, scan: &ScanId, size: usize) -> Result<Vec<StoredDocument>, StoreError>;

    async fn close_scan(&self, scan: &ScanId) -> Result<(), StoreError>;

    /// Apply writes in order, reporting one outcome per action.
    async fn bulk(&self, actions: Vec<BulkAction>) -> Result<BulkResponse, StoreError>;
}

/// Fetch and decode a single entity.
pub async fn get_entity<E: Entity>(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<E>, StoreError> {
    match store.get(E::INDEX, id).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

/// Collect every matching entity through a scan. Meant for small indices
/// such as parsers, archives and providers.
pub async fn search_all<E: Entity>(
    store: &dyn DocumentStore,
    query: &Query,
    keep_alive: Duration,
) -> Result<Vec<E>, StoreError> {
    const PAGE: usize = 500;

    let scan = store
        .open_scan(E::INDEX, query, &Ranking::default(), keep_alive)
        .await?;
    let mut out = Vec::new();
    let result = async {
        loop {
            let page = store.next_page(&scan, PAGE).await?;
            if page.is_empty() {
                return Ok::<_, StoreError>(());
            }
            for doc in page {
                out.push(doc.decode()?);
            }
        }
    }
    .await;
    store.close_scan(&scan).await?;
    result.map(|_| out)
}
