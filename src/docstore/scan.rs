//! Server-side scan contexts shared by the store backends.
//!
//! A scan snapshots the ranked id list of its matching documents when it is
//! opened. A context not touched within its keep-alive expires, and the
//! next page request reports [`StoreError::ScanExpired`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Index, Query, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanId(pub String);

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ScanState {
    index: Index,
    query: Query,
    ids: VecDeque<String>,
    keep_alive: Duration,
    last_access: Instant,
}

/// A batch of ids taken from an open scan.
pub struct ScanBatch {
    pub index: Index,
    pub query: Query,
    pub ids: Vec<String>,
}

#[derive(Default)]
pub struct ScanRegistry {
    scans: Mutex<HashMap<ScanId, ScanState>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, index: Index, query: Query, ids: Vec<String>, keep_alive: Duration) -> ScanId {
        let id = ScanId(Uuid::new_v4().to_string());
        let state = ScanState {
            index,
            query,
            ids: ids.into(),
            keep_alive,
            last_access: Instant::now(),
        };
        self.scans.lock().await.insert(id.clone(), state);
        id
    }

    /// Take up to `size` ids, refreshing the keep-alive.
    pub async fn take(&self, scan: &ScanId, size: usize) -> Result<ScanBatch, StoreError> {
        let mut scans = self.scans.lock().await;
        let state = scans
            .get_mut(scan)
            .ok_or_else(|| StoreError::UnknownScan(scan.to_string()))?;

        if state.last_access.elapsed() > state.keep_alive {
            scans.remove(scan);
            return Err(StoreError::ScanExpired(scan.to_string()));
        }

        state.last_access = Instant::now();
        let n = size.min(state.ids.len());
        let ids: Vec<String> = state.ids.drain(..n).collect();
        Ok(ScanBatch {
            index: state.index,
            query: state.query.clone(),
            ids,
        })
    }

    pub async fn close(&self, scan: &ScanId) {
        self.scans.lock().await.remove(scan);
    }

    #[cfg(test)]
    pub(crate) async fn open_count(&self) -> usize {
        self.scans.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_through_ids_in_order() {
        let registry = ScanRegistry::new();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scan = registry
            .open(Index::Captures, Query::MatchAll, ids, Duration::from_secs(60))
            .await;
        assert_eq!(registry.take(&scan, 2).await.unwrap().ids, vec!["a", "b"]);
        assert_eq!(registry.take(&scan, 2).await.unwrap().ids, vec!["c"]);
        assert!(registry.take(&scan, 2).await.unwrap().ids.is_empty());
        registry.close(&scan).await;
        assert_eq!(registry.open_count().await, 0);
    }

    #[tokio::test]
    async fn idle_scan_expires() {
        let registry = ScanRegistry::new();
        let scan = registry
            .open(Index::Captures, Query::MatchAll, vec!["a".into()], Duration::from_millis(1))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            registry.take(&scan, 1).await,
            Err(StoreError::ScanExpired(_))
        ));
        assert!(matches!(
            registry.take(&scan, 1).await,
            Err(StoreError::UnknownScan(_))
        ));
    }
}
