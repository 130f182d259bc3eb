//! SQLite-backed document store.
//!
//! Documents are JSON bodies keyed by `(index_name, id)` with a `seq_no`
//! column for optimistic concurrency: every write is conditional on the
//! sequence number it read, and a lost race is retried up to
//! `retry_on_conflict` times before the item is reported as a conflict.
//! Queries are pushed into SQL as JSON1 predicates where they translate,
//! and rows are read a page at a time and re-checked in process.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use diesel::dsl::{count_star, sql};
use diesel::prelude::*;
use diesel::sql_types::Bool;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde_json::Value;
use tracing::debug;

use super::merge::apply_action;
use super::schema::documents;
use super::sql_filter;
use super::{
    BulkAction, BulkFailure, BulkItem, BulkOutcome, BulkResponse, DocumentStore, FailureKind,
    Index, Query, Ranking, ScanId, ScanRegistry, StoreError, StoredDocument,
};

type AsyncSqliteConnection = SyncConnectionWrapper<SqliteConnection>;

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Rows decoded per round trip while scanning an index.
const SCAN_PAGE_ROWS: i64 = 500;

#[derive(Insertable, Debug)]
#[diesel(table_name = documents)]
struct NewDocument<'a> {
    index_name: &'a str,
    id: &'a str,
    body: &'a str,
    seq_no: i64,
}

/// Document store on a single SQLite file. A connection is opened per
/// operation; SQLite connections are cheap and this keeps the store `Sync`.
pub struct SqliteStore {
    database_url: String,
    retry_on_conflict: u32,
    scans: ScanRegistry,
}

impl SqliteStore {
    /// Open (and create if needed) the store at `path`.
    pub async fn open(path: &Path, retry_on_conflict: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Other(format!("creating {}: {}", parent.display(), e)))?;
        }
        let store = Self::new(&path.display().to_string(), retry_on_conflict);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn new(database_url: &str, retry_on_conflict: u32) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
            retry_on_conflict,
            scans: ScanRegistry::new(),
        }
    }

    async fn conn(&self) -> Result<AsyncSqliteConnection, StoreError> {
        let mut conn = AsyncSqliteConnection::establish(&self.database_url).await?;
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .execute(&mut conn)
            .await?;
        Ok(conn)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let statements = [
            "PRAGMA journal_mode = WAL",
            "CREATE TABLE IF NOT EXISTS documents (
                index_name TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                seq_no BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (index_name, id)
            )",
        ];
        for stmt in statements {
            diesel::sql_query(stmt).execute(&mut conn).await?;
        }
        Ok(())
    }

    /// Visit every document of `index` matching `query`, in id order,
    /// holding one page of bodies at a time.
    async fn for_each_match(
        &self,
        conn: &mut AsyncSqliteConnection,
        index: Index,
        query: &Query,
        mut visit: impl FnMut(String, Value) + Send,
    ) -> Result<(), StoreError> {
        let prefilter = sql_filter::prefilter(query);
        let mut after = String::new();
        loop {
            let mut page = documents::table
                .select((documents::id, documents::body))
                .into_boxed();
            page = page
                .filter(documents::index_name.eq(index.as_str()))
                .filter(documents::id.gt(after.clone()));
            if let Some(ref clause) = prefilter {
                page = page.filter(sql::<Bool>(clause));
            }
            let rows: Vec<(String, String)> = page
                .order(documents::id.asc())
                .limit(SCAN_PAGE_ROWS)
                .load(conn)
                .await?;

            let Some((last, _)) = rows.last() else {
                break;
            };
            after = last.clone();
            let full = rows.len() as i64 == SCAN_PAGE_ROWS;

            for (id, body) in rows {
                let doc: Value = serde_json::from_str(&body)?;
                if query.matches(&doc) {
                    visit(id, doc);
                }
            }
            if !full {
                break;
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        conn: &mut AsyncSqliteConnection,
        index: Index,
        id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row: Option<(String, i64)> = documents::table
            .filter(documents::index_name.eq(index.as_str()))
            .filter(documents::id.eq(id))
            .select((documents::body, documents::seq_no))
            .first(conn)
            .await
            .optional()?;
        match row {
            Some((body, seq_no)) => Ok(Some(StoredDocument {
                index,
                id: id.to_string(),
                seq_no: seq_no as u64,
                source: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    /// Apply one action with optimistic-concurrency retries.
    async fn apply_one(
        &self,
        conn: &mut AsyncSqliteConnection,
        action: &BulkAction,
    ) -> Result<BulkOutcome, StoreError> {
        let index = action.index();
        let id = action.id();

        for attempt in 0..=self.retry_on_conflict {
            let existing = self.fetch(conn, index, id).await?;
            let document = match apply_action(existing.as_ref().map(|d| &d.source), action) {
                Err(failure) => return Ok(BulkOutcome::Failed(failure)),
                Ok(None) => return Ok(BulkOutcome::Noop),
                Ok(Some(document)) => document,
            };
            let body = serde_json::to_string(&document)?;

            let (affected, outcome) = match existing {
                None => {
                    let row = NewDocument {
                        index_name: index.as_str(),
                        id,
                        body: &body,
                        seq_no: 0,
                    };
                    let n = diesel::insert_or_ignore_into(documents::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    (n, BulkOutcome::Created)
                }
                Some(stored) => {
                    let seq = stored.seq_no as i64;
                    let n = diesel::update(
                        documents::table
                            .filter(documents::index_name.eq(index.as_str()))
                            .filter(documents::id.eq(id))
                            .filter(documents::seq_no.eq(seq)),
                    )
                    .set((documents::body.eq(&body), documents::seq_no.eq(seq + 1)))
                    .execute(conn)
                    .await?;
                    (n, BulkOutcome::Updated)
                }
            };

            if affected > 0 {
                return Ok(outcome);
            }
            debug!("Version conflict on {}/{} (attempt {})", index, id, attempt + 1);
        }

        Ok(BulkOutcome::Failed(BulkFailure {
            kind: FailureKind::Conflict,
            reason: format!(
                "version conflict on {}/{} after {} retries",
                index, id, self.retry_on_conflict
            ),
        }))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, index: Index, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let mut conn = self.conn().await?;
        self.fetch(&mut conn, index, id).await
    }

    async fn count(&self, index: Index, query: &Query) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        if let Some(clause) = sql_filter::exact(query) {
            let n: i64 = documents::table
                .select(count_star())
                .filter(documents::index_name.eq(index.as_str()))
                .filter(sql::<Bool>(&clause))
                .first(&mut conn)
                .await?;
            return Ok(n as u64);
        }
        let mut n = 0u64;
        self.for_each_match(&mut conn, index, query, |_, _| n += 1).await?;
        Ok(n)
    }

    async fn open_scan(
        &self,
        index: Index,
        query: &Query,
        ranking: &Ranking,
        keep_alive: Duration,
    ) -> Result<ScanId, StoreError> {
        let mut conn = self.conn().await?;
        let mut scored = Vec::new();
        self.for_each_match(&mut conn, index, query, |id, doc| {
            scored.push((ranking.score(&id, &doc), id));
        })
        .await?;
        let ids = ranking.sort_scored(scored);
        Ok(self.scans.open(index, query.clone(), ids, keep_alive).await)
    }

    async fn next_page(&self, scan: &ScanId, size: usize) -> Result<Vec<StoredDocument>, StoreError> {
        let mut conn = self.conn().await?;
        let mut page = Vec::with_capacity(size);
        while page.len() < size {
            let batch = self.scans.take(scan, size - page.len()).await?;
            if batch.ids.is_empty() {
                break;
            }
            for id in &batch.ids {
                if let Some(doc) = self.fetch(&mut conn, batch.index, id).await? {
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
        let mut conn = self.conn().await?;
        let mut response = BulkResponse::default();
        for action in &actions {
            let outcome = self.apply_one(&mut conn, action).await?;
            response.items.push(BulkItem {
                index: action.index(),
                id: action.id().to_string(),
                outcome,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn persists_and_merges() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("docs.db"), 3).await.unwrap();

        let first = BulkAction::Merge {
            index: Index::Captures,
            id: "c1".into(),
            document: json!({"url": "u", "last_modified": "2024-01-01T00:00:00Z",
                "url_query_parser": {"should_parse": true}}),
            preserve: vec!["url_query_parser".into()],
        };
        let response = store.bulk(vec![first.clone()]).await.unwrap();
        assert_eq!(response.items[0].outcome, BulkOutcome::Created);

        store
            .bulk(vec![BulkAction::Update {
                index: Index::Captures,
                id: "c1".into(),
                partial: json!({"url_query_parser": {"should_parse": false}}),
            }])
            .await
            .unwrap();

        // Re-observing the same capture leaves the status alone.
        let response = store.bulk(vec![first]).await.unwrap();
        assert_eq!(response.items[0].outcome, BulkOutcome::Noop);

        let doc = store.get(Index::Captures, "c1").await.unwrap().unwrap();
        assert_eq!(doc.source["url_query_parser"]["should_parse"], false);
        assert_eq!(doc.seq_no, 1);
    }

    fn mixed_docs() -> Vec<BulkAction> {
        let docs = [
            ("a", json!({"tags": ["x", "y"], "p": {"should": false, "last": "2024-01-01T00:00:00Z"},
                "last_modified": "2024-01-02T00:00:00Z"})),
            ("b", json!({"tags": "x", "p": {"should": true}, "last_modified": "2024-01-01T00:00:00Z"})),
            ("c", json!({"tags": {"x": true}, "p": null, "name": "o'brien",
                "last_modified": "2024-01-01T00:00:00Z"})),
            ("d", json!({"p": {"should": false, "last": "2024-01-03T00:00:00.5Z"},
                "last_modified": "2024-01-03T00:00:00Z", "status_code": 200})),
            ("e", json!({"p": {"should": "false"}, "status_code": 200.0})),
        ];
        docs.into_iter()
            .map(|(id, document)| BulkAction::Index {
                index: Index::Serps,
                id: id.into(),
                document,
            })
            .collect()
    }

    #[tokio::test]
    async fn sql_filters_agree_with_in_process_matching() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("docs.db"), 0).await.unwrap();
        let actions = mixed_docs();
        let docs: Vec<(String, Value)> = actions
            .iter()
            .map(|a| match a {
                BulkAction::Index { id, document, .. } => (id.clone(), document.clone()),
                _ => unreachable!(),
            })
            .collect();
        store.bulk(actions).await.unwrap();

        let queries = vec![
            Query::term("tags", "x"),
            Query::not(Query::term("tags", "x")),
            Query::exists("p"),
            Query::not(Query::exists("p")),
            Query::term("p.should", false),
            Query::not(Query::term("p.should", false)),
            Query::term("name", "o'brien"),
            Query::term("p", Value::Null),
            Query::term("status_code", 200),
            Query::is_before("p.last", "last_modified"),
            Query::or(vec![
                Query::not(Query::exists("p")),
                Query::not(Query::term("p.should", false)),
                Query::is_before("p.last", "last_modified"),
            ]),
            Query::and(vec![Query::exists("last_modified"), Query::term("status_code", 200)]),
        ];
        for query in queries {
            let mut expected: Vec<&str> = docs
                .iter()
                .filter(|(_, doc)| query.matches(doc))
                .map(|(id, _)| id.as_str())
                .collect();
            expected.sort();

            let scan = store
                .open_scan(Index::Serps, &query, &Ranking::default(), Duration::from_secs(30))
                .await
                .unwrap();
            let page = store.next_page(&scan, 100).await.unwrap();
            let mut got: Vec<&str> = page.iter().map(|d| d.id.as_str()).collect();
            got.sort();

            assert_eq!(got, expected, "{:?}", query);
            assert_eq!(store.count(Index::Serps, &query).await.unwrap(), expected.len() as u64, "{:?}", query);
        }
    }

    #[tokio::test]
    async fn scans_span_several_row_pages() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("docs.db"), 0).await.unwrap();
        let total = SCAN_PAGE_ROWS as usize * 2 + 7;
        let actions = (0..total)
            .map(|i| BulkAction::Index {
                index: Index::Captures,
                id: format!("c{:05}", i),
                document: json!({"s": {"last": "2024-01-01T00:00:00Z"},
                    "last_modified": if i % 2 == 0 { "2024-02-01T00:00:00Z" } else { "2023-12-01T00:00:00Z" }}),
            })
            .collect();
        store.bulk(actions).await.unwrap();

        let query = Query::is_before("s.last", "last_modified");
        let due = (total + 1) / 2;
        assert_eq!(store.count(Index::Captures, &query).await.unwrap(), due as u64);

        let scan = store
            .open_scan(Index::Captures, &query, &Ranking::default(), Duration::from_secs(30))
            .await
            .unwrap();
        let page = store.next_page(&scan, total).await.unwrap();
        assert_eq!(page.len(), due);
        assert_eq!(page[0].id, "c00000");
        assert_eq!(page[due - 1].id, format!("c{:05}", total - 1));
    }

    #[tokio::test]
    async fn scans_in_rank_order() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("docs.db"), 0).await.unwrap();
        let actions = [("low", 1.0), ("high", 10.0), ("mid", 3.0)]
            .into_iter()
            .map(|(id, p)| BulkAction::Index {
                index: Index::Archives,
                id: id.into(),
                document: json!({"priority": p}),
            })
            .collect();
        store.bulk(actions).await.unwrap();

        let ranking = Ranking::default().with_feature(crate::docstore::RankFeature::saturation("priority", 1.0));
        let scan = store
            .open_scan(Index::Archives, &Query::MatchAll, &ranking, Duration::from_secs(30))
            .await
            .unwrap();
        let page = store.next_page(&scan, 10).await.unwrap();
        let ids: Vec<_> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert_eq!(store.count(Index::Archives, &Query::MatchAll).await.unwrap(), 3);
    }
}
