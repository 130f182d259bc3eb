//! Source fan-out: every archive crossed with every provider.
//!
//! Both directions exist so that adding an archive or a provider only
//! touches the sources of the new entity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{status_paths, StageName};
use crate::docstore::{search_all, BulkAction, DocumentStore, Query};
use crate::models::{Archive, Provider, Source};
use crate::pipeline::{EntityProcessor, Outcome, PipelineError};

fn source_writes(sources: Vec<Source>) -> Result<Vec<BulkAction>, PipelineError> {
    let preserve = status_paths(StageName::FetchCaptures).preserved_keys();
    sources
        .iter()
        .map(|source| BulkAction::merge_entity(source, preserve.clone()).map_err(PipelineError::from))
        .collect()
}

fn done(writes: Vec<BulkAction>) -> Outcome {
    Outcome::Done {
        writes,
        fields: None,
        status_id: None,
    }
}

/// Builds the sources of a due archive against all providers.
pub struct ArchiveSourceBuilder {
    store: Arc<dyn DocumentStore>,
    keep_alive: Duration,
}

impl ArchiveSourceBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, keep_alive: Duration) -> Self {
        Self { store, keep_alive }
    }
}

#[async_trait]
impl EntityProcessor for ArchiveSourceBuilder {
    type Entity = Archive;

    async fn process(&self, archive: Archive) -> Result<Outcome, PipelineError> {
        let providers: Vec<Provider> =
            search_all(self.store.as_ref(), &Query::MatchAll, self.keep_alive).await?;
        let sources: Vec<Source> = providers
            .iter()
            .flat_map(|provider| Source::cross(&archive, provider))
            .collect();
        debug!("Archive {} yields {} source(s)", archive.name, sources.len());
        Ok(done(source_writes(sources)?))
    }
}

/// Builds the sources of a due provider against all archives.
pub struct ProviderSourceBuilder {
    store: Arc<dyn DocumentStore>,
    keep_alive: Duration,
}

impl ProviderSourceBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, keep_alive: Duration) -> Self {
        Self { store, keep_alive }
    }
}

#[async_trait]
impl EntityProcessor for ProviderSourceBuilder {
    type Entity = Provider;

    async fn process(&self, provider: Provider) -> Result<Outcome, PipelineError> {
        if let Some(ref reason) = provider.exclusion_reason {
            debug!("Provider {} is excluded: {}", provider.name, reason);
            return Ok(Outcome::empty());
        }
        let archives: Vec<Archive> =
            search_all(self.store.as_ref(), &Query::MatchAll, self.keep_alive).await?;
        let sources: Vec<Source> = archives
            .iter()
            .flat_map(|archive| Source::cross(archive, &provider))
            .collect();
        debug!("Provider {} yields {} source(s)", provider.name, sources.len());
        Ok(done(source_writes(sources)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::{Index, MemoryStore};

    async fn seeded() -> Arc<dyn DocumentStore> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut excluded = Provider::new("excluded", vec!["spam.example".into()], vec![]);
        excluded.exclusion_reason = Some("not a search engine".into());
        let actions = vec![
            BulkAction::index_entity(&Archive::new("a", "https://a/cdx", "https://a/web")).unwrap(),
            BulkAction::index_entity(&Provider::new(
                "search",
                vec!["search.example".into(), "www.search.example".into()],
                vec!["/search".into()],
            ))
            .unwrap(),
            BulkAction::index_entity(&excluded).unwrap(),
        ];
        store.bulk(actions).await.unwrap();
        store
    }

    #[tokio::test]
    async fn archive_crosses_every_included_provider() {
        let store = seeded().await;
        let builder = ArchiveSourceBuilder::new(store.clone(), Duration::from_secs(60));
        let archive = Archive::new("a", "https://a/cdx", "https://a/web");

        let Outcome::Done { writes, .. } = builder.process(archive).await.unwrap() else {
            panic!("expected done");
        };
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.index() == Index::Sources));
    }

    #[tokio::test]
    async fn excluded_provider_builds_nothing() {
        let store = seeded().await;
        let builder = ProviderSourceBuilder::new(store, Duration::from_secs(60));
        let mut provider = Provider::new("excluded", vec!["spam.example".into()], vec![]);
        provider.exclusion_reason = Some("not a search engine".into());
        assert_eq!(builder.process(provider).await.unwrap(), Outcome::empty());
    }

    #[tokio::test]
    async fn source_ids_agree_from_both_sides() {
        let store = seeded().await;
        let archive = Archive::new("a", "https://a/cdx", "https://a/web");
        let provider = Provider::new(
            "search",
            vec!["search.example".into(), "www.search.example".into()],
            vec!["/search".into()],
        );

        let from_archive = ArchiveSourceBuilder::new(store.clone(), Duration::from_secs(60))
            .process(archive)
            .await
            .unwrap();
        let from_provider = ProviderSourceBuilder::new(store, Duration::from_secs(60))
            .process(provider)
            .await
            .unwrap();

        let ids = |outcome: Outcome| match outcome {
            Outcome::Done { writes, .. } => {
                let mut ids: Vec<String> = writes.iter().map(|w| w.id().to_string()).collect();
                ids.sort();
                ids
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(ids(from_archive), ids(from_provider));
    }
}
