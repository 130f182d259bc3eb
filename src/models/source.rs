//! Sources: one archive crossed with one provider (domain, prefix) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Archive, ArchiveRef, Entity, Provider, ProviderRef};
use crate::docstore::Index;
use crate::ids::{derive_id, IdNamespace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub archive: ArchiveRef,
    pub provider: ProviderRef,
    pub last_modified: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub should_fetch_captures: bool,
    #[serde(default)]
    pub last_fetched_captures: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(archive: &Archive, provider: &Provider, domain: &str, url_path_prefix: &str) -> Self {
        Self {
            id: Self::derive_id(
                &archive.cdx_api_url,
                &archive.memento_api_url,
                domain,
                url_path_prefix,
            ),
            archive: archive.to_ref(),
            provider: ProviderRef::from_provider(provider, domain, url_path_prefix),
            last_modified: Utc::now(),
            should_fetch_captures: true,
            last_fetched_captures: None,
        }
    }

    pub fn derive_id(
        cdx_api_url: &str,
        memento_api_url: &str,
        domain: &str,
        url_path_prefix: &str,
    ) -> Uuid {
        derive_id(
            IdNamespace::Source,
            &[cdx_api_url, memento_api_url, domain, url_path_prefix],
        )
    }

    /// URL pattern handed to the capture index (`matchType=prefix`).
    pub fn capture_url_prefix(&self) -> String {
        let prefix = self.provider.url_path_prefix.trim_start_matches('/');
        if prefix.is_empty() {
            format!("{}/", self.provider.domain)
        } else {
            format!("{}/{}", self.provider.domain, prefix)
        }
    }

    /// All sources of an archive/provider pair.
    pub fn cross(archive: &Archive, provider: &Provider) -> Vec<Source> {
        if provider.is_excluded() {
            return Vec::new();
        }
        provider
            .domain_prefixes()
            .iter()
            .map(|(domain, prefix)| Source::new(archive, provider, domain, prefix))
            .collect()
    }
}

impl Entity for Source {
    const INDEX: Index = Index::Sources;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

fn default_true() -> bool {
    true
}
