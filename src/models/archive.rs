//! Archives and providers: the two seed entities sources are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Entity;
use crate::cdx::CdxDialect;
use crate::docstore::Index;
use crate::ids::{derive_id, IdNamespace};

/// One archival service with its CDX and Memento endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cdx_api_url: String,
    pub memento_api_url: String,
    /// How the CDX endpoint pages its results.
    #[serde(default)]
    pub cdx_dialect: CdxDialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    pub last_modified: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub should_build_sources: bool,
    #[serde(default)]
    pub last_built_sources: Option<DateTime<Utc>>,
}

impl Archive {
    pub fn new(
        name: impl Into<String>,
        cdx_api_url: impl Into<String>,
        memento_api_url: impl Into<String>,
    ) -> Self {
        let cdx_api_url = cdx_api_url.into();
        let memento_api_url = memento_api_url.into();
        Self {
            id: Self::derive_id(&cdx_api_url, &memento_api_url),
            name: name.into(),
            description: None,
            cdx_api_url,
            memento_api_url,
            cdx_dialect: CdxDialect::default(),
            priority: None,
            last_modified: Utc::now(),
            should_build_sources: true,
            last_built_sources: None,
        }
    }

    pub fn derive_id(cdx_api_url: &str, memento_api_url: &str) -> Uuid {
        derive_id(IdNamespace::Archive, &[cdx_api_url, memento_api_url])
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// The snapshot embedded in derived documents.
    pub fn to_ref(&self) -> ArchiveRef {
        ArchiveRef {
            id: self.id,
            cdx_api_url: self.cdx_api_url.clone(),
            memento_api_url: self.memento_api_url.clone(),
            cdx_dialect: self.cdx_dialect,
            priority: self.priority,
        }
    }
}

impl Entity for Archive {
    const INDEX: Index = Index::Archives;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// A searchable website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_reason: Option<String>,
    pub domains: Vec<String>,
    pub url_path_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    pub last_modified: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub should_build_sources: bool,
    #[serde(default)]
    pub last_built_sources: Option<DateTime<Utc>>,
}

impl Provider {
    pub fn new(name: impl Into<String>, domains: Vec<String>, url_path_prefixes: Vec<String>) -> Self {
        let name = name.into();
        Self {
            id: Self::derive_id(&name),
            name,
            description: None,
            exclusion_reason: None,
            domains,
            url_path_prefixes,
            priority: None,
            last_modified: Utc::now(),
            should_build_sources: true,
            last_built_sources: None,
        }
    }

    pub fn derive_id(name: &str) -> Uuid {
        derive_id(IdNamespace::Provider, &[name])
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_excluded(&self) -> bool {
        self.exclusion_reason.is_some()
    }

    /// Every (domain, prefix) pair this provider is crawled under.
    pub fn domain_prefixes(&self) -> Vec<(String, String)> {
        let prefixes: Vec<&str> = if self.url_path_prefixes.is_empty() {
            vec![""]
        } else {
            self.url_path_prefixes.iter().map(String::as_str).collect()
        };
        self.domains
            .iter()
            .flat_map(|d| prefixes.iter().map(move |p| (d.clone(), (*p).to_string())))
            .collect()
    }
}

impl Entity for Provider {
    const INDEX: Index = Index::Providers;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Archive snapshot embedded in sources, captures and SERPs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub id: Uuid,
    pub cdx_api_url: String,
    pub memento_api_url: String,
    #[serde(default)]
    pub cdx_dialect: CdxDialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
}

/// Provider snapshot for one (domain, prefix) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub id: Uuid,
    pub domain: String,
    pub url_path_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
}

impl ProviderRef {
    pub fn from_provider(provider: &Provider, domain: &str, url_path_prefix: &str) -> Self {
        Self {
            id: provider.id,
            domain: domain.to_string(),
            url_path_prefix: url_path_prefix.to_string(),
            priority: provider.priority,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_id_depends_only_on_endpoints() {
        let a = Archive::new("Wayback", "https://web.archive.org/cdx/search/cdx", "https://web.archive.org/web");
        let b = Archive::new("Renamed", "https://web.archive.org/cdx/search/cdx", "https://web.archive.org/web");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn domain_prefixes_cross_product() {
        let provider = Provider::new(
            "Example",
            vec!["example.com".into(), "example.org".into()],
            vec!["/search".into(), "/s".into()],
        );
        let pairs = provider.domain_prefixes();
        assert_eq!(pairs.len(), 4);
        assert!(pairs.contains(&("example.org".to_string(), "/s".to_string())));
    }

    #[test]
    fn domain_prefixes_without_prefixes_use_root() {
        let provider = Provider::new("Example", vec!["example.com".into()], vec![]);
        assert_eq!(provider.domain_prefixes(), vec![("example.com".to_string(), String::new())]);
    }

    #[test]
    fn missing_build_flag_defaults_to_due() {
        let json = serde_json::json!({
            "id": Uuid::nil(),
            "name": "x",
            "cdx_api_url": "c",
            "memento_api_url": "m",
            "last_modified": "2024-01-01T00:00:00Z"
        });
        let archive: Archive = serde_json::from_value(json).unwrap();
        assert!(archive.should_build_sources);
        assert!(archive.last_built_sources.is_none());
    }
}
