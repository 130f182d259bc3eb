//! Results extracted from a SERP: snippets and direct answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{ArchiveRef, CaptureRef, Entity, ProviderRef, Serp, SerpRef};
use crate::docstore::Index;
use crate::ids::{derive_id, IdNamespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Snippet,
    DirectAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: Uuid,
    pub last_modified: DateTime<Utc>,
    pub kind: ResultKind,
    pub archive: ArchiveRef,
    pub provider: ProviderRef,
    pub capture: CaptureRef,
    pub serp: SerpRef,
    pub parser_id: String,
    pub rank: usize,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ResultRecord {
    pub fn derive_id(serp_id: Uuid, parser_id: &str, content: &str, rank: usize) -> Uuid {
        derive_id(
            IdNamespace::Result,
            &[
                serp_id.to_string(),
                parser_id.to_string(),
                content_hash(content),
                rank.to_string(),
            ],
        )
    }

    pub fn new(
        kind: ResultKind,
        serp: &Serp,
        parser_id: &str,
        rank: usize,
        content: String,
    ) -> Self {
        Self {
            id: Self::derive_id(serp.id, parser_id, &content, rank),
            last_modified: Utc::now(),
            kind,
            archive: serp.archive.clone(),
            provider: serp.provider.clone(),
            capture: serp.capture.clone(),
            serp: serp.to_ref(),
            parser_id: parser_id.to_string(),
            rank,
            content,
            url: None,
            title: None,
            text: None,
        }
    }
}

impl Entity for ResultRecord {
    const INDEX: Index = Index::Results;

    fn id(&self) -> Uuid {
        self.id
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Hex SHA-256 of extracted content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_changes_with_rank_and_content() {
        let serp = Uuid::new_v4();
        let a = ResultRecord::derive_id(serp, "p", "<li>a</li>", 0);
        assert_eq!(a, ResultRecord::derive_id(serp, "p", "<li>a</li>", 0));
        assert_ne!(a, ResultRecord::derive_id(serp, "p", "<li>a</li>", 1));
        assert_ne!(a, ResultRecord::derive_id(serp, "p", "<li>b</li>", 0));
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
