//! Retrieval order for scans: saturating rank features plus seeded jitter.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::query::lookup;

/// `weight * x / (x + pivot)` for a positive numeric field.
#[derive(Debug, Clone, PartialEq)]
pub struct RankFeature {
    pub field: String,
    pub pivot: f64,
    pub weight: f64,
}

impl RankFeature {
    pub fn saturation(field: impl Into<String>, pivot: f64) -> Self {
        Self {
            field: field.into(),
            pivot,
            weight: 1.0,
        }
    }

    pub fn score(&self, doc: &Value) -> f64 {
        match lookup(doc, &self.field).and_then(Value::as_f64) {
            Some(x) if x > 0.0 && self.pivot > 0.0 => self.weight * x / (x + self.pivot),
            _ => 0.0,
        }
    }
}

/// Deterministic per-document jitter in `[0, 1)` scaled by `weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomScore {
    pub seed: u64,
    pub weight: f64,
}

impl RandomScore {
    pub fn score(&self, id: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let mut rng = fastrand::Rng::with_seed(u64::from_le_bytes(bytes));
        self.weight * rng.f64()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub features: Vec<RankFeature>,
    pub random: Option<RandomScore>,
}

impl Ranking {
    pub fn with_feature(mut self, feature: RankFeature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_random(mut self, seed: u64, weight: f64) -> Self {
        self.random = Some(RandomScore { seed, weight });
        self
    }

    pub fn score(&self, id: &str, doc: &Value) -> f64 {
        let features: f64 = self.features.iter().map(|f| f.score(doc)).sum();
        let jitter = self.random.as_ref().map(|r| r.score(id)).unwrap_or(0.0);
        features + jitter
    }

    /// Sort `(id, doc)` pairs by descending score, ties broken by id.
    pub fn order<'a>(&self, docs: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Vec<String> {
        let scored = docs
            .into_iter()
            .map(|(id, doc)| (self.score(id, doc), id.to_string()))
            .collect();
        self.sort_scored(scored)
    }

    /// Ids of pre-scored documents in retrieval order.
    pub fn sort_scored(&self, mut scored: Vec<(f64, String)>) -> Vec<String> {
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, id)| id).collect()
    }
}
