//! Read-through cache of compiled parser chains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::chain::ParserChain;
use super::parser::CompiledParser;
use super::ParserError;
use crate::docstore::{search_all, DocumentStore, Query};
use crate::models::{ParserRecord, ParserTarget};

type Key = (ParserTarget, Uuid);

/// Chains per (target, provider), reloaded after `ttl`. Provider chains
/// include the parsers with no provider.
pub struct ParserCache {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    scan_keep_alive: Duration,
    entries: Mutex<HashMap<Key, (Instant, Arc<ParserChain>)>>,
}

impl ParserCache {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            scan_keep_alive: Duration::from_secs(60),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn chain(&self, target: ParserTarget, provider_id: Uuid) -> Result<Arc<ParserChain>, ParserError> {
        let key = (target, provider_id);
        {
            let entries = self.entries.lock().await;
            if let Some((loaded, chain)) = entries.get(&key) {
                if loaded.elapsed() < self.ttl {
                    return Ok(Arc::clone(chain));
                }
            }
        }

        let chain = Arc::new(self.load(target, provider_id).await?);
        debug!(
            "Loaded {} {} parser(s) for provider {}",
            chain.len(),
            target.as_str(),
            provider_id
        );
        self.entries
            .lock()
            .await
            .insert(key, (Instant::now(), Arc::clone(&chain)));
        Ok(chain)
    }

    /// Drop every cached chain.
    pub async fn invalidate(&self) {
        self.entries.lock().await.clear();
    }

    async fn load(&self, target: ParserTarget, provider_id: Uuid) -> Result<ParserChain, ParserError> {
        let query = Query::and(vec![
            Query::term("target", target.as_str()),
            Query::or(vec![
                Query::term("provider_id", provider_id.to_string()),
                Query::not(Query::exists("provider_id")),
            ]),
        ]);
        let records: Vec<ParserRecord> =
            search_all(self.store.as_ref(), &query, self.scan_keep_alive).await?;
        let parsers = records
            .iter()
            .map(CompiledParser::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ParserChain::new(parsers))
    }
}
