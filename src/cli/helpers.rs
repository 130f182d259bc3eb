//! Shared helper functions for CLI commands.

use std::sync::Arc;

use crate::config::Settings;
use crate::docstore::{DocumentStore, SqliteStore};

/// Open the configured document store, creating directories and schema.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn DocumentStore>> {
    settings.ensure_directories()?;
    tracing::debug!("Opening document store at {}", settings.database_path.display());
    let store = SqliteStore::open(&settings.database_path, settings.bulk_retry_on_conflict).await?;
    Ok(Arc::new(store))
}
