//! Pipeline stage abstraction and progress events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::PipelineError;

/// Cumulative result of a single `run_chunk` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Whether there is more work remaining after this chunk.
    pub has_more: bool,
}

impl ChunkResult {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Progress events emitted by stages and forwarded by the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: String,
        total_items: u64,
    },
    ItemCompleted {
        stage: String,
        item_id: String,
        detail: Option<String>,
    },
    /// Permanently failed; marked done so it is not retried.
    ItemSkipped {
        stage: String,
        item_id: String,
    },
    /// Transient failure; left due for the next run.
    ItemFailed {
        stage: String,
        item_id: String,
        error: String,
    },
    StageCompleted {
        stage: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        remaining: u64,
    },
}

/// A self-contained processing stage.
///
/// Each stage owns its data source and processing logic.
/// The runner only calls `count()`, `run_chunk()` and `finish()`.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Name used on the command line and in progress output.
    fn name(&self) -> &str;

    /// Count items currently due.
    async fn count(&self) -> Result<u64, PipelineError>;

    /// Process one chunk of work.
    ///
    /// - `chunk_size`: maximum items to fetch in this chunk
    /// - `remaining_limit`: how many more items the runner will allow (0 = unlimited)
    /// - `event_tx`: channel for emitting progress events
    async fn run_chunk(
        &self,
        chunk_size: usize,
        remaining_limit: usize,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<ChunkResult, PipelineError>;

    /// Release anything held between chunks.
    async fn finish(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
