//! Stage execution: the incremental scheduler and the runner that drives
//! stages chunk by chunk.

mod runner;
mod scheduler;
mod stage;

pub use runner::PipelineRunner;
pub use scheduler::{write_bulk, EntityProcessor, IncrementalStage, Outcome, StageSpec};
pub use stage::{ChunkResult, PipelineEvent, PipelineStage};

use thiserror::Error;

use crate::cdx::CdxError;
use crate::docstore::{Index, StoreError};
use crate::extraction::ParserError;
use crate::warc_store::WarcStoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Parser configuration error: {0}")]
    Parser(#[from] ParserError),

    #[error("Capture index error: {0}")]
    Cdx(#[from] CdxError),

    #[error("WARC store error: {0}")]
    Warc(#[from] WarcStoreError),

    #[error("Bulk write of {index}/{id} failed: {reason}")]
    BulkItem {
        index: Index,
        id: String,
        reason: String,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
