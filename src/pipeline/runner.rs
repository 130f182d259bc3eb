//! Pipeline runner: drives stages one after another, each to completion.

use tokio::sync::mpsc;
use tracing::info;

use super::stage::{PipelineEvent, PipelineStage};
use super::PipelineError;

/// Drives pipeline stages through their work in order.
pub struct PipelineRunner {
    stages: Vec<Box<dyn PipelineStage>>,
    chunk_size: usize,
    /// 0 means unlimited.
    limit: usize,
}

impl PipelineRunner {
    pub fn new(chunk_size: usize, limit: usize) -> Self {
        Self {
            stages: Vec::new(),
            chunk_size: chunk_size.max(1),
            limit,
        }
    }

    pub fn add_stage(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    /// Complete each stage before starting the next, so later stages see
    /// what earlier ones produced in the same run.
    pub async fn run(&self, event_tx: mpsc::Sender<PipelineEvent>) -> Result<(), PipelineError> {
        for stage in &self.stages {
            self.drain_stage(stage.as_ref(), &event_tx).await?;
        }
        Ok(())
    }

    /// Run a single stage to completion (or until limit is reached).
    async fn drain_stage(
        &self,
        stage: &dyn PipelineStage,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), PipelineError> {
        let total = stage.count().await?;
        info!("Stage {}: {} item(s) due", stage.name(), total);
        let _ = event_tx
            .send(PipelineEvent::StageStarted {
                stage: stage.name().to_string(),
                total_items: total,
            })
            .await;

        let mut total_succeeded = 0usize;
        let mut total_failed = 0usize;
        let mut total_skipped = 0usize;
        let mut processed = 0usize;

        let outcome = async {
            loop {
                let remaining_limit = if self.limit > 0 {
                    let left = self.limit.saturating_sub(processed);
                    if left == 0 {
                        break;
                    }
                    left
                } else {
                    0 // unlimited
                };

                let result = stage
                    .run_chunk(self.chunk_size, remaining_limit, event_tx)
                    .await?;

                processed += result.total();
                total_succeeded += result.succeeded;
                total_failed += result.failed;
                total_skipped += result.skipped;

                if !result.has_more {
                    break;
                }
            }
            Ok::<_, PipelineError>(())
        }
        .await;

        stage.finish().await?;
        outcome?;

        let remaining = stage.count().await?;
        info!(
            "Stage {} done: {} succeeded, {} failed, {} skipped, {} remaining",
            stage.name(),
            total_succeeded,
            total_failed,
            total_skipped,
            remaining
        );
        let _ = event_tx
            .send(PipelineEvent::StageCompleted {
                stage: stage.name().to_string(),
                succeeded: total_succeeded,
                failed: total_failed,
                skipped: total_skipped,
                remaining,
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ChunkResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Countdown {
        left: AtomicUsize,
    }

    #[async_trait]
    impl PipelineStage for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        async fn count(&self) -> Result<u64, PipelineError> {
            Ok(self.left.load(Ordering::SeqCst) as u64)
        }

        async fn run_chunk(
            &self,
            chunk_size: usize,
            remaining_limit: usize,
            _event_tx: &mpsc::Sender<PipelineEvent>,
        ) -> Result<ChunkResult, PipelineError> {
            let cap = if remaining_limit > 0 {
                chunk_size.min(remaining_limit)
            } else {
                chunk_size
            };
            let left = self.left.load(Ordering::SeqCst);
            let n = cap.min(left);
            self.left.store(left - n, Ordering::SeqCst);
            Ok(ChunkResult {
                succeeded: n,
                has_more: left - n > 0,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn drains_until_no_more_work() {
        let mut runner = PipelineRunner::new(3, 0);
        runner.add_stage(Box::new(Countdown {
            left: AtomicUsize::new(7),
        }));
        let (tx, mut rx) = mpsc::channel(64);
        runner.run(tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::StageCompleted {
                stage: "countdown".into(),
                succeeded: 7,
                failed: 0,
                skipped: 0,
                remaining: 0,
            })
        );
    }

    #[tokio::test]
    async fn respects_limit() {
        let mut runner = PipelineRunner::new(3, 4);
        runner.add_stage(Box::new(Countdown {
            left: AtomicUsize::new(10),
        }));
        let (tx, _rx) = mpsc::channel(64);
        runner.run(tx).await.unwrap();
        // 3 + min(3, 1)
        assert_eq!(runner.stages[0].count().await.unwrap(), 6);
    }
}
