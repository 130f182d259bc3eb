//! Run command: drive pipeline stages with a progress display.

use std::collections::HashMap;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::pipeline::{PipelineEvent, PipelineRunner};
use crate::stages::{build_stage, StageContext, StageName};

use super::super::helpers::open_store;

/// Run the given stages in order over everything that is due.
pub async fn cmd_run(
    settings: &Settings,
    stages: &[StageName],
    limit: usize,
    chunk_size: usize,
    concurrency: usize,
) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let ctx = StageContext::from_settings(settings, store)?.with_concurrency(concurrency);

    let mut runner = PipelineRunner::new(chunk_size, limit);
    for &name in stages {
        runner.add_stage(build_stage(name, &ctx));
    }

    println!(
        "{} Running {} stage(s), {} at a time per chunk",
        style("→").cyan(),
        stages.len(),
        ctx.concurrency
    );

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(100);

    let event_handler = tokio::spawn(async move {
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();

        while let Some(event) = event_rx.recv().await {
            match event {
                PipelineEvent::StageStarted { stage, total_items } => {
                    if total_items == 0 {
                        println!("{} {}: nothing due", style("!").yellow(), stage);
                        continue;
                    }
                    let pb = ProgressBar::new(total_items);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("#>-"),
                    );
                    pb.set_message(stage.clone());
                    bars.insert(stage, pb);
                }
                PipelineEvent::ItemCompleted { stage, .. }
                | PipelineEvent::ItemSkipped { stage, .. } => {
                    if let Some(pb) = bars.get(&stage) {
                        pb.inc(1);
                    }
                }
                PipelineEvent::ItemFailed { stage, item_id, error } => {
                    if let Some(pb) = bars.get(&stage) {
                        pb.inc(1);
                        pb.println(format!("{} {} {}: {}", style("✗").red(), stage, item_id, error));
                    }
                }
                PipelineEvent::StageCompleted {
                    stage,
                    succeeded,
                    failed,
                    skipped,
                    remaining,
                } => {
                    if let Some(pb) = bars.remove(&stage) {
                        pb.finish_and_clear();
                    }
                    println!(
                        "{} {}: {} done, {} skipped, {} failed",
                        style("✓").green(),
                        stage,
                        succeeded,
                        skipped,
                        failed
                    );
                    if remaining > 0 {
                        println!("  {} {} still due", style("→").dim(), remaining);
                    }
                }
            }
        }
    });

    let result = runner.run(event_tx).await;

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }

    result?;
    Ok(())
}
