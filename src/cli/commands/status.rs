//! Status command: due and total counts per stage.

use console::style;

use crate::config::Settings;
use crate::docstore::{DocumentStore, Query};
use crate::pipeline::PipelineStage;
use crate::stages::{build_stage, StageContext, StageName};

use super::super::helpers::open_store;

pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let ctx = StageContext::from_settings(settings, store.clone())?;

    println!();
    println!("{}", style("serpmine status").bold());
    println!("{}", "─".repeat(60));
    println!("Database: {}", settings.database_path.display());
    println!("WARCs:    {}", settings.warc_dir.display());
    println!();
    println!("{}", style("STAGES").cyan().bold());
    println!("  {:<28} {:>12} {:>12}", "", "due", "total");

    for name in StageName::ALL {
        let stage = build_stage(name, &ctx);
        let due = stage.count().await?;
        let total = store.count(name.index(), &Query::MatchAll).await?;
        let due_cell = format!("{:>12}", format_number(due));
        let due_cell = if due > 0 {
            style(due_cell).yellow().to_string()
        } else {
            style(due_cell).dim().to_string()
        };
        println!("  {:<28} {} {:>12}", name.as_str(), due_cell, format_number(total));
    }
    println!();

    Ok(())
}

/// Format a number with thousands separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();
    let chunks: Vec<_> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();
    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_are_separated() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
