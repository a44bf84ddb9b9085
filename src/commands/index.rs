//! Index command - complete pending embeddings

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

pub fn run(config_path: Option<&Path>, rebuild_text: bool, json: bool) -> Result<()> {
    let mut skein = super::open(config_path)?;

    if rebuild_text {
        skein.store().rebuild_text_index()?;
        if !json {
            println!("{} Rebuilt full-text index", "→".dimmed());
        }
    }

    if !json {
        println!(
            "{} Refreshing embeddings ({})...",
            "→".dimmed(),
            skein.store().model_version()
        );
    }
    let stats = skein.refresh_embeddings()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} Refreshed: {}", "✓".green(), stats.refreshed);
    if stats.still_pending > 0 {
        println!(
            "{} Still pending: {} (embedding adapter unavailable)",
            "⚠".yellow(),
            stats.still_pending
        );
    }
    Ok(())
}
