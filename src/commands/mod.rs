//! CLI subcommands

pub mod add;
pub mod connect;
pub mod get;
pub mod index;
pub mod init;
pub mod search;
pub mod status;
pub mod sync;

use std::path::Path;

use anyhow::{Context, Result};

use skein::{Skein, SkeinConfig};

/// Load configuration and open the store it points at
pub fn open(config_path: Option<&Path>) -> Result<Skein> {
    let config = SkeinConfig::load(config_path).context("failed to load configuration")?;
    let skein = Skein::open(&config)
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
    Ok(skein)
}

/// Shorten text to `max` characters for one-line display
pub fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}
