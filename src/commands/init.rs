use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use colored::*;

use skein::core::config::{DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_YAML};

pub fn run(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, DEFAULT_CONFIG_YAML)?;

    println!("{} Wrote {}", "✓".green(), path.display());
    println!();
    println!("Next steps:");
    println!("  {} add connector paths under {}", "1.".dimmed(), "connectors:".cyan());
    println!("  {} run {}", "2.".dimmed(), "skein sync".cyan());
    println!("  {} register {} with your MCP client", "3.".dimmed(), "skein mcp".cyan());

    Ok(())
}
