use std::path::Path;

use anyhow::Result;
use colored::*;

pub fn run(
    config_path: Option<&Path>,
    source_id: &str,
    target_id: &str,
    relation: &str,
    json: bool,
) -> Result<()> {
    let mut skein = super::open(config_path)?;
    let edge = skein.connect(source_id, target_id, relation)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&edge)?);
    } else {
        println!(
            "{} {} --{}--> {} ({})",
            "✓".green(),
            edge.source_id.cyan(),
            edge.relation,
            edge.target_id.cyan(),
            edge.id.dimmed()
        );
    }
    Ok(())
}
