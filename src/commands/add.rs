use std::path::Path;

use anyhow::Result;
use colored::*;

use skein::{AddRequest, EdgeRequest};

pub struct AddArgs {
    pub node_type: String,
    pub title: String,
    pub body: String,
    pub project: Option<String>,
    /// `relation:target_id` pairs
    pub edges: Vec<String>,
}

pub fn run(config_path: Option<&Path>, args: AddArgs, json: bool) -> Result<()> {
    let edges = args
        .edges
        .iter()
        .map(|raw| parse_edge(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut skein = super::open(config_path)?;
    let result = skein.add(AddRequest {
        node_type: args.node_type,
        title: args.title,
        body: args.body,
        project: args.project,
        edges,
        ..Default::default()
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{} Added {} {}", "✓".green(), result.node.node_type, result.node.id.cyan());
    for edge in &result.edges {
        println!("  {} {} → {}", "+".green(), edge.relation, edge.target_id);
    }
    if result.node.embedding_pending() {
        println!(
            "{} embedding pending; run {} later",
            "⚠".yellow(),
            "skein index".cyan()
        );
    }
    Ok(())
}

fn parse_edge(raw: &str) -> Result<EdgeRequest> {
    match raw.split_once(':') {
        Some((relation, target)) if !relation.is_empty() && !target.is_empty() => {
            Ok(EdgeRequest {
                target_id: target.to_string(),
                relation: relation.to_string(),
            })
        }
        _ => anyhow::bail!("invalid edge '{}', expected relation:target_id", raw),
    }
}
