use std::path::Path;

use anyhow::Result;
use colored::*;

use skein::store::StoreStatus;

use super::truncate;

pub fn run(config_path: Option<&Path>, json: bool) -> Result<()> {
    let skein = super::open(config_path)?;
    let status = skein.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    Ok(())
}

fn print_status(status: &StoreStatus) {
    println!("{}", "Knowledge Graph Status".bold());
    println!("{}", "=".repeat(50));
    println!();

    println!("Nodes: {}", status.total_nodes.to_string().cyan());
    println!("Edges: {}", status.total_edges.to_string().cyan());
    println!(
        "Embeddings: {} ({})",
        status.embedded_nodes,
        status.model_version.dimmed()
    );
    if status.pending_embeddings > 0 {
        println!(
            "{} {} node(s) waiting for embeddings (run {})",
            "⚠".yellow(),
            status.pending_embeddings,
            "skein index".cyan()
        );
    }
    println!();

    if !status.counts_by_type.is_empty() {
        println!("{}", "By type".bold());
        for (node_type, count) in &status.counts_by_type {
            println!("  {:<12} {}", node_type, count);
        }
        println!();
    }

    if !status.counts_by_project.is_empty() {
        println!("{}", "By project".bold());
        for (project, count) in &status.counts_by_project {
            println!("  {:<20} {}", project, count);
        }
        println!();
    }

    if !status.recent_nodes.is_empty() {
        println!("{}", "Recently updated".bold());
        for node in &status.recent_nodes {
            println!(
                "  {} [{}] {}",
                node.updated_at.format("%Y-%m-%d").to_string().dimmed(),
                node.node_type,
                truncate(&node.title, 60)
            );
        }
        println!();
    }

    if !status.sync_states.is_empty() {
        println!("{}", "Connectors".bold());
        for state in &status.sync_states {
            let last_run = state
                .last_run_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            let failures = if state.last_failure_count > 0 {
                state.last_failure_count.to_string().red()
            } else {
                state.last_failure_count.to_string().green()
            };
            println!(
                "  {:<12} last run {} ({} ok, {} failed)",
                state.connector_name, last_run, state.last_success_count, failures
            );
        }
    }
}
