use std::path::Path;

use anyhow::Result;
use colored::*;

use skein::store::Neighborhood;

pub fn run(config_path: Option<&Path>, id: &str, hops: usize, json: bool) -> Result<()> {
    let skein = super::open(config_path)?;
    let hood = skein.get(id, hops)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hood)?);
    } else {
        print_neighborhood(&hood);
    }

    Ok(())
}

fn print_neighborhood(hood: &Neighborhood) {
    let node = &hood.node;
    println!("{}", node.title.bold());
    println!("{}", "=".repeat(60));
    println!("id:       {}", node.id);
    println!("type:     {}", node.node_type);
    println!("project:  {}", node.project.as_deref().unwrap_or("-"));
    println!(
        "source:   {}{}",
        node.source,
        node.source_id
            .as_deref()
            .map(|s| format!(" ({})", s))
            .unwrap_or_default()
    );
    println!("updated:  {}", node.updated_at.to_rfc3339());
    if node.embedding_pending() {
        println!("{} embedding pending", "⚠".yellow());
    }
    println!();
    if !node.body.is_empty() {
        println!("{}", node.body);
        println!();
    }

    if hood.edges.is_empty() {
        return;
    }

    println!("{}", "Edges".bold());
    for edge in &hood.edges {
        let title_of = |id: &str| {
            if id == node.id {
                Some(node.title.as_str())
            } else {
                hood.nodes
                    .iter()
                    .find(|n| n.id == id)
                    .map(|n| n.title.as_str())
            }
        };
        println!(
            "  {} --{}--> {}",
            title_of(&edge.source_id).unwrap_or(&edge.source_id).cyan(),
            edge.relation,
            title_of(&edge.target_id).unwrap_or(&edge.target_id).cyan()
        );
    }
    if hood.truncated {
        println!(
            "{}",
            "... neighborhood truncated at the node limit".dimmed()
        );
    }
}
