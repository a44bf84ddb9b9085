use std::path::Path;

use anyhow::Result;
use colored::*;

use skein::search::{SearchMode, SearchResponse};

use super::truncate;

pub struct SearchArgs<'a> {
    pub query: &'a str,
    pub node_type: Option<&'a str>,
    pub project: Option<&'a str>,
    pub limit: Option<usize>,
    /// Pre-task context search with recency boost and cross-project top-up
    pub context: bool,
}

pub fn run(config_path: Option<&Path>, args: SearchArgs<'_>, json: bool) -> Result<()> {
    let skein = super::open(config_path)?;
    let response = if args.context {
        skein.context(args.query, args.project, args.limit, None)?
    } else {
        skein.search(args.query, args.node_type, args.project, args.limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_results(args.query, &response);
    }

    Ok(())
}

fn print_results(query: &str, response: &SearchResponse) {
    println!("{}", "Search Results".bold());
    println!("{}", "=".repeat(60));
    println!("Query: \"{}\"", query);
    if response.mode == SearchMode::LexicalOnly {
        println!(
            "{} embeddings unavailable, showing lexical matches only",
            "⚠".yellow()
        );
    }
    println!();

    if response.results.is_empty() {
        println!("{}", "No matches found.".yellow());
        return;
    }

    for (i, hit) in response.results.iter().enumerate() {
        let project = hit.node.project.as_deref().unwrap_or("-");
        println!(
            "{}. {} [{}] {}",
            i + 1,
            hit.node.title.cyan(),
            hit.node.node_type,
            project.dimmed()
        );
        println!(
            "   {} score {:.3} (text {}, vector {})",
            hit.node.id.dimmed(),
            hit.score,
            fmt_signal(hit.signals.lexical),
            fmt_signal(hit.signals.semantic)
        );
        if !hit.node.body.is_empty() {
            println!("   {}", truncate(&hit.node.body, 100).dimmed());
        }
        println!();
    }
}

fn fmt_signal(signal: Option<f64>) -> String {
    signal
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string())
}
