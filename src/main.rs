mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Knowledge graph with hybrid lexical + semantic search", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: ./skein.yaml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "JSON output")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default skein.yaml
    Init {
        #[arg(long, help = "Overwrite an existing config")]
        force: bool,
    },
    /// Show node, edge, embedding and connector counts
    Status,
    /// Hybrid search over the graph
    Search {
        query: String,
        #[arg(long = "type", help = "Filter by node type")]
        node_type: Option<String>,
        #[arg(long, short, help = "Filter by project")]
        project: Option<String>,
        #[arg(long, short, help = "Limit results, at least 1 (default: 10, capped at 100)")]
        limit: Option<usize>,
        #[arg(long, help = "Context mode: recency boost + cross-project results")]
        context: bool,
    },
    /// Show a node and its neighborhood
    Get {
        id: String,
        #[arg(long, default_value_t = 1, help = "Traversal depth")]
        hops: usize,
    },
    /// Add a node
    Add {
        #[arg(long = "type", help = "decision, pattern, discovery, work_item, document, commit, note")]
        node_type: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, short)]
        project: Option<String>,
        #[arg(long = "edge", help = "Outgoing edge as relation:target_id (repeatable)")]
        edges: Vec<String>,
    },
    /// Connect two nodes
    Connect {
        source: String,
        target: String,
        #[arg(long, short, default_value = "relates_to")]
        relation: String,
    },
    /// Ingest from configured connectors
    Sync {
        #[arg(help = "Connector name (default: all)")]
        connector: Option<String>,
        #[arg(long, help = "Ignore the cursor and re-read everything")]
        full: bool,
        #[arg(long, conflicts_with = "full", help = "Only read records changed since the last run")]
        incremental: bool,
        #[arg(long, help = "Exit 1 if any record failed")]
        strict: bool,
    },
    /// Complete pending embeddings
    Index {
        #[arg(long, help = "Also rebuild the full-text index")]
        rebuild_text: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server over stdio
    #[cfg(feature = "mcp")]
    Mcp,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config.as_deref();
    let json = cli.json;

    match cli.command {
        Commands::Init { force } => commands::init::run(config, force),
        Commands::Status => commands::status::run(config, json),
        Commands::Search {
            query,
            node_type,
            project,
            limit,
            context,
        } => commands::search::run(
            config,
            commands::search::SearchArgs {
                query: &query,
                node_type: node_type.as_deref(),
                project: project.as_deref(),
                limit,
                context,
            },
            json,
        ),
        Commands::Get { id, hops } => commands::get::run(config, &id, hops, json),
        Commands::Add {
            node_type,
            title,
            body,
            project,
            edges,
        } => commands::add::run(
            config,
            commands::add::AddArgs {
                node_type,
                title,
                body,
                project,
                edges,
            },
            json,
        ),
        Commands::Connect {
            source,
            target,
            relation,
        } => commands::connect::run(config, &source, &target, &relation, json),
        Commands::Sync {
            connector,
            full,
            incremental,
            strict,
        } => {
            let full = match (full, incremental) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::sync::run(config, connector.as_deref(), full, strict, json)
        }
        Commands::Index { rebuild_text } => commands::index::run(config, rebuild_text, json),

        // MCP Server
        #[cfg(feature = "mcp")]
        Commands::Mcp => run_mcp_server(config),
    }
}

/// Logs go to stderr; stdout carries command output and the MCP transport
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skein=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(feature = "mcp")]
fn run_mcp_server(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = skein::SkeinConfig::load(config_path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(skein::mcp::run_mcp_server(config))
}
