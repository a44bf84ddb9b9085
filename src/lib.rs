//! skein library
//!
//! Knowledge graph with hybrid lexical + semantic search.
//!
//! # Modules
//!
//! - `core`: Data model, node/relation vocabulary, configuration
//! - `store`: SQLite graph store (nodes, edges, embeddings, sync state)
//! - `search`: Embedding adapters and the fusion search engine
//! - `sync`: Connector contract, sync coordinator, WCP connector
//! - `mcp`: MCP server exposing the graph as tools

pub mod core;
pub mod error;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod search;
pub mod skein;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use core::config::{FusionWeights, SkeinConfig};
pub use core::model::{Edge, Metadata, MetaValue, NewNode, Node, NodePatch};
pub use core::schema::{NodeType, Relation};
pub use error::{Result, SkeinError};
pub use skein::{AddRequest, EdgeRequest, Skein};
pub use store::{GraphStore, NodeFilter};
