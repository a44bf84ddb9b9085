//! MCP Server for skein
//!
//! Exposes search, graph reads and writes, and connector sync as tools over stdio.

mod server;

pub use server::{run_mcp_server, SkeinService};
