//! Skein MCP Server implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::SkeinConfig;
use crate::core::model::{Metadata, NodePatch};
use crate::error::SkeinError;
use crate::skein::{AddRequest, EdgeRequest, Skein};

/// Parameters for skein_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Search query; matched by exact terms and by meaning")]
    pub query: String,
    #[schemars(
        description = "Filter by type: decision, pattern, discovery, work_item, document, commit, note"
    )]
    #[serde(default)]
    pub node_type: Option<String>,
    #[schemars(description = "Filter by project")]
    #[serde(default)]
    pub project: Option<String>,
    #[schemars(description = "Maximum number of results, at least 1 (default: 10, values above 100 are capped)")]
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Parameters for skein_context tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextParams {
    #[schemars(description = "Description of the task about to start")]
    pub task: String,
    #[schemars(description = "Current project; other projects fill up to half the results")]
    #[serde(default)]
    pub project: Option<String>,
    #[schemars(description = "Maximum number of results, at least 1 (default: 10, values above 100 are capped)")]
    #[serde(default)]
    pub limit: Option<usize>,
    #[schemars(description = "Score bonus for nodes updated in the last week (default: 0.1)")]
    #[serde(default)]
    pub recency_boost: Option<f64>,
}

/// Parameters for skein_get tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetParams {
    #[schemars(description = "Node id")]
    pub id: String,
    #[schemars(description = "Neighborhood depth; 0 returns the node alone (default: 1)")]
    #[serde(default = "default_hops")]
    pub hops: usize,
}

fn default_hops() -> usize {
    1
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EdgeParams {
    #[schemars(description = "Existing node the new node points to")]
    pub target_id: String,
    #[schemars(
        description = "depends_on, informed_by, supersedes, relates_to, implements, extracted_from"
    )]
    pub relation: String,
}

/// Parameters for skein_add tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddParams {
    #[schemars(
        description = "Node type: decision, pattern, discovery, work_item, document, commit, note"
    )]
    pub node_type: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub project: Option<String>,
    #[schemars(description = "Extra scalar fields (string, number, bool)")]
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    #[schemars(description = "Outgoing edges created atomically with the node")]
    #[serde(default)]
    pub edges: Vec<EdgeParams>,
}

/// Parameters for skein_connect tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConnectParams {
    pub source_id: String,
    pub target_id: String,
    #[schemars(
        description = "depends_on, informed_by, supersedes, relates_to, implements, extracted_from"
    )]
    pub relation: String,
}

/// Parameters for skein_update tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateParams {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[schemars(description = "Merged into existing metadata")]
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// Parameters for skein_delete tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteParams {
    pub id: String,
}

/// Parameters for skein_sync tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SyncParams {
    #[schemars(description = "Connector name (default: all configured connectors)")]
    #[serde(default)]
    pub connector: Option<String>,
    #[schemars(description = "Ignore the stored cursor and re-read everything")]
    #[serde(default)]
    pub full: Option<bool>,
}

/// Caller mistakes become invalid_params; store faults become internal errors
fn to_mcp_error(err: SkeinError) -> McpError {
    if err.is_caller_error() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        warn!(error = %err, "tool call failed");
        McpError::internal_error(err.to_string(), None)
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

fn parse_metadata(
    raw: Option<BTreeMap<String, serde_json::Value>>,
) -> Result<Option<Metadata>, McpError> {
    raw.map(|map| {
        serde_json::from_value(serde_json::Value::Object(map.into_iter().collect())).map_err(
            |e| McpError::invalid_params(format!("metadata values must be scalars: {}", e), None),
        )
    })
    .transpose()
}

/// Skein MCP Service
#[derive(Clone)]
pub struct SkeinService {
    /// Single coordination point for all store access
    skein: Arc<Mutex<Skein>>,
    tool_router: ToolRouter<Self>,
}

impl SkeinService {
    pub fn new(skein: Skein) -> Self {
        Self {
            skein: Arc::new(Mutex::new(skein)),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl SkeinService {
    #[tool(description = "Search the knowledge graph by exact terms and by meaning. Returns ranked nodes with lexical and semantic score breakdown; mode is lexical_only when embeddings are unavailable.")]
    async fn skein_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let skein = self.skein.lock().await;
        let response = skein
            .search(&p.query, p.node_type.as_deref(), p.project.as_deref(), p.limit)
            .map_err(to_mcp_error)?;
        json_result(&response)
    }

    #[tool(description = "Find prior decisions, patterns and discoveries relevant to a task before starting it. Favors the given project and recently updated nodes.")]
    async fn skein_context(
        &self,
        params: Parameters<ContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let skein = self.skein.lock().await;
        let response = skein
            .context(&p.task, p.project.as_deref(), p.limit, p.recency_boost)
            .map_err(to_mcp_error)?;
        json_result(&response)
    }

    #[tool(description = "Get a node with its neighborhood: nodes and edges within `hops` steps in either direction.")]
    async fn skein_get(&self, params: Parameters<GetParams>) -> Result<CallToolResult, McpError> {
        let skein = self.skein.lock().await;
        let hood = skein
            .get(&params.0.id, params.0.hops)
            .map_err(to_mcp_error)?;
        json_result(&hood)
    }

    #[tool(description = "Record a decision, pattern, discovery or note. Optional edges to existing nodes are created in the same transaction.")]
    async fn skein_add(&self, params: Parameters<AddParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let request = AddRequest {
            node_type: p.node_type,
            title: p.title,
            body: p.body,
            project: p.project,
            metadata: parse_metadata(p.metadata)?.unwrap_or_default(),
            edges: p
                .edges
                .into_iter()
                .map(|e| EdgeRequest {
                    target_id: e.target_id,
                    relation: e.relation,
                })
                .collect(),
        };
        let mut skein = self.skein.lock().await;
        let result = skein.add(request).map_err(to_mcp_error)?;
        json_result(&result)
    }

    #[tool(description = "Create a directed edge between two nodes. Repeating an existing connection returns the existing edge.")]
    async fn skein_connect(
        &self,
        params: Parameters<ConnectParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let mut skein = self.skein.lock().await;
        let edge = skein
            .connect(&p.source_id, &p.target_id, &p.relation)
            .map_err(to_mcp_error)?;
        json_result(&edge)
    }

    #[tool(description = "Update a node's title, body, project or metadata. Title or body changes re-compute the embedding.")]
    async fn skein_update(
        &self,
        params: Parameters<UpdateParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let patch = NodePatch {
            title: p.title,
            body: p.body,
            project: p.project,
            metadata: parse_metadata(p.metadata)?,
        };
        let mut skein = self.skein.lock().await;
        let node = skein.update(&p.id, patch).map_err(to_mcp_error)?;
        json_result(&node)
    }

    #[tool(description = "Delete a node together with its edges and embedding.")]
    async fn skein_delete(
        &self,
        params: Parameters<DeleteParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut skein = self.skein.lock().await;
        skein.delete(&params.0.id).map_err(to_mcp_error)?;
        json_result(&serde_json::json!({ "deleted": params.0.id }))
    }

    #[tool(description = "Ingest new and changed records from configured connectors. Per-record failures are listed in the report; successful records are kept.")]
    async fn skein_sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let mut skein = self.skein.lock().await;
        let reports = skein
            .sync(p.connector.as_deref(), p.full)
            .map_err(to_mcp_error)?;
        json_result(&reports)
    }

    #[tool(description = "Get knowledge graph status: node counts by type and project, recent nodes, embedding coverage and connector sync states.")]
    async fn skein_status(&self) -> Result<CallToolResult, McpError> {
        let skein = self.skein.lock().await;
        let status = skein.status().map_err(to_mcp_error)?;
        json_result(&status)
    }
}

#[tool_handler]
impl ServerHandler for SkeinService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Skein knowledge graph. Search past decisions and patterns, record new ones, and link them.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server
pub async fn run_mcp_server(config: SkeinConfig) -> Result<()> {
    use tokio::io::{stdin, stdout};

    let mut skein = Skein::open(&config)?;
    let stats = skein.refresh_embeddings()?;
    info!(
        refreshed = stats.refreshed,
        still_pending = stats.still_pending,
        connectors = ?skein.connector_names(),
        "mcp server starting"
    );

    let service = SkeinService::new(skein);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
