//! Records held by the graph store

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::schema::{NodeType, Relation};

/// Source tag for nodes created through a direct call
pub const MANUAL_SOURCE: &str = "manual";

/// Metadata key set while a node waits for its embedding
pub const EMBEDDING_PENDING_KEY: &str = "embedding_pending";

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for MetaValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

/// Producer-defined extras, key -> scalar
pub type Metadata = BTreeMap<String, MetaValue>;

/// A unit of knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    pub body: String,
    pub project: Option<String>,
    pub source: String,
    /// External identifier within `source` (sync correlation)
    pub source_id: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Text fed to the embedding adapter
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.body)
    }

    pub fn embedding_pending(&self) -> bool {
        matches!(
            self.metadata.get(EMBEDDING_PENDING_KEY),
            Some(MetaValue::Bool(true))
        )
    }
}

pub(crate) fn embedding_text(title: &str, body: &str) -> String {
    format!("{}\n\n{}", title, body)
}

/// Input for creating a node
#[derive(Debug, Clone)]
pub struct NewNode {
    pub node_type: NodeType,
    pub title: String,
    pub body: String,
    pub project: Option<String>,
    pub source: String,
    pub source_id: Option<String>,
    pub metadata: Metadata,
}

impl NewNode {
    pub fn new(node_type: NodeType, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            node_type,
            title: title.into(),
            body: body.into(),
            project: None,
            source: MANUAL_SOURCE.to_string(),
            source_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>, source_id: Option<String>) -> Self {
        self.source = source.into();
        self.source_id = source_id;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Partial update of a node; `None` leaves the field untouched
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub project: Option<String>,
    /// Merged into existing metadata
    pub metadata: Option<Metadata>,
}

/// A directed, typed relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: Relation,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Outgoing edge requested alongside a new node
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub target_id: String,
    pub relation: Relation,
    pub metadata: Metadata,
}

/// Stored vector for one node
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub node_id: String,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// Per-connector progress marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub connector_name: String,
    /// Opaque progress token (JSON-encoded sync cursor)
    pub cursor: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_count: usize,
    pub last_failure_count: usize,
}

/// Current time at storage precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
