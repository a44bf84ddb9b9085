//! Facade over the store, search engine and sync coordinator
//!
//! Boundary callers (MCP tools, CLI commands) pass plain strings; this layer
//! parses them into domain types so invalid input surfaces as a validation
//! error instead of a storage fault.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::config::{FusionWeights, SkeinConfig};
use crate::core::model::{Edge, EdgeSpec, Metadata, NewNode, Node, NodePatch};
use crate::core::schema::{NodeType, Relation};
use crate::error::{Result, SkeinError};
use crate::search::embedding::embedder_for;
use crate::search::engine::{FusionSearch, SearchResponse, DEFAULT_RECENCY_BOOST};
use crate::store::{GraphStore, Neighborhood, NodeFilter, RefreshStats, StoreStatus};
use crate::sync::{SyncCoordinator, SyncReport};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;
const STATUS_RECENT: usize = 10;

/// Clamp a caller-supplied result limit to 1..=100; zero is rejected
pub fn clamp_limit(limit: Option<usize>) -> Result<usize> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(0) => Err(SkeinError::validation("limit must be at least 1")),
        Some(n) => Ok(n.min(MAX_LIMIT)),
    }
}

/// Outgoing edge requested with `add`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRequest {
    pub target_id: String,
    pub relation: String,
}

/// Boundary input for `add`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddRequest {
    pub node_type: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub edges: Vec<EdgeRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddResult {
    pub node: Node,
    pub edges: Vec<Edge>,
}

pub struct Skein {
    store: GraphStore,
    sync: SyncCoordinator,
    weights: FusionWeights,
    full_by_default: bool,
}

impl Skein {
    /// Open the configured store and build its connectors
    pub fn open(config: &SkeinConfig) -> Result<Self> {
        config.validate()?;
        let embedder = embedder_for(&config.embedding_model)?;
        let store = GraphStore::open(&config.db_path, embedder)?;
        let sync = SyncCoordinator::from_config(config)?;
        info!(db = %config.db_path.display(), model = %store.model_version(), "skein opened");

        Ok(Self {
            store,
            sync,
            weights: config.search,
            full_by_default: config.sync.full_by_default,
        })
    }

    pub fn from_parts(store: GraphStore, sync: SyncCoordinator, config: &SkeinConfig) -> Self {
        Self {
            store,
            sync,
            weights: config.search,
            full_by_default: config.sync.full_by_default,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn search(
        &self,
        query: &str,
        node_type: Option<&str>,
        project: Option<&str>,
        limit: Option<usize>,
    ) -> Result<SearchResponse> {
        let filter = NodeFilter {
            node_type: node_type.map(NodeType::from_str).transpose()?,
            project: project.map(str::to_string),
        };
        let limit = clamp_limit(limit)?;
        FusionSearch::new(&self.store, self.weights).search(query, &filter, limit)
    }

    pub fn context(
        &self,
        task: &str,
        project: Option<&str>,
        limit: Option<usize>,
        recency_boost: Option<f64>,
    ) -> Result<SearchResponse> {
        let boost = recency_boost.unwrap_or(DEFAULT_RECENCY_BOOST);
        if !boost.is_finite() || boost < 0.0 {
            return Err(SkeinError::validation(format!(
                "recency_boost must be a non-negative number, got {}",
                boost
            )));
        }
        let limit = clamp_limit(limit)?;
        FusionSearch::new(&self.store, self.weights).context_search(task, project, limit, boost)
    }

    pub fn get(&self, id: &str, hops: usize) -> Result<Neighborhood> {
        self.store.neighborhood(id, hops)
    }

    pub fn add(&mut self, request: AddRequest) -> Result<AddResult> {
        let node_type = NodeType::from_str(&request.node_type)?;
        if request.title.trim().is_empty() {
            return Err(SkeinError::validation("title cannot be empty"));
        }
        let edges = request
            .edges
            .iter()
            .map(|e| {
                Ok(EdgeSpec {
                    target_id: e.target_id.clone(),
                    relation: Relation::from_str(&e.relation)?,
                    metadata: Metadata::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut new = NewNode::new(node_type, request.title, request.body);
        new.project = request.project.filter(|p| !p.trim().is_empty());
        new.metadata = request.metadata;

        let (node, edges) = self.store.add_node_with_edges(new, &edges)?;
        if node.embedding_pending() {
            warn!(id = %node.id, "node stored without embedding");
        }
        Ok(AddResult { node, edges })
    }

    pub fn connect(&mut self, source_id: &str, target_id: &str, relation: &str) -> Result<Edge> {
        let relation = Relation::from_str(relation)?;
        self.store
            .connect(source_id, target_id, relation, Metadata::new())
    }

    pub fn update(&mut self, id: &str, patch: NodePatch) -> Result<Node> {
        if matches!(&patch.title, Some(t) if t.trim().is_empty()) {
            return Err(SkeinError::validation("title cannot be empty"));
        }
        self.store.update_node(id, patch)
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.store.delete_node(id)
    }

    /// Sync one connector, or all of them in name order
    pub fn sync(&mut self, connector: Option<&str>, full: Option<bool>) -> Result<Vec<SyncReport>> {
        let full = full.unwrap_or(self.full_by_default);
        match connector {
            Some(name) => Ok(vec![self.sync.sync(&mut self.store, name, full)?]),
            None => self.sync.sync_all(&mut self.store, full),
        }
    }

    pub fn connector_names(&self) -> Vec<&str> {
        self.sync.names()
    }

    pub fn status(&self) -> Result<StoreStatus> {
        self.store.status(STATUS_RECENT)
    }

    /// Complete pending embeddings and re-embed vectors from another model
    pub fn refresh_embeddings(&mut self) -> Result<RefreshStats> {
        self.store.refresh_embeddings(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::engine::SearchMode;
    use crate::testing::{concept_store, failing_store, VecConnector};

    fn skein() -> Skein {
        Skein::from_parts(concept_store(), SyncCoordinator::new(), &SkeinConfig::default())
    }

    fn add(skein: &mut Skein, node_type: &str, title: &str, body: &str, project: &str) -> Node {
        skein
            .add(AddRequest {
                node_type: node_type.into(),
                title: title.into(),
                body: body.into(),
                project: Some(project.into()),
                ..Default::default()
            })
            .unwrap()
            .node
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(3)).unwrap(), 3);
        assert_eq!(clamp_limit(Some(5000)).unwrap(), MAX_LIMIT);
        assert!(matches!(clamp_limit(Some(0)), Err(SkeinError::Validation(_))));
    }

    #[test]
    fn test_zero_limit_rejected_at_boundary() {
        let skein = skein();
        assert!(matches!(
            skein.search("storage", None, None, Some(0)),
            Err(SkeinError::Validation(_))
        ));
        assert!(matches!(
            skein.context("storage", None, Some(0), None),
            Err(SkeinError::Validation(_))
        ));
    }

    #[test]
    fn test_decision_scenario() -> Result<()> {
        let mut skein = skein();
        let n1 = add(
            &mut skein,
            "decision",
            "Use embedded store",
            "chose single-file storage for simplicity",
            "proj1",
        );
        let n2 = add(&mut skein, "pattern", "Single writer", "serialize all writes", "proj1");
        assert!(skein.store().get_embedding(&n1.id)?.is_some());

        let edge = skein.connect(&n1.id, &n2.id, "depends_on")?;
        assert_eq!(edge.relation, Relation::DependsOn);

        let response = skein.search("why did we pick storage", None, Some("proj1"), Some(5))?;
        assert_eq!(response.mode, SearchMode::Hybrid);
        assert_eq!(response.results[0].node.id, n1.id);

        let hood = skein.get(&n1.id, 1)?;
        assert_eq!(hood.nodes.len(), 1);
        assert_eq!(hood.nodes[0].id, n2.id);
        Ok(())
    }

    #[test]
    fn test_boundary_strings_are_validated() {
        let mut skein = skein();
        let bad_type = skein.add(AddRequest {
            node_type: "meeting".into(),
            title: "x".into(),
            ..Default::default()
        });
        assert!(matches!(bad_type, Err(SkeinError::Validation(_))));

        let blank = skein.add(AddRequest {
            node_type: "note".into(),
            title: "   ".into(),
            ..Default::default()
        });
        assert!(matches!(blank, Err(SkeinError::Validation(_))));

        let a = add(&mut skein, "note", "a", "", "p");
        let b = add(&mut skein, "note", "b", "", "p");
        assert!(matches!(
            skein.connect(&a.id, &b.id, "likes"),
            Err(SkeinError::Validation(_))
        ));
        assert!(matches!(
            skein.search("a", Some("meeting"), None, None),
            Err(SkeinError::Validation(_))
        ));
        assert!(matches!(
            skein.context("a", None, None, Some(-1.0)),
            Err(SkeinError::Validation(_))
        ));
    }

    #[test]
    fn test_add_with_edges_is_atomic() {
        let mut skein = skein();
        let target = add(&mut skein, "note", "target", "", "p");

        let result = skein.add(AddRequest {
            node_type: "discovery".into(),
            title: "found it".into(),
            edges: vec![
                EdgeRequest {
                    target_id: target.id.clone(),
                    relation: "informed_by".into(),
                },
                EdgeRequest {
                    target_id: "missing".into(),
                    relation: "relates_to".into(),
                },
            ],
            ..Default::default()
        });
        assert!(matches!(result, Err(SkeinError::NotFound(_))));
        assert_eq!(skein.status().unwrap().total_nodes, 1);
        assert_eq!(skein.status().unwrap().total_edges, 0);

        let ok = skein
            .add(AddRequest {
                node_type: "discovery".into(),
                title: "found it".into(),
                edges: vec![EdgeRequest {
                    target_id: target.id.clone(),
                    relation: "informed_by".into(),
                }],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ok.edges.len(), 1);
        assert_eq!(ok.edges[0].target_id, target.id);
    }

    #[test]
    fn test_degraded_store_still_accepts_writes() -> Result<()> {
        let mut skein =
            Skein::from_parts(failing_store(), SyncCoordinator::new(), &SkeinConfig::default());
        let node = add(&mut skein, "note", "storage notes", "sqlite file", "p");
        assert!(node.embedding_pending());

        let response = skein.search("storage", None, None, None)?;
        assert_eq!(response.mode, SearchMode::LexicalOnly);
        assert_eq!(response.results.len(), 1);

        let stats = skein.refresh_embeddings()?;
        assert_eq!(stats.refreshed, 0);
        assert_eq!(stats.still_pending, 1);
        Ok(())
    }

    #[test]
    fn test_sync_uses_configured_default() -> Result<()> {
        let connector = VecConnector::new("vec");
        connector.push("a", "first", "body");
        let mut coordinator = SyncCoordinator::new();
        coordinator.register(Box::new(connector.clone()));

        let mut config = SkeinConfig::default();
        config.sync.full_by_default = true;
        let mut skein = Skein::from_parts(concept_store(), coordinator, &config);

        let reports = skein.sync(None, None)?;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].full);
        assert_eq!(reports[0].created, 1);

        let reports = skein.sync(Some("vec"), Some(false))?;
        assert!(!reports[0].full);
        assert_eq!(reports[0].created, 0);

        assert!(matches!(
            skein.sync(Some("jira"), None),
            Err(SkeinError::NotFound(_))
        ));
        assert_eq!(skein.connector_names(), vec!["vec"]);
        Ok(())
    }

    #[test]
    fn test_update_and_delete() -> Result<()> {
        let mut skein = skein();
        let node = add(&mut skein, "note", "draft", "about rust", "p");

        let updated = skein.update(
            &node.id,
            NodePatch {
                title: Some("final".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.title, "final");
        assert!(updated.updated_at >= updated.created_at);

        assert!(matches!(
            skein.update(
                &node.id,
                NodePatch {
                    title: Some("".into()),
                    ..Default::default()
                }
            ),
            Err(SkeinError::Validation(_))
        ));

        skein.delete(&node.id)?;
        assert!(matches!(skein.get(&node.id, 0), Err(SkeinError::NotFound(_))));
        Ok(())
    }
}
