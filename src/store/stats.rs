use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{timestamp_at, GraphStore};
use crate::core::model::SyncState;
use crate::error::Result;

/// Key under which nodes without a project are counted
pub const NO_PROJECT: &str = "(none)";

/// Compact node listing for status output
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    pub project: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only aggregate over the store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub embedded_nodes: usize,
    pub pending_embeddings: usize,
    pub model_version: String,
    pub counts_by_type: BTreeMap<String, usize>,
    pub counts_by_project: BTreeMap<String, usize>,
    pub recent_nodes: Vec<NodeSummary>,
    pub sync_states: Vec<SyncState>,
}

impl GraphStore {
    pub fn status(&self, recent_limit: usize) -> Result<StoreStatus> {
        let total_nodes: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let total_edges: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        let embedded_nodes: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model_version = ?1",
            [self.model_version()],
            |row| row.get(0),
        )?;

        let counts_by_type = self.grouped_counts(
            "SELECT node_type, COUNT(*) FROM nodes GROUP BY node_type",
        )?;
        let counts_by_project = self.grouped_counts(&format!(
            "SELECT COALESCE(project, '{}'), COUNT(*) FROM nodes GROUP BY 1",
            NO_PROJECT
        ))?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, node_type, title, project, updated_at
            FROM nodes ORDER BY updated_at DESC, id ASC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map([recent_limit as i64], |row| {
            Ok(NodeSummary {
                id: row.get(0)?,
                node_type: row.get(1)?,
                title: row.get(2)?,
                project: row.get(3)?,
                updated_at: timestamp_at(row, 4)?,
            })
        })?;
        let mut recent_nodes = Vec::new();
        for row in rows {
            recent_nodes.push(row?);
        }

        Ok(StoreStatus {
            total_nodes: total_nodes as usize,
            total_edges: total_edges as usize,
            embedded_nodes: embedded_nodes as usize,
            pending_embeddings: self.stale_embedding_count()?,
            model_version: self.model_version().to_string(),
            counts_by_type,
            counts_by_project,
            recent_nodes,
            sync_states: self.sync_states()?,
        })
    }

    fn grouped_counts(&self, sql: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row?;
            counts.insert(key, count as usize);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Metadata, NewNode};
    use crate::core::schema::{NodeType, Relation};
    use crate::testing::{concept_store, failing_store};

    #[test]
    fn test_status_counts() -> Result<()> {
        let mut store = concept_store();
        let a = store.add_node(NewNode::new(NodeType::Decision, "a", "x").project("p1"))?;
        let b = store.add_node(NewNode::new(NodeType::Decision, "b", "x").project("p2"))?;
        store.add_node(NewNode::new(NodeType::Note, "c", "x"))?;
        store.connect(&a.id, &b.id, Relation::RelatesTo, Metadata::new())?;

        let status = store.status(2)?;
        assert_eq!(status.total_nodes, 3);
        assert_eq!(status.total_edges, 1);
        assert_eq!(status.embedded_nodes, 3);
        assert_eq!(status.pending_embeddings, 0);
        assert_eq!(status.counts_by_type["decision"], 2);
        assert_eq!(status.counts_by_type["note"], 1);
        assert_eq!(status.counts_by_project["p1"], 1);
        assert_eq!(status.counts_by_project[NO_PROJECT], 1);
        assert_eq!(status.recent_nodes.len(), 2);
        assert!(status.sync_states.is_empty());
        Ok(())
    }

    #[test]
    fn test_status_reports_pending() -> Result<()> {
        let mut store = failing_store();
        store.add_node(NewNode::new(NodeType::Note, "a", "x"))?;

        let status = store.status(5)?;
        assert_eq!(status.embedded_nodes, 0);
        assert_eq!(status.pending_embeddings, 1);
        Ok(())
    }
}
