//! Edge writes and graph traversal

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use super::{conversion_error, find_node_in, node_exists, timestamp_at, GraphStore};
use crate::core::model::{format_ts, now, Edge, Metadata, Node};
use crate::core::schema::Relation;
use crate::error::{Result, SkeinError};

/// Upper bound on nodes returned by one neighborhood call
pub const MAX_NEIGHBORHOOD_NODES: usize = 500;

const EDGE_COLUMNS: &str = "id, source_id, target_id, relation, metadata, created_at";

/// A node plus the nodes and edges within a number of hops
#[derive(Debug, Clone, Serialize)]
pub struct Neighborhood {
    pub node: Node,
    /// Reached nodes in traversal order, root excluded
    pub nodes: Vec<Node>,
    /// Traversed edges; both endpoints are always in the result
    pub edges: Vec<Edge>,
    /// Set when traversal stopped at [`MAX_NEIGHBORHOOD_NODES`]
    pub truncated: bool,
}

impl GraphStore {
    /// Create a directed edge; returns the existing one when already present
    pub fn connect(
        &mut self,
        source_id: &str,
        target_id: &str,
        relation: Relation,
        metadata: Metadata,
    ) -> Result<Edge> {
        let (edge, created) =
            self.transaction(|tx| connect_tx(tx, source_id, target_id, relation, &metadata))?;
        debug!(source_id, target_id, relation = %relation, created, "connect");
        Ok(edge)
    }

    /// All edges touching `node_id`, oldest first
    pub fn incident_edges(&self, node_id: &str) -> Result<Vec<Edge>> {
        incident_edges_in(&self.conn, node_id)
    }

    /// Breadth-first walk of `hops` steps, following edges in both directions.
    ///
    /// At each step new nodes are visited in edge creation order, then by id,
    /// so the result is deterministic for a given store.
    pub fn neighborhood(&self, id: &str, hops: usize) -> Result<Neighborhood> {
        let root = self.get_node(id)?;

        let mut visited: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut order: Vec<String> = Vec::new();
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut edges = Vec::new();
        let mut truncated = false;

        let mut frontier = vec![root.id.clone()];
        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for current in &frontier {
                for edge in incident_edges_in(&self.conn, current)? {
                    let other = if edge.source_id == *current {
                        &edge.target_id
                    } else {
                        &edge.source_id
                    };
                    if !visited.contains(other) {
                        if visited.len() >= MAX_NEIGHBORHOOD_NODES {
                            truncated = true;
                            continue;
                        }
                        visited.insert(other.clone());
                        order.push(other.clone());
                        next.push(other.clone());
                    }
                    if seen_edges.insert(edge.id.clone()) {
                        edges.push(edge);
                    }
                }
            }
            frontier = next;
        }

        let mut nodes = Vec::with_capacity(order.len());
        for node_id in &order {
            if let Some(node) = find_node_in(&self.conn, node_id)? {
                nodes.push(node);
            }
        }

        Ok(Neighborhood {
            node: root,
            nodes,
            edges,
            truncated,
        })
    }
}

/// Insert an edge inside an open transaction.
///
/// Returns the edge and whether it was newly created.
pub(crate) fn connect_tx(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    relation: Relation,
    metadata: &Metadata,
) -> Result<(Edge, bool)> {
    if source_id.is_empty() || target_id.is_empty() {
        return Err(SkeinError::validation("edge endpoints cannot be empty"));
    }
    if source_id == target_id {
        return Err(SkeinError::validation(format!(
            "self-loop edge on node {}",
            source_id
        )));
    }
    for id in [source_id, target_id] {
        if !node_exists(conn, id)? {
            return Err(SkeinError::not_found(format!("node {}", id)));
        }
    }

    let existing = conn
        .query_row(
            &format!(
                "SELECT {} FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                EDGE_COLUMNS
            ),
            params![source_id, target_id, relation.as_str()],
            edge_from_row,
        )
        .optional()?;
    if let Some(edge) = existing {
        return Ok((edge, false));
    }

    let edge = Edge {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        relation,
        metadata: metadata.clone(),
        created_at: now(),
    };
    conn.execute(
        r#"
        INSERT INTO edges (id, source_id, target_id, relation, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            edge.id,
            edge.source_id,
            edge.target_id,
            edge.relation.as_str(),
            serde_json::to_string(&edge.metadata)?,
            format_ts(&edge.created_at),
        ],
    )?;
    Ok((edge, true))
}

fn incident_edges_in(conn: &Connection, node_id: &str) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {},
            CASE WHEN source_id = ?1 THEN target_id ELSE source_id END AS other
        FROM edges
        WHERE source_id = ?1 OR target_id = ?1
        ORDER BY created_at ASC, other ASC, id ASC
        "#,
        EDGE_COLUMNS
    ))?;
    let rows = stmt.query_map(params![node_id], edge_from_row)?;

    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let relation_raw: String = row.get(3)?;
    let relation = relation_raw
        .parse::<Relation>()
        .map_err(|e| conversion_error(3, e.to_string()))?;
    let metadata_raw: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_raw)
        .map_err(|e| conversion_error(4, format!("metadata: {}", e)))?;

    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation,
        metadata,
        created_at: timestamp_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::NewNode;
    use crate::core::schema::NodeType;
    use crate::testing::concept_store;

    fn note(store: &mut GraphStore, title: &str) -> Node {
        store
            .add_node(NewNode::new(NodeType::Note, title, "body"))
            .unwrap()
    }

    #[test]
    fn test_connect_is_idempotent() -> Result<()> {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let b = note(&mut store, "b");

        let first = store.connect(&a.id, &b.id, Relation::DependsOn, Metadata::new())?;
        let second = store.connect(&a.id, &b.id, Relation::DependsOn, Metadata::new())?;

        assert_eq!(first.id, second.id);
        assert_eq!(store.incident_edges(&a.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_different_relations_between_same_pair() -> Result<()> {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let b = note(&mut store, "b");

        store.connect(&a.id, &b.id, Relation::DependsOn, Metadata::new())?;
        store.connect(&a.id, &b.id, Relation::InformedBy, Metadata::new())?;
        store.connect(&b.id, &a.id, Relation::DependsOn, Metadata::new())?;

        assert_eq!(store.incident_edges(&a.id)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let err = store
            .connect(&a.id, &a.id, Relation::RelatesTo, Metadata::new())
            .unwrap_err();
        assert!(matches!(err, SkeinError::Validation(_)));
    }

    #[test]
    fn test_missing_endpoint_not_found() {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let err = store
            .connect(&a.id, "ghost", Relation::RelatesTo, Metadata::new())
            .unwrap_err();
        assert!(matches!(err, SkeinError::NotFound(_)));
    }

    #[test]
    fn test_neighborhood_hops() -> Result<()> {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let b = note(&mut store, "b");
        let c = note(&mut store, "c");
        store.connect(&a.id, &b.id, Relation::DependsOn, Metadata::new())?;
        store.connect(&b.id, &c.id, Relation::DependsOn, Metadata::new())?;

        let one = store.neighborhood(&a.id, 1)?;
        let ids: Vec<&str> = one.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str()]);
        assert_eq!(one.edges.len(), 1);

        let two = store.neighborhood(&a.id, 2)?;
        let ids: Vec<&str> = two.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), c.id.as_str()]);
        assert_eq!(two.edges.len(), 2);

        // Incoming edges are followed too
        let from_c = store.neighborhood(&c.id, 2)?;
        assert_eq!(from_c.nodes.len(), 2);

        let zero = store.neighborhood(&a.id, 0)?;
        assert!(zero.nodes.is_empty());
        assert!(zero.edges.is_empty());
        assert!(!one.truncated);
        Ok(())
    }

    #[test]
    fn test_neighborhood_handles_cycles() -> Result<()> {
        let mut store = concept_store();
        let a = note(&mut store, "a");
        let b = note(&mut store, "b");
        let c = note(&mut store, "c");
        store.connect(&a.id, &b.id, Relation::RelatesTo, Metadata::new())?;
        store.connect(&b.id, &c.id, Relation::RelatesTo, Metadata::new())?;
        store.connect(&c.id, &a.id, Relation::RelatesTo, Metadata::new())?;

        let hood = store.neighborhood(&a.id, 5)?;
        assert_eq!(hood.nodes.len(), 2);
        assert_eq!(hood.edges.len(), 3);
        Ok(())
    }

    #[test]
    fn test_neighborhood_tie_break() -> Result<()> {
        let mut store = concept_store();
        let hub = note(&mut store, "hub");
        let first = note(&mut store, "first");
        let x = note(&mut store, "x");
        let y = note(&mut store, "y");
        let e_first = store.connect(&hub.id, &first.id, Relation::RelatesTo, Metadata::new())?;
        let e_x = store.connect(&x.id, &hub.id, Relation::RelatesTo, Metadata::new())?;
        let e_y = store.connect(&hub.id, &y.id, Relation::RelatesTo, Metadata::new())?;

        // Pin creation times: `first` is oldest, x and y share a timestamp
        let t0 = chrono::Utc::now() - chrono::Duration::hours(1);
        let t1 = t0 + chrono::Duration::seconds(1);
        for (edge, ts) in [(&e_first, t0), (&e_x, t1), (&e_y, t1)] {
            store.conn.execute(
                "UPDATE edges SET created_at = ?1 WHERE id = ?2",
                params![format_ts(&ts), edge.id],
            )?;
        }

        let hood = store.neighborhood(&hub.id, 1)?;
        let ids: Vec<&str> = hood.nodes.iter().map(|n| n.id.as_str()).collect();
        let (lo, hi) = if x.id < y.id { (&x.id, &y.id) } else { (&y.id, &x.id) };
        assert_eq!(ids, vec![first.id.as_str(), lo.as_str(), hi.as_str()]);

        // Stable across calls
        let again = store.neighborhood(&hub.id, 1)?;
        assert_eq!(
            again.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            ids
        );
        Ok(())
    }

    #[test]
    fn test_neighborhood_is_capped() -> Result<()> {
        let mut store = concept_store();
        let hub = note(&mut store, "hub");
        for i in 0..MAX_NEIGHBORHOOD_NODES + 20 {
            let spoke = note(&mut store, &format!("spoke {}", i));
            store.connect(&hub.id, &spoke.id, Relation::RelatesTo, Metadata::new())?;
        }

        let hood = store.neighborhood(&hub.id, 1)?;
        // The root counts toward the cap
        assert_eq!(hood.nodes.len(), MAX_NEIGHBORHOOD_NODES - 1);
        assert_eq!(hood.edges.len(), MAX_NEIGHBORHOOD_NODES - 1);
        assert!(hood.truncated);
        for edge in &hood.edges {
            assert!(hood.nodes.iter().any(|n| n.id == edge.target_id));
        }
        Ok(())
    }

    #[test]
    fn test_neighborhood_unknown_root() {
        let store = concept_store();
        assert!(matches!(
            store.neighborhood("ghost", 1),
            Err(SkeinError::NotFound(_))
        ));
    }
}
