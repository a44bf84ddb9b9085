//! Vector persistence and embedding refresh

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{GraphStore, NodeFilter};
use crate::core::model::{format_ts, now, Embedding, EMBEDDING_PENDING_KEY};
use crate::error::{Result, SkeinError};

/// Outcome of a [`GraphStore::refresh_embeddings`] pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStats {
    pub refreshed: usize,
    pub failed: usize,
    /// Nodes still missing a current embedding
    pub still_pending: usize,
}

impl GraphStore {
    /// Store a vector for an existing node, replacing any previous one
    pub fn put_embedding(&mut self, node_id: &str, vector: &[f32], model_version: &str) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(SkeinError::validation(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension(),
                vector.len()
            )));
        }
        self.transaction(|tx| {
            if !super::node_exists(tx, node_id)? {
                return Err(SkeinError::not_found(format!("node {}", node_id)));
            }
            put_embedding_tx(tx, node_id, vector, model_version)
        })
    }

    pub fn get_embedding(&self, node_id: &str) -> Result<Option<Embedding>> {
        let row = self
            .conn
            .query_row(
                "SELECT vector, model_version FROM embeddings WHERE node_id = ?1",
                params![node_id],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(blob, model_version)| Embedding {
            node_id: node_id.to_string(),
            vector: blob_to_embedding(&blob),
            model_version,
        }))
    }

    /// `(node_id, vector)` for nodes in `filter` embedded by `model_version`
    pub fn embeddings_for(
        &self,
        filter: &NodeFilter,
        model_version: &str,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let mut values = vec![model_version.to_string(), self.dimension().to_string()];
        let clause = filter.sql(&mut values);
        let sql = format!(
            r#"
            SELECT n.id, e.vector
            FROM embeddings e
            JOIN nodes n ON n.id = e.node_id
            WHERE e.model_version = ? AND e.dimension = ?{}
            ORDER BY n.id
            "#,
            clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            out.push((id, blob_to_embedding(&blob)));
        }
        Ok(out)
    }

    /// Nodes without an embedding from the active model
    pub fn stale_embedding_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM nodes n
            LEFT JOIN embeddings e ON e.node_id = n.id
            WHERE e.node_id IS NULL OR e.model_version != ?1 OR e.dimension != ?2
            "#,
            params![self.model_version(), self.dimension() as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Embed nodes that are pending or were embedded by another model.
    ///
    /// Stops at the first adapter failure; the rest stay pending for the next pass.
    pub fn refresh_embeddings(&mut self, limit: Option<usize>) -> Result<RefreshStats> {
        let batch: Vec<(String, String, String)> = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT n.id, n.title, n.body FROM nodes n
                LEFT JOIN embeddings e ON e.node_id = n.id
                WHERE e.node_id IS NULL OR e.model_version != ?1 OR e.dimension != ?2
                ORDER BY n.updated_at ASC, n.id ASC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt.query_map(
                params![
                    self.model_version(),
                    self.dimension() as i64,
                    limit.map(|l| l as i64).unwrap_or(-1)
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            collected
        };

        let mut stats = RefreshStats::default();
        let model_version = self.model_version().to_string();

        for (id, title, body) in &batch {
            match self.compute_embedding(title, body) {
                Some(vector) => {
                    self.transaction(|tx| put_embedding_tx(tx, id, &vector, &model_version))?;
                    stats.refreshed += 1;
                }
                None => {
                    stats.failed += 1;
                    mark_pending(&self.conn, id);
                    break;
                }
            }
        }

        stats.still_pending = self.stale_embedding_count()?;
        if stats.refreshed > 0 || stats.failed > 0 {
            info!(
                refreshed = stats.refreshed,
                failed = stats.failed,
                still_pending = stats.still_pending,
                "embedding refresh"
            );
            self.set_meta("last_embedding_refresh", &format_ts(&now()))?;
        } else {
            debug!("no embeddings to refresh");
        }
        Ok(stats)
    }
}

/// Upsert a node's vector and clear its pending flag
pub(crate) fn put_embedding_tx(
    conn: &Connection,
    node_id: &str,
    vector: &[f32],
    model_version: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO embeddings (node_id, vector, dimension, model_version, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(node_id) DO UPDATE SET
            vector = excluded.vector,
            dimension = excluded.dimension,
            model_version = excluded.model_version,
            created_at = excluded.created_at
        "#,
        params![
            node_id,
            embedding_to_blob(vector),
            vector.len() as i64,
            model_version,
            format_ts(&now()),
        ],
    )?;
    clear_pending_tx(conn, node_id)
}

fn clear_pending_tx(conn: &Connection, node_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE nodes SET metadata = json_remove(metadata, ?2) WHERE id = ?1",
        params![node_id, format!("$.{}", EMBEDDING_PENDING_KEY)],
    )?;
    Ok(())
}

fn mark_pending(conn: &Connection, node_id: &str) {
    if let Err(e) = conn.execute(
        "UPDATE nodes SET metadata = json_set(metadata, ?2, json('true')) WHERE id = ?1",
        params![node_id, format!("$.{}", EMBEDDING_PENDING_KEY)],
    ) {
        warn!(node_id, error = %e, "could not flag pending embedding");
    }
}

/// Convert embedding to little-endian bytes
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::model::NewNode;
    use crate::core::schema::NodeType;
    use crate::testing::{concept_store, ConceptEmbedder, FlakyEmbedder, CONCEPT_DIM};

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![1.0f32, -2.5, 3.25, 0.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&embedding)), embedding);
    }

    #[test]
    fn test_put_embedding_dimension_mismatch() -> Result<()> {
        let mut store = concept_store();
        let node = store.add_node(NewNode::new(NodeType::Note, "n", "rust"))?;
        let before = store.get_embedding(&node.id)?;

        let err = store
            .put_embedding(&node.id, &[1.0, 0.0], "concept-v1")
            .unwrap_err();
        assert!(matches!(err, SkeinError::Validation(_)));
        assert_eq!(store.get_embedding(&node.id)?, before);
        Ok(())
    }

    #[test]
    fn test_put_embedding_unknown_node() {
        let mut store = concept_store();
        let err = store
            .put_embedding("ghost", &vec![0.5; CONCEPT_DIM], "concept-v1")
            .unwrap_err();
        assert!(matches!(err, SkeinError::NotFound(_)));
    }

    #[test]
    fn test_embeddings_for_filters_by_model_version() -> Result<()> {
        let mut store = concept_store();
        let a = store.add_node(NewNode::new(NodeType::Note, "a", "rust"))?;
        let b = store.add_node(NewNode::new(NodeType::Note, "b", "python"))?;
        store.put_embedding(&b.id, &vec![1.0; CONCEPT_DIM], "old-model")?;

        let current = store.embeddings_for(&NodeFilter::default(), "concept-v1")?;
        let ids: Vec<&str> = current.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str()]);
        assert_eq!(store.stale_embedding_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_refresh_completes_pending_after_recovery() -> Result<()> {
        let flaky = Arc::new(FlakyEmbedder::new(ConceptEmbedder::new()));
        let mut store = GraphStore::open_in_memory(flaky.clone())?;

        flaky.set_available(false);
        let a = store.add_node(NewNode::new(NodeType::Note, "a", "rust"))?;
        let b = store.add_node(NewNode::new(NodeType::Note, "b", "database"))?;
        assert!(store.get_node(&a.id)?.embedding_pending());

        let stats = store.refresh_embeddings(None)?;
        assert_eq!(stats.refreshed, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.still_pending, 2);

        flaky.set_available(true);
        let stats = store.refresh_embeddings(None)?;
        assert_eq!(stats.refreshed, 2);
        assert_eq!(stats.still_pending, 0);
        assert!(!store.get_node(&a.id)?.embedding_pending());
        assert!(!store.get_node(&b.id)?.embedding_pending());
        assert!(store.get_meta("last_embedding_refresh")?.is_some());
        Ok(())
    }

    #[test]
    fn test_successful_add_retries_pending() -> Result<()> {
        let flaky = Arc::new(FlakyEmbedder::new(ConceptEmbedder::new()));
        let mut store = GraphStore::open_in_memory(flaky.clone())?;

        flaky.set_available(false);
        let pending = store.add_node(NewNode::new(NodeType::Note, "p", "rust"))?;
        flaky.set_available(true);
        store.add_node(NewNode::new(NodeType::Note, "q", "python"))?;

        assert!(store.get_embedding(&pending.id)?.is_some());
        assert!(!store.get_node(&pending.id)?.embedding_pending());
        Ok(())
    }
}
