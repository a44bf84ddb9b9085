//! Graph store on SQLite
//!
//! Nodes, edges, embeddings and sync state live in one database file.
//! Every mutating call runs in a single transaction, so a node is never
//! visible without the embedding and edges written alongside it, and an
//! edge never references a node that failed to commit.

mod edges;
mod embeddings;
mod stats;
mod sync_state;
mod text_index;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info, warn};

use crate::core::model::{
    embedding_text, format_ts, now, parse_ts, Edge, EdgeSpec, Metadata, MetaValue, NewNode, Node,
    NodePatch, EMBEDDING_PENDING_KEY,
};
use crate::core::schema::NodeType;
use crate::error::{Result, SkeinError};
use crate::search::embedding::Embedder;

pub use edges::{Neighborhood, MAX_NEIGHBORHOOD_NODES};
pub use embeddings::RefreshStats;
pub use stats::{NodeSummary, StoreStatus, NO_PROJECT};
pub use text_index::fts_query;

pub(crate) use edges::connect_tx;
pub(crate) use embeddings::put_embedding_tx;

/// Pending embeddings retried after each successful write
const PENDING_RETRY_BATCH: usize = 8;

const NODE_COLUMNS: &str = "n.id, n.node_type, n.title, n.body, n.project, n.source, n.source_id, n.metadata, n.created_at, n.updated_at";

/// Restricts the candidate node set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub node_type: Option<NodeType>,
    pub project: Option<String>,
}

impl NodeFilter {
    /// `AND ...` clauses over alias `n`, pushing their parameters
    fn sql(&self, params: &mut Vec<String>) -> String {
        let mut clause = String::new();
        if let Some(t) = self.node_type {
            clause.push_str(" AND n.node_type = ?");
            params.push(t.as_str().to_string());
        }
        if let Some(p) = &self.project {
            clause.push_str(" AND n.project = ?");
            params.push(p.clone());
        }
        clause
    }
}

/// Durable node/edge/embedding store
pub struct GraphStore {
    conn: Connection,
    embedder: Arc<dyn Embedder>,
}

impl GraphStore {
    /// Open or create database at path
    pub fn open(db_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let store = Self::with_connection(conn, embedder)?;
        info!(path = %db_path.display(), model = store.model_version(), "graph store opened");
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embedder)
    }

    fn with_connection(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn, embedder };
        store.init_schema()?;
        store.record_embedding_space()?;
        Ok(store)
    }

    /// Remember the active model; a change leaves old vectors stale until refreshed
    fn record_embedding_space(&self) -> Result<()> {
        let dimension = self.dimension().to_string();
        let previous_model = self.get_meta("model_version")?;
        let previous_dimension = self.get_meta("embedding_dimension")?;

        if let Some(prev) = &previous_model {
            if prev != self.model_version() || previous_dimension.as_deref() != Some(&dimension) {
                warn!(
                    previous = %prev,
                    current = self.model_version(),
                    "embedding model changed, stored vectors will be refreshed"
                );
            }
        }
        self.set_meta("model_version", self.model_version())?;
        self.set_meta("embedding_dimension", &dimension)?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- seq is the stable row key the text index points at
            CREATE TABLE IF NOT EXISTS nodes (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                node_type TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                project TEXT,
                source TEXT NOT NULL,
                source_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_source
                ON nodes(source, source_id) WHERE source_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
            CREATE INDEX IF NOT EXISTS idx_nodes_project ON nodes(project);
            CREATE INDEX IF NOT EXISTS idx_nodes_updated ON nodes(updated_at DESC);

            -- Text index over title + body, kept in step by triggers
            CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
                title, body, content='nodes', content_rowid='seq'
            );

            CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
                INSERT INTO nodes_fts(rowid, title, body) VALUES (new.seq, new.title, new.body);
            END;
            CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
                INSERT INTO nodes_fts(nodes_fts, rowid, title, body)
                    VALUES ('delete', old.seq, old.title, old.body);
            END;
            CREATE TRIGGER IF NOT EXISTS nodes_au AFTER UPDATE OF title, body ON nodes BEGIN
                INSERT INTO nodes_fts(nodes_fts, rowid, title, body)
                    VALUES ('delete', old.seq, old.title, old.body);
                INSERT INTO nodes_fts(rowid, title, body) VALUES (new.seq, new.title, new.body);
            END;

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                relation TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(source_id, target_id, relation),
                CHECK (source_id <> target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

            -- One vector per node, tagged with the producing model
            CREATE TABLE IF NOT EXISTS embeddings (
                node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                model_version TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_version);

            CREATE TABLE IF NOT EXISTS sync_state (
                connector_name TEXT PRIMARY KEY,
                cursor TEXT NOT NULL,
                last_run_at TEXT,
                last_success_count INTEGER NOT NULL DEFAULT 0,
                last_failure_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;

        Ok(())
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn model_version(&self) -> &str {
        self.embedder.model_version()
    }

    /// Vector length every stored embedding must have
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Run `f` in one transaction; commits on `Ok`, rolls back on `Err`
    pub(crate) fn transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Embed `title`/`body`; `None` when the adapter fails or misbehaves
    pub(crate) fn compute_embedding(&self, title: &str, body: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(&embedding_text(title, body)) {
            Ok(vector) if vector.len() == self.dimension() => Some(vector),
            Ok(vector) => {
                warn!(
                    expected = self.dimension(),
                    got = vector.len(),
                    "embedder returned a vector of the wrong length"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "embedding unavailable, node stays pending");
                None
            }
        }
    }

    // ===== Nodes =====

    /// Create a node; its embedding is computed synchronously.
    ///
    /// If the embedder fails the node is still committed, flagged
    /// `embedding_pending`, and picked up by [`GraphStore::refresh_embeddings`].
    pub fn add_node(&mut self, new: NewNode) -> Result<Node> {
        let (node, _) = self.add_node_with_edges(new, &[])?;
        Ok(node)
    }

    /// Create a node plus outgoing edges atomically
    pub fn add_node_with_edges(
        &mut self,
        new: NewNode,
        edges: &[EdgeSpec],
    ) -> Result<(Node, Vec<Edge>)> {
        let vector = self.compute_embedding(&new.title, &new.body);
        let model_version = self.model_version().to_string();

        let ts = now();
        let mut node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            node_type: new.node_type,
            title: new.title,
            body: new.body,
            project: new.project,
            source: new.source,
            source_id: new.source_id,
            metadata: new.metadata,
            created_at: ts,
            updated_at: ts,
        };
        node.metadata.remove(EMBEDDING_PENDING_KEY);
        if vector.is_none() {
            node.metadata
                .insert(EMBEDDING_PENDING_KEY.to_string(), MetaValue::Bool(true));
        }

        let created_edges = self.transaction(|tx| {
            if let Some(source_id) = &node.source_id {
                if find_by_source_in(tx, &node.source, source_id)?.is_some() {
                    return Err(SkeinError::validation(format!(
                        "a node for {}:{} already exists",
                        node.source, source_id
                    )));
                }
            }
            insert_node_tx(tx, &node)?;
            if let Some(vector) = &vector {
                put_embedding_tx(tx, &node.id, vector, &model_version)?;
            }
            let mut created = Vec::with_capacity(edges.len());
            for spec in edges {
                let (edge, _) = connect_tx(
                    tx,
                    &node.id,
                    &spec.target_id,
                    spec.relation,
                    &spec.metadata,
                )?;
                created.push(edge);
            }
            Ok(created)
        })?;

        debug!(id = %node.id, node_type = %node.node_type, edges = created_edges.len(), "node added");

        if vector.is_some() {
            self.retry_pending_quietly();
        }

        Ok((node, created_edges))
    }

    fn retry_pending_quietly(&mut self) {
        match self.refresh_embeddings(Some(PENDING_RETRY_BATCH)) {
            Ok(stats) if stats.refreshed > 0 => {
                debug!(refreshed = stats.refreshed, "completed pending embeddings")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "pending embedding retry failed"),
        }
    }

    /// Get a node by id
    pub fn get_node(&self, id: &str) -> Result<Node> {
        find_node_in(&self.conn, id)?.ok_or_else(|| SkeinError::not_found(format!("node {}", id)))
    }

    pub fn find_node(&self, id: &str) -> Result<Option<Node>> {
        find_node_in(&self.conn, id)
    }

    /// Node created by `source` for external id `source_id`
    pub fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Node>> {
        find_by_source_in(&self.conn, source, source_id)
    }

    /// Nodes matching `filter`, most recently updated first
    pub fn list_nodes(&self, filter: &NodeFilter, limit: usize) -> Result<Vec<Node>> {
        let mut values = Vec::new();
        let clause = filter.sql(&mut values);
        let sql = format!(
            "SELECT {} FROM nodes n WHERE 1 = 1{} ORDER BY n.updated_at DESC, n.id ASC LIMIT {}",
            NODE_COLUMNS, clause, limit
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), node_from_row)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    /// Number of nodes matching `filter`
    pub fn count_nodes(&self, filter: &NodeFilter) -> Result<usize> {
        let mut values = Vec::new();
        let clause = filter.sql(&mut values);
        let sql = format!("SELECT COUNT(*) FROM nodes n WHERE 1 = 1{}", clause);
        let count: i64 = self.conn.query_row(
            &sql,
            rusqlite::params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Update title/body/project/metadata; re-embeds when the text changed
    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> Result<Node> {
        let current = self.get_node(id)?;
        let mut node = current.clone();
        if let Some(title) = patch.title {
            node.title = title;
        }
        if let Some(body) = patch.body {
            node.body = body;
        }
        if let Some(project) = patch.project {
            node.project = Some(project);
        }
        if let Some(meta) = patch.metadata {
            for (key, value) in meta {
                if key != EMBEDDING_PENDING_KEY {
                    node.metadata.insert(key, value);
                }
            }
        }

        let text_changed = node.title != current.title || node.body != current.body;
        let vector = if text_changed {
            self.compute_embedding(&node.title, &node.body)
        } else {
            None
        };
        if vector.is_some() {
            node.metadata.remove(EMBEDDING_PENDING_KEY);
        } else if text_changed {
            node.metadata
                .insert(EMBEDDING_PENDING_KEY.to_string(), MetaValue::Bool(true));
        }
        node.updated_at = now().max(node.created_at);

        let model_version = self.model_version().to_string();
        self.transaction(|tx| {
            update_node_tx(tx, &node)?;
            if text_changed {
                match &vector {
                    Some(v) => put_embedding_tx(tx, &node.id, v, &model_version)?,
                    None => {
                        tx.execute("DELETE FROM embeddings WHERE node_id = ?1", params![node.id])?;
                    }
                }
            }
            Ok(())
        })?;

        debug!(id = %node.id, reembedded = vector.is_some(), "node updated");
        Ok(node)
    }

    /// Remove a node with its edges and embedding
    pub fn delete_node(&mut self, id: &str) -> Result<()> {
        let removed = self.transaction(|tx| {
            tx.execute(
                "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM embeddings WHERE node_id = ?1", params![id])?;
            Ok(tx.execute("DELETE FROM nodes WHERE id = ?1", params![id])?)
        })?;

        if removed == 0 {
            return Err(SkeinError::not_found(format!("node {}", id)));
        }
        debug!(id, "node deleted");
        Ok(())
    }

    // ===== Store metadata =====

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }
}

// ===== Row helpers shared by the submodules =====

pub(crate) fn insert_node_tx(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO nodes (id, node_type, title, body, project, source, source_id, metadata, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            node.id,
            node.node_type.as_str(),
            node.title,
            node.body,
            node.project,
            node.source,
            node.source_id,
            serde_json::to_string(&node.metadata)?,
            format_ts(&node.created_at),
            format_ts(&node.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn update_node_tx(conn: &Connection, node: &Node) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE nodes SET node_type = ?2, title = ?3, body = ?4, project = ?5,
            metadata = ?6, updated_at = ?7
        WHERE id = ?1
        "#,
        params![
            node.id,
            node.node_type.as_str(),
            node.title,
            node.body,
            node.project,
            serde_json::to_string(&node.metadata)?,
            format_ts(&node.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(SkeinError::not_found(format!("node {}", node.id)));
    }
    Ok(())
}

pub(crate) fn find_node_in(conn: &Connection, id: &str) -> Result<Option<Node>> {
    let sql = format!("SELECT {} FROM nodes n WHERE n.id = ?1", NODE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], node_from_row).optional()?)
}

pub(crate) fn find_by_source_in(
    conn: &Connection,
    source: &str,
    source_id: &str,
) -> Result<Option<Node>> {
    let sql = format!(
        "SELECT {} FROM nodes n WHERE n.source = ?1 AND n.source_id = ?2",
        NODE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![source, source_id], node_from_row)
        .optional()?)
}

pub(crate) fn node_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Map a row selected with `NODE_COLUMNS`
fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let type_raw: String = row.get(1)?;
    let node_type = type_raw
        .parse::<NodeType>()
        .map_err(|e| conversion_error(1, e.to_string()))?;
    let metadata_raw: String = row.get(7)?;
    let metadata: Metadata = serde_json::from_str(&metadata_raw)
        .map_err(|e| conversion_error(7, format!("metadata: {}", e)))?;

    Ok(Node {
        id: row.get(0)?,
        node_type,
        title: row.get(2)?,
        body: row.get(3)?,
        project: row.get(4)?,
        source: row.get(5)?,
        source_id: row.get(6)?,
        metadata,
        created_at: timestamp_at(row, 8)?,
        updated_at: timestamp_at(row, 9)?,
    })
}

pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{}'", raw)))
}

pub(crate) fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}
