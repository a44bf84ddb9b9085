//! Sync Coordinator
//!
//! Pulls records from external sources through the [`Connector`] capability
//! and upserts them into the graph store, keyed by `(connector, external id)`.
//! A failing record is reported and skipped; the cursor never moves past it.

pub mod cursor;
pub mod wcp;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::SkeinConfig;
use crate::core::model::{now, Metadata, MetaValue, Node, SyncState, EMBEDDING_PENDING_KEY};
use crate::core::schema::{NodeType, Relation};
use crate::error::{Result, SkeinError};
use crate::store::{
    connect_tx, find_by_source_in, insert_node_tx, put_embedding_tx, update_node_tx, GraphStore,
};

pub use cursor::SyncCursor;
pub use wcp::WcpConnector;

/// Cursor is persisted with every Nth committed record
const CHECKPOINT_EVERY: usize = 25;

/// One item a connector can produce, before loading its content
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub external_id: String,
    pub modified: DateTime<Utc>,
    /// Connector-specific location (file path, URL, ...)
    pub locator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// record -> target
    Outgoing,
    /// target -> record
    Incoming,
}

/// Relationship to another record of the same connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordLink {
    pub target: String,
    pub relation: Relation,
    pub direction: LinkDirection,
}

/// Loaded content of a [`SourceEntry`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalRecord {
    pub external_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub body: String,
    pub project: Option<String>,
    pub metadata: Metadata,
    pub links: Vec<RecordLink>,
}

impl ExternalRecord {
    fn checksum(&self) -> Result<String> {
        Ok(cursor::sha256_hex(&serde_json::to_vec(self)?))
    }

    fn validate(&self, entry: &SourceEntry) -> Result<()> {
        if self.external_id != entry.external_id {
            return Err(SkeinError::validation(format!(
                "record id '{}' does not match entry '{}'",
                self.external_id, entry.external_id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(SkeinError::validation("record has an empty title"));
        }
        for link in &self.links {
            if link.target.trim().is_empty() {
                return Err(SkeinError::validation("link with an empty target"));
            }
            if link.target == self.external_id {
                return Err(SkeinError::validation(format!(
                    "record links to itself ({})",
                    link.relation
                )));
            }
        }
        Ok(())
    }
}

/// Source of external records
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// All entries in the source's natural order (oldest modification first)
    fn list(&self) -> Result<Vec<SourceEntry>>;

    fn load(&self, entry: &SourceEntry) -> Result<ExternalRecord>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecordError {
    pub external_id: String,
    pub message: String,
}

/// Outcome of one connector run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub connector: String,
    pub full: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub edges_created: usize,
    /// Links whose target did not exist by the end of the run
    pub unresolved: usize,
    pub failed: usize,
    pub errors: Vec<SyncRecordError>,
}

impl SyncReport {
    fn new(connector: &str, full: bool) -> Self {
        Self {
            connector: connector.to_string(),
            full,
            ..Default::default()
        }
    }

    fn record_failure(&mut self, external_id: &str, err: &SkeinError) {
        self.failed += 1;
        self.errors.push(SyncRecordError {
            external_id: external_id.to_string(),
            message: err.to_string(),
        });
    }

    /// `SyncPartialFailure` when any record failed
    pub fn ensure_complete(&self) -> Result<()> {
        if self.failed > 0 {
            return Err(SkeinError::SyncPartialFailure {
                failed: self.failed,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upsert {
    Created,
    Updated,
    Unchanged,
}

/// Link waiting for its target to appear later in the run
struct DeferredLink {
    source: String,
    link: RecordLink,
}

/// Runs registered connectors against a [`GraphStore`]
#[derive(Default)]
pub struct SyncCoordinator {
    connectors: BTreeMap<String, Box<dyn Connector>>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the connectors named in `connectors:`
    pub fn from_config(config: &SkeinConfig) -> Result<Self> {
        let mut coordinator = Self::new();
        for (name, path) in &config.connectors {
            match name.as_str() {
                wcp::CONNECTOR_NAME => {
                    coordinator.register(Box::new(WcpConnector::new(path.clone())))
                }
                other => {
                    return Err(SkeinError::config(format!(
                        "unknown connector '{}' (available: {})",
                        other,
                        wcp::CONNECTOR_NAME
                    )))
                }
            }
        }
        Ok(coordinator)
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    pub fn names(&self) -> Vec<&str> {
        self.connectors.keys().map(String::as_str).collect()
    }

    /// Run every connector in name order
    pub fn sync_all(&self, store: &mut GraphStore, full: bool) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(self.connectors.len());
        for name in self.connectors.keys() {
            reports.push(self.sync(store, name, full)?);
        }
        Ok(reports)
    }

    /// Sync one connector.
    ///
    /// Per-record failures land in the report; only storage faults on the
    /// coordinator's own bookkeeping abort the run.
    pub fn sync(&self, store: &mut GraphStore, name: &str, full: bool) -> Result<SyncReport> {
        let connector = self
            .connectors
            .get(name)
            .ok_or_else(|| SkeinError::not_found(format!("connector {}", name)))?;

        let mut cursor = if full {
            SyncCursor::default()
        } else {
            store
                .sync_state(name)?
                .map(|state| SyncCursor::parse(&state.cursor))
                .unwrap_or_default()
        };
        let mut report = SyncReport::new(name, full);
        info!(connector = name, full, "sync started");

        let entries = match connector.list() {
            Ok(entries) => {
                cursor.retain_listed(&entries);
                entries
            }
            Err(e) => {
                warn!(connector = name, error = %e, "listing source failed");
                report.record_failure("*", &e);
                self.finish(store, name, &cursor, &report)?;
                return Ok(report);
            }
        };

        let mut run = Run {
            connector: connector.as_ref(),
            cursor: &mut cursor,
            report: &mut report,
            deferred: Vec::new(),
            prefix_intact: true,
            committed: 0,
        };
        for entry in &entries {
            if run.cursor.is_behind_watermark(entry) {
                continue;
            }
            if let Err(e) = run.process(store, entry) {
                warn!(connector = name, external_id = %entry.external_id, error = %e, "sync record failed");
                run.report.record_failure(&entry.external_id, &e);
                run.cursor.retry.insert(entry.external_id.clone());
                if run.cursor.watermark.map_or(true, |mark| entry.modified > mark) {
                    run.prefix_intact = false;
                }
            }
        }
        run.resolve_deferred(store);

        self.finish(store, name, &cursor, &report)?;
        info!(
            connector = name,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            edges = report.edges_created,
            unresolved = report.unresolved,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    fn finish(
        &self,
        store: &mut GraphStore,
        name: &str,
        cursor: &SyncCursor,
        report: &SyncReport,
    ) -> Result<()> {
        let state = SyncState {
            connector_name: name.to_string(),
            cursor: cursor.to_json()?,
            last_run_at: Some(now()),
            last_success_count: report.created + report.updated + report.unchanged,
            last_failure_count: report.failed,
        };
        store.save_sync_state(&state)
    }
}

/// State of one connector run
struct Run<'a> {
    connector: &'a dyn Connector,
    cursor: &'a mut SyncCursor,
    report: &'a mut SyncReport,
    deferred: Vec<DeferredLink>,
    /// No failure yet beyond the watermark
    prefix_intact: bool,
    committed: usize,
}

impl Run<'_> {
    fn process(&mut self, store: &mut GraphStore, entry: &SourceEntry) -> Result<()> {
        let connector = self.connector;
        let name = connector.name();
        let record = connector.load(entry)?;
        record.validate(entry)?;
        let checksum = record.checksum()?;
        let id = record.external_id.as_str();

        if self.cursor.is_unchanged(id, &checksum) && !self.cursor.retry.contains(id) {
            debug!(connector = name, external_id = id, "unchanged");
            self.report.unchanged += 1;
            if self.prefix_intact {
                self.cursor.advance_to(entry.modified);
            }
            return Ok(());
        }

        // Embed outside the transaction
        let existing = store.find_by_source(name, id)?;
        let text_changed = existing
            .as_ref()
            .map_or(true, |n| n.title != record.title || n.body != record.body);
        let vector = if text_changed {
            store.compute_embedding(&record.title, &record.body)
        } else {
            None
        };
        let model_version = store.model_version().to_string();

        self.committed += 1;
        let checkpoint_due = self.committed % CHECKPOINT_EVERY == 0;
        let cursor: &SyncCursor = self.cursor;
        let waiting = &self.deferred;
        let prefix_intact = self.prefix_intact;

        let (outcome, edges_created, deferred) = store.transaction(|tx| {
            let (node_id, outcome) =
                upsert_record_tx(tx, name, &record, vector.as_deref(), &model_version)?;

            let mut edges_created = 0;
            let mut deferred = Vec::new();
            for link in &record.links {
                match find_by_source_in(tx, name, &link.target)? {
                    Some(target) => {
                        let (from, to) = oriented(&node_id, &target.id, link.direction);
                        let (_, created) =
                            connect_tx(tx, from, to, link.relation, &Metadata::new())?;
                        if created {
                            edges_created += 1;
                        }
                    }
                    None => deferred.push(DeferredLink {
                        source: record.external_id.clone(),
                        link: link.clone(),
                    }),
                }
            }

            if checkpoint_due {
                // Records with links still waiting must be revisited after a crash
                let mut next = cursor.clone();
                record_progress(&mut next, entry, checksum.clone(), prefix_intact);
                next.retry
                    .extend(waiting.iter().chain(&deferred).map(|d| d.source.clone()));
                save_cursor_tx(tx, name, &next.to_json()?)?;
            }
            Ok((outcome, edges_created, deferred))
        })?;

        match outcome {
            Upsert::Created => self.report.created += 1,
            Upsert::Updated => self.report.updated += 1,
            Upsert::Unchanged => self.report.unchanged += 1,
        }
        self.report.edges_created += edges_created;
        self.deferred.extend(deferred);
        record_progress(self.cursor, entry, checksum, self.prefix_intact);

        debug!(connector = name, external_id = id, outcome = ?outcome, "record synced");
        Ok(())
    }

    /// Connect links whose targets appeared later in the run
    fn resolve_deferred(&mut self, store: &mut GraphStore) {
        let connector = self.connector;
        let name = connector.name();
        let mut unresolved_sources = BTreeSet::new();

        for DeferredLink { source, link } in std::mem::take(&mut self.deferred) {
            let result = store.transaction(|tx| {
                let from = find_by_source_in(tx, name, &source)?;
                let to = find_by_source_in(tx, name, &link.target)?;
                match (from, to) {
                    (Some(node), Some(target)) => {
                        let (a, b) = oriented(&node.id, &target.id, link.direction);
                        let (_, created) = connect_tx(tx, a, b, link.relation, &Metadata::new())?;
                        Ok(Some(created))
                    }
                    _ => Ok(None),
                }
            });

            match result {
                Ok(Some(true)) => self.report.edges_created += 1,
                Ok(Some(false)) => {}
                Ok(None) => {
                    warn!(connector = name, source = %source, target = %link.target, "unresolved link");
                    self.report.unresolved += 1;
                    unresolved_sources.insert(source);
                }
                Err(e) => {
                    warn!(connector = name, source = %source, target = %link.target, error = %e, "link failed");
                    self.report.unresolved += 1;
                    unresolved_sources.insert(source);
                }
            }
        }

        self.cursor.retry.extend(unresolved_sources);
    }
}

/// Mark `entry` committed with `checksum`
fn record_progress(cursor: &mut SyncCursor, entry: &SourceEntry, checksum: String, advance: bool) {
    cursor
        .checksums
        .insert(entry.external_id.clone(), checksum);
    cursor.retry.remove(&entry.external_id);
    if advance {
        cursor.advance_to(entry.modified);
    }
}

fn oriented<'a>(node: &'a str, target: &'a str, direction: LinkDirection) -> (&'a str, &'a str) {
    match direction {
        LinkDirection::Outgoing => (node, target),
        LinkDirection::Incoming => (target, node),
    }
}

/// Create or update the node for `record`; returns its id
fn upsert_record_tx(
    conn: &Connection,
    connector: &str,
    record: &ExternalRecord,
    vector: Option<&[f32]>,
    model_version: &str,
) -> Result<(String, Upsert)> {
    let existing = find_by_source_in(conn, connector, &record.external_id)?;

    let mut node = match existing {
        None => {
            let ts = now();
            let mut node = Node {
                id: uuid::Uuid::new_v4().to_string(),
                node_type: record.node_type,
                title: record.title.clone(),
                body: record.body.clone(),
                project: record.project.clone(),
                source: connector.to_string(),
                source_id: Some(record.external_id.clone()),
                metadata: record.metadata.clone(),
                created_at: ts,
                updated_at: ts,
            };
            if vector.is_none() {
                node.metadata
                    .insert(EMBEDDING_PENDING_KEY.to_string(), MetaValue::Bool(true));
            }
            insert_node_tx(conn, &node)?;
            if let Some(v) = vector {
                put_embedding_tx(conn, &node.id, v, model_version)?;
            }
            return Ok((node.id, Upsert::Created));
        }
        Some(node) => node,
    };

    let mut current_meta = node.metadata.clone();
    let was_pending = current_meta.remove(EMBEDDING_PENDING_KEY).is_some();
    let text_changed = node.title != record.title || node.body != record.body;
    if !text_changed
        && node.node_type == record.node_type
        && node.project == record.project
        && current_meta == record.metadata
    {
        return Ok((node.id, Upsert::Unchanged));
    }

    node.node_type = record.node_type;
    node.title = record.title.clone();
    node.body = record.body.clone();
    node.project = record.project.clone();
    node.metadata = record.metadata.clone();
    node.updated_at = now().max(node.created_at);

    let pending = match (text_changed, vector) {
        (true, Some(_)) => false,
        (true, None) => true,
        (false, _) => was_pending,
    };
    if pending {
        node.metadata
            .insert(EMBEDDING_PENDING_KEY.to_string(), MetaValue::Bool(true));
    }
    update_node_tx(conn, &node)?;

    if text_changed {
        match vector {
            Some(v) => put_embedding_tx(conn, &node.id, v, model_version)?,
            None => {
                conn.execute("DELETE FROM embeddings WHERE node_id = ?1", params![node.id])?;
            }
        }
    }
    Ok((node.id, Upsert::Updated))
}

/// Persist only the cursor column, keeping run counters
fn save_cursor_tx(conn: &Connection, connector: &str, cursor_json: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_state (connector_name, cursor) VALUES (?1, ?2)
        ON CONFLICT(connector_name) DO UPDATE SET cursor = excluded.cursor
        "#,
        params![connector, cursor_json],
    )?;
    Ok(())
}
