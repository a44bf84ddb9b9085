//! Deterministic embedders, stores and connectors for unit tests

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::core::model::Metadata;
use crate::core::schema::NodeType;
use crate::error::{Result, SkeinError};
use crate::search::embedding::{DisabledEmbedder, Embedder};
use crate::store::GraphStore;
use crate::sync::{Connector, ExternalRecord, RecordLink, SourceEntry};

/// Keyword groups; a text's vector has 1.0 for each group it mentions
const CONCEPTS: [&[&str]; 8] = [
    &["storage", "store", "database", "sqlite", "persist", "disk"],
    &["rust", "cargo", "crate"],
    &["python", "pip"],
    &["memory", "remember", "recall"],
    &["search", "query", "lookup"],
    &["network", "socket", "http"],
    &["cooking", "recipe", "pasta", "lunch"],
    &["music", "song", "playlist"],
];

pub const CONCEPT_DIM: usize = CONCEPTS.len();

/// Embeds texts by the concepts they mention, so related wording matches
pub struct ConceptEmbedder;

impl ConceptEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for ConceptEmbedder {
    fn model_version(&self) -> &str {
        "concept-v1"
    }

    fn dimension(&self) -> usize {
        CONCEPT_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(CONCEPTS
            .iter()
            .map(|words| {
                if words.iter().any(|w| lower.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }
}

/// Wraps an embedder that can be switched off
pub struct FlakyEmbedder<E> {
    inner: E,
    available: AtomicBool,
}

impl<E: Embedder> FlakyEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl<E: Embedder> Embedder for FlakyEmbedder<E> {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SkeinError::embedding("adapter offline"));
        }
        self.inner.embed(text)
    }
}

pub fn concept_store() -> GraphStore {
    GraphStore::open_in_memory(Arc::new(ConceptEmbedder::new())).unwrap()
}

/// Store whose embedder always fails
pub fn failing_store() -> GraphStore {
    GraphStore::open_in_memory(Arc::new(DisabledEmbedder::new(CONCEPT_DIM))).unwrap()
}

#[derive(Default)]
struct VecSource {
    records: BTreeMap<String, (DateTime<Utc>, ExternalRecord)>,
    failing: HashSet<String>,
    list_fails: bool,
    clock: i64,
}

/// In-memory connector; every push gets a later modification time
#[derive(Clone)]
pub struct VecConnector {
    name: String,
    source: Arc<Mutex<VecSource>>,
}

impl VecConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: Arc::new(Mutex::new(VecSource::default())),
        }
    }

    pub fn push(&self, id: &str, title: &str, body: &str) {
        self.push_with_links(id, title, body, Vec::new());
    }

    pub fn push_with_links(&self, id: &str, title: &str, body: &str, links: Vec<RecordLink>) {
        let mut source = self.source.lock().unwrap();
        source.clock += 1;
        let modified = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(source.clock);
        let record = ExternalRecord {
            external_id: id.to_string(),
            node_type: NodeType::Note,
            title: title.to_string(),
            body: body.to_string(),
            project: Some("vec".to_string()),
            metadata: Metadata::new(),
            links,
        };
        source.records.insert(id.to_string(), (modified, record));
    }

    pub fn modified_of(&self, id: &str) -> DateTime<Utc> {
        self.source.lock().unwrap().records[id].0
    }

    pub fn fail_on(&self, id: &str) {
        self.source.lock().unwrap().failing.insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.source.lock().unwrap().failing.remove(id);
    }

    pub fn remove(&self, id: &str) {
        self.source.lock().unwrap().records.remove(id);
    }

    pub fn fail_listing(&self) {
        self.source.lock().unwrap().list_fails = true;
    }
}

impl Connector for VecConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> Result<Vec<SourceEntry>> {
        let source = self.source.lock().unwrap();
        if source.list_fails {
            return Err(SkeinError::not_found("source unreachable"));
        }
        let mut entries: Vec<SourceEntry> = source
            .records
            .iter()
            .map(|(id, (modified, _))| SourceEntry {
                external_id: id.clone(),
                modified: *modified,
                locator: id.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.external_id.cmp(&b.external_id)));
        Ok(entries)
    }

    fn load(&self, entry: &SourceEntry) -> Result<ExternalRecord> {
        let source = self.source.lock().unwrap();
        if source.failing.contains(&entry.external_id) {
            return Err(SkeinError::validation(format!(
                "cannot parse {}",
                entry.external_id
            )));
        }
        source
            .records
            .get(&entry.external_id)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| SkeinError::not_found(entry.external_id.clone()))
    }
}
