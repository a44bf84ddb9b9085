//! Per-connector progress token

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::SourceEntry;
use crate::error::Result;

/// Progress of a connector, stored as JSON in `sync_state.cursor`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCursor {
    /// Latest modification time of the contiguous successful prefix
    pub watermark: Option<DateTime<Utc>>,
    /// external id -> sha256 of the last committed content
    pub checksums: BTreeMap<String, String>,
    /// Ids reprocessed on every incremental run (failures, unresolved links)
    pub retry: BTreeSet<String>,
}

impl SyncCursor {
    /// Decode a stored cursor; an unreadable one starts over
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(raw) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "discarding unreadable sync cursor");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether an entry can be skipped without loading it.
    ///
    /// Only ids committed before qualify; a new file copied in with an old
    /// mtime is still loaded.
    pub fn is_behind_watermark(&self, entry: &SourceEntry) -> bool {
        match self.watermark {
            Some(mark) => {
                entry.modified <= mark
                    && !self.retry.contains(&entry.external_id)
                    && self.checksums.contains_key(&entry.external_id)
            }
            None => false,
        }
    }

    /// Drop bookkeeping for ids the source no longer lists
    pub fn retain_listed(&mut self, entries: &[SourceEntry]) {
        let listed: HashSet<&str> = entries.iter().map(|e| e.external_id.as_str()).collect();
        self.checksums.retain(|id, _| listed.contains(id.as_str()));
        self.retry.retain(|id| listed.contains(id.as_str()));
    }

    pub fn is_unchanged(&self, external_id: &str, checksum: &str) -> bool {
        self.checksums.get(external_id).map(String::as_str) == Some(checksum)
    }

    pub fn advance_to(&mut self, modified: DateTime<Utc>) {
        if self.watermark.map_or(true, |mark| modified > mark) {
            self.watermark = Some(modified);
        }
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
