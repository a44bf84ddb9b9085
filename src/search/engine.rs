//! Fusion search: BM25 text ranking + vector similarity
//!
//! Both signals are min-max normalized per query and combined with a
//! weighted sum. When the query cannot be embedded the search degrades to
//! lexical-only instead of failing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::vector::rank_by_similarity;
use crate::core::config::FusionWeights;
use crate::core::model::Node;
use crate::error::Result;
use crate::store::{GraphStore, NodeFilter};

/// Each path keeps this many candidates per requested result
const CANDIDATE_FACTOR: usize = 2;

/// Recency boost is full up to this age...
const RECENCY_FULL_DAYS: f64 = 7.0;
/// ...and decays linearly to zero at this age
const RECENCY_ZERO_DAYS: f64 = 90.0;

pub const DEFAULT_RECENCY_BOOST: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Hybrid,
    /// Query embedding failed; only the text index was used
    LexicalOnly,
}

/// Per-signal contributions to a hit's score
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_lexical: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_semantic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node: Node,
    pub score: f64,
    pub signals: SignalBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: SearchMode,
    pub results: Vec<SearchHit>,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            results: Vec::new(),
        }
    }
}

/// Hybrid search over a [`GraphStore`]
pub struct FusionSearch<'a> {
    store: &'a GraphStore,
    weights: FusionWeights,
}

impl<'a> FusionSearch<'a> {
    pub fn new(store: &'a GraphStore, weights: FusionWeights) -> Self {
        Self { store, weights }
    }

    /// Rank nodes in `filter` against `query`, best first
    pub fn search(&self, query: &str, filter: &NodeFilter, limit: usize) -> Result<SearchResponse> {
        if limit == 0 || self.store.count_nodes(filter)? == 0 {
            return Ok(SearchResponse::empty());
        }
        let per_path = limit.saturating_mul(CANDIDATE_FACTOR);

        let mut mode = SearchMode::Hybrid;
        let semantic = if self.weights.vector_weight > 0.0 {
            match self.semantic_matches(query, filter, per_path)? {
                Some(matches) => matches,
                None => {
                    mode = SearchMode::LexicalOnly;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // A degraded search still answers from the text index
        let text_weight = match mode {
            SearchMode::LexicalOnly if self.weights.text_weight == 0.0 => 1.0,
            _ => f64::from(self.weights.text_weight),
        };
        let vector_weight = f64::from(self.weights.vector_weight);

        let lexical = if text_weight > 0.0 {
            let mut matches = self.store.lexical_matches(query, filter)?;
            matches.truncate(per_path);
            matches
        } else {
            Vec::new()
        };

        let mut signals: HashMap<String, SignalBreakdown> = HashMap::new();
        for (id, raw, norm) in min_max(&lexical) {
            let entry = signals.entry(id).or_default();
            entry.raw_lexical = Some(raw);
            entry.lexical = Some(norm);
        }
        for (id, raw, norm) in min_max(&semantic) {
            let entry = signals.entry(id).or_default();
            entry.raw_semantic = Some(raw);
            entry.semantic = Some(norm);
        }

        let mut results = Vec::with_capacity(signals.len());
        for (id, breakdown) in signals {
            let node = match self.store.find_node(&id)? {
                Some(node) => node,
                None => continue,
            };
            let score = text_weight * breakdown.lexical.unwrap_or(0.0)
                + vector_weight * breakdown.semantic.unwrap_or(0.0);
            results.push(SearchHit {
                node,
                score,
                signals: breakdown,
            });
        }

        sort_hits(&mut results);
        results.truncate(limit);

        debug!(
            query,
            lexical = lexical.len(),
            semantic = semantic.len(),
            returned = results.len(),
            mode = ?mode,
            "fusion search"
        );
        Ok(SearchResponse { mode, results })
    }

    /// Search for pre-task context.
    ///
    /// Project-scoped results are topped up with up to `limit / 2` hits from
    /// other projects, then recently updated nodes get a score boost.
    pub fn context_search(
        &self,
        task: &str,
        project: Option<&str>,
        limit: usize,
        recency_boost: f64,
    ) -> Result<SearchResponse> {
        let filter = NodeFilter {
            node_type: None,
            project: project.map(str::to_string),
        };
        let mut response = self.search(task, &filter, limit)?;

        if project.is_some() {
            let cross = self.search(task, &NodeFilter::default(), limit / 2)?;
            if cross.mode == SearchMode::LexicalOnly {
                response.mode = SearchMode::LexicalOnly;
            }
            let mut seen: HashSet<String> =
                response.results.iter().map(|h| h.node.id.clone()).collect();
            for hit in cross.results {
                if seen.insert(hit.node.id.clone()) {
                    response.results.push(hit);
                }
            }
        }

        let now = Utc::now();
        for hit in &mut response.results {
            let boost = recency_boost_at(hit.node.updated_at, now, recency_boost);
            hit.score += boost;
            hit.signals.recency = Some(boost);
        }

        sort_hits(&mut response.results);
        response.results.truncate(limit);
        Ok(response)
    }

    /// `None` when the query could not be embedded
    fn semantic_matches(
        &self,
        query: &str,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Option<Vec<(String, f64)>>> {
        let embedder = self.store.embedder();
        let query_vec = match embedder.embed(query) {
            Ok(v) if v.len() == embedder.dimension() => v,
            Ok(v) => {
                warn!(
                    expected = embedder.dimension(),
                    got = v.len(),
                    "query embedding has wrong length, searching lexical-only"
                );
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "query embedding failed, searching lexical-only");
                return Ok(None);
            }
        };

        // Nothing to compare against
        if query_vec.iter().all(|x| *x == 0.0) {
            return Ok(Some(Vec::new()));
        }

        let candidates = self
            .store
            .embeddings_for(filter, embedder.model_version())?;
        let mut ranked = rank_by_similarity(&query_vec, candidates);
        ranked.truncate(limit);
        Ok(Some(
            ranked
                .into_iter()
                .map(|(id, sim)| (id, f64::from(sim)))
                .collect(),
        ))
    }
}

/// `(id, raw, normalized)`; a single result or a flat score set maps to 1.0
fn min_max(scores: &[(String, f64)]) -> Vec<(String, f64, f64)> {
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    scores
        .iter()
        .map(|(id, s)| {
            let norm = if range > f64::EPSILON {
                (s - min) / range
            } else {
                1.0
            };
            (id.clone(), *s, norm)
        })
        .collect()
}

/// Score desc, then most recently updated, then id
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.node.updated_at.cmp(&a.node.updated_at))
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
}

fn recency_boost_at(updated_at: DateTime<Utc>, now: DateTime<Utc>, max_boost: f64) -> f64 {
    let age_days = (now - updated_at).num_seconds() as f64 / 86_400.0;
    if age_days <= RECENCY_FULL_DAYS {
        max_boost
    } else if age_days >= RECENCY_ZERO_DAYS {
        0.0
    } else {
        max_boost * (RECENCY_ZERO_DAYS - age_days) / (RECENCY_ZERO_DAYS - RECENCY_FULL_DAYS)
    }
}
