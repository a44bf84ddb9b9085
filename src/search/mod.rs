//! Hybrid search
//!
//! Lexical ranking comes from the store's FTS5 index; semantic ranking is a
//! brute-force cosine scan over stored vectors. [`engine::FusionSearch`]
//! merges the two.

pub mod embedding;
pub mod engine;
pub mod vector;

pub use embedding::{embedder_for, DisabledEmbedder, Embedder, HtpEmbedder};
pub use engine::{FusionSearch, SearchHit, SearchMode, SearchResponse, SignalBreakdown};
