//! Embedding adapter
//!
//! The store only relies on the [`Embedder`] contract: text in, fixed-length
//! vector out, tagged with a model version. The built-in implementation is a
//! Harmonic Token Projection (HTP) model:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! It needs no model file or network, is deterministic, and handles any
//! Unicode script. It does not understand synonyms; shared tokens drive
//! similarity.

use std::f64::consts::PI;
use std::sync::Arc;

use crate::error::{Result, SkeinError};

/// Embedding dimension of the HTP model (2 * number of coprime moduli)
pub const EMBEDDING_DIM: usize = 384;

/// Model identifier accepted in `embedding_model`
pub const HTP_MODEL: &str = "htp-384";

/// Model identifier that turns embeddings off (lexical-only deployment)
pub const DISABLED_MODEL: &str = "none";

const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Text -> fixed-length vector, versioned
pub trait Embedder: Send + Sync {
    /// Version tag stored with every vector this embedder produces
    fn model_version(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the embedder named by the `embedding_model` config key
pub fn embedder_for(model: &str) -> Result<Arc<dyn Embedder>> {
    match model {
        HTP_MODEL => Ok(Arc::new(HtpEmbedder::new())),
        DISABLED_MODEL => Ok(Arc::new(DisabledEmbedder::new(EMBEDDING_DIM))),
        other => Err(SkeinError::config(format!(
            "unknown embedding_model '{}' (must be: {}|{})",
            other, HTP_MODEL, DISABLED_MODEL
        ))),
    }
}

/// HTP embedding model
pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: first_primes(NUM_MODULI),
        }
    }

    /// Embed a single token: encode its code points as a base-2^16 integer N,
    /// then project each residue N mod m_i onto the unit circle.
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);

        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }

        embedding
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HtpEmbedder {
    fn model_version(&self) -> &str {
        HTP_MODEL
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Mean-pooled token projections, L2 normalized
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vec![0.0; EMBEDDING_DIM]);
        }

        let mut sum = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (acc, val) in sum.iter_mut().zip(self.embed_token(token)) {
                *acc += val;
            }
        }
        let count = tokens.len() as f64;
        for val in &mut sum {
            *val /= count;
        }

        let norm: f64 = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        let embedding = if norm > 0.0 {
            sum.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        };

        Ok(embedding)
    }
}

/// Embedder that is never available
pub struct DisabledEmbedder {
    dimension: usize,
}

impl DisabledEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for DisabledEmbedder {
    fn model_version(&self) -> &str {
        DISABLED_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(SkeinError::embedding("embeddings are disabled"))
    }
}

/// N = sum(u_j * B^(L-j)) with B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Lowercased words split on whitespace and ASCII punctuation
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// First `count` primes; pairwise coprime moduli for the projection
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|p| **p * **p <= candidate)
            .all(|p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::vector::cosine_similarity;

    #[test]
    fn test_htp_basic() {
        let model = HtpEmbedder::new();

        let emb1 = model.embed("hello world").unwrap();
        let emb2 = model.embed("hello world").unwrap();
        let emb3 = model.embed("goodbye moon").unwrap();

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_htp_shared_tokens_raise_similarity() {
        let model = HtpEmbedder::new();

        let a = model.embed("single-file storage for simplicity").unwrap();
        let b = model.embed("why did we pick storage").unwrap();
        let c = model.embed("cooking recipes").unwrap();

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_htp_l2_normalized() {
        let model = HtpEmbedder::new();
        for text in ["한국어 테스트", "Korean test"] {
            let emb = model.embed(text).unwrap();
            let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_first_primes() {
        let primes = first_primes(NUM_MODULI);
        assert_eq!(&primes[..6], &[2, 3, 5, 7, 11, 13]);
        assert_eq!(primes.len(), NUM_MODULI);
        assert_eq!(*primes.last().unwrap(), 1163);
    }

    #[test]
    fn test_embedder_for() {
        assert_eq!(embedder_for("htp-384").unwrap().dimension(), EMBEDDING_DIM);
        let disabled = embedder_for("none").unwrap();
        assert!(matches!(
            disabled.embed("x"),
            Err(SkeinError::EmbeddingUnavailable(_))
        ));
        assert!(embedder_for("bge-small").is_err());
    }
}
