//! Brute-force vector comparison
//!
//! Every candidate vector is compared against the query. At the target
//! scale (thousands to low tens of thousands of nodes) this is fast enough
//! and exact; no approximate index is kept.

use std::cmp::Ordering;

/// Cosine similarity between two embeddings; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Score every `(id, vector)` pair against `query`, best first (ties by id)
pub fn rank_by_similarity<I>(query: &[f32], candidates: I) -> Vec<(String, f32)>
where
    I: IntoIterator<Item = (String, Vec<f32>)>,
{
    let mut scored: Vec<(String, f32)> = candidates
        .into_iter()
        .map(|(id, vector)| {
            let similarity = cosine_similarity(query, &vector);
            (id, similarity)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_by_similarity_orders_and_breaks_ties() {
        let query = vec![1.0, 0.0];
        let ranked = rank_by_similarity(
            &query,
            vec![
                ("c".to_string(), vec![0.0, 1.0]),
                ("b".to_string(), vec![1.0, 0.0]),
                ("a".to_string(), vec![2.0, 0.0]),
                ("d".to_string(), vec![1.0, 1.0]),
            ],
        );
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
    }
}
