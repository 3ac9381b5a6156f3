//! Diversity-aware retrieval.
//!
//! Naive top-k similarity over small overlapping chunks returns many
//! near-duplicates and starves the answer of breadth. Retrieval here is
//! two-stage: the store supplies a relevance-ranked candidate pool of
//! `fetch_k`, then maximal marginal relevance greedily picks `k` results
//! trading similarity-to-query against similarity-to-already-selected.

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::models::ScoredUnit;
use crate::store::{KnowledgeStore, StoreError};

/// Embed `query` and return a diverse top-`k` evidence set from `store`.
pub async fn retrieve(
    store: &KnowledgeStore,
    embedder: &dyn Embedder,
    query: &str,
    config: &RetrievalConfig,
) -> Result<Vec<ScoredUnit>, StoreError> {
    let query_vec = embed_query(embedder, query)
        .await
        .map_err(StoreError::Embedding)?;

    let pool = store.query(&query_vec, config.fetch_k).await?;
    Ok(mmr_select(pool, config.k, config.mmr_lambda))
}

/// Greedy maximal marginal relevance selection.
///
/// Candidates must be relevance-ranked (best first). Each round picks
/// the candidate maximizing
///
/// ```text
/// lambda * sim(candidate, query) - (1 - lambda) * max sim(candidate, selected)
/// ```
///
/// so `lambda = 1.0` degenerates to plain top-k and lower values push
/// the selection away from redundant results.
pub fn mmr_select(candidates: Vec<ScoredUnit>, k: usize, lambda: f32) -> Vec<ScoredUnit> {
    if candidates.len() <= k {
        return candidates;
    }

    let mut remaining: Vec<ScoredUnit> = candidates;
    let mut selected: Vec<ScoredUnit> = Vec::with_capacity(k);

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (i, candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.embedding, &s.embedding))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if redundancy.is_finite() { redundancy } else { 0.0 };

            let mmr = lambda * candidate.score - (1.0 - lambda) * redundancy;
            // Strict > keeps the earlier (more relevant) candidate on ties.
            if mmr > best_score {
                best_score = mmr;
                best_idx = i;
            }
        }

        selected.push(remaining.remove(best_idx));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceUnit;

    fn candidate(content: &str, embedding: Vec<f32>, score: f32) -> ScoredUnit {
        ScoredUnit {
            unit: EvidenceUnit::text(content.to_string()),
            embedding,
            score,
        }
    }

    /// Three near-duplicate chunks plus one dissimilar-but-relevant
    /// table, relevance-ranked.
    fn duplicate_heavy_pool() -> Vec<ScoredUnit> {
        vec![
            candidate("revenue chunk a", vec![1.0, 0.0, 0.0], 0.98),
            candidate("revenue chunk b", vec![0.99, 0.05, 0.0], 0.97),
            candidate("revenue chunk c", vec![0.98, 0.1, 0.0], 0.96),
            candidate("margin table", vec![0.0, 0.0, 1.0], 0.80),
        ]
    }

    #[test]
    fn test_pure_relevance_keeps_duplicates() {
        let selected = mmr_select(duplicate_heavy_pool(), 2, 1.0);
        let contents: Vec<&str> = selected.iter().map(|s| s.unit.content.as_str()).collect();
        assert_eq!(contents, vec!["revenue chunk a", "revenue chunk b"]);
    }

    #[test]
    fn test_diversity_promotes_dissimilar_result() {
        let selected = mmr_select(duplicate_heavy_pool(), 2, 0.5);
        let contents: Vec<&str> = selected.iter().map(|s| s.unit.content.as_str()).collect();
        assert_eq!(contents[0], "revenue chunk a");
        assert!(
            contents.contains(&"margin table"),
            "diversity selection should include the dissimilar result, got {:?}",
            contents
        );
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        for lambda in [0.0, 0.3, 0.7, 1.0] {
            let selected = mmr_select(duplicate_heavy_pool(), 3, lambda);
            assert_eq!(selected[0].unit.content, "revenue chunk a");
        }
    }

    #[test]
    fn test_small_pool_passes_through() {
        let pool = duplicate_heavy_pool();
        let selected = mmr_select(pool.clone(), 10, 0.7);
        assert_eq!(selected.len(), pool.len());
    }

    #[test]
    fn test_empty_pool() {
        assert!(mmr_select(Vec::new(), 5, 0.7).is_empty());
    }
}
