//! Diversity re-ranking with MMR (Maximal Marginal Relevance).
//!
//! `MMR(c) = lambda * relevance(c) - (1 - lambda) * max_similarity(c, selected)`
//!
//! Relevance is the hybrid score min-max normalized over the candidate
//! pool; similarity is content-embedding cosine similarity against the
//! already-selected set. lambda = 1.0 is pure relevance, lambda = 0.0 pure
//! diversity.

use crate::models::Candidate;
use crate::services::embedding::cosine_similarity;

pub struct DiversityOptimizer;

impl Default for DiversityOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DiversityOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Greedily select up to `limit` candidates maximizing MMR. The first
    /// pick has no similarity penalty (the selected set is empty). Exact
    /// MMR ties resolve toward the lower resource id.
    pub fn rerank(&self, candidates: Vec<Candidate>, lambda: f32, limit: usize) -> Vec<Candidate> {
        if candidates.is_empty() || limit == 0 {
            return Vec::new();
        }

        let lambda = lambda.clamp(0.0, 1.0);
        let relevance = normalize_scores(&candidates);

        let mut remaining: Vec<(Candidate, f32)> =
            candidates.into_iter().zip(relevance).collect();
        let mut selected: Vec<Candidate> = Vec::new();

        while selected.len() < limit && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_mmr = f32::NEG_INFINITY;

            for (i, (candidate, relevance)) in remaining.iter().enumerate() {
                let redundancy = max_similarity(candidate, &selected);
                let mmr = lambda * relevance - (1.0 - lambda) * redundancy;

                let better = mmr > best_mmr
                    || (mmr == best_mmr
                        && candidate.resource_id < remaining[best_idx].0.resource_id);
                if better {
                    best_mmr = mmr;
                    best_idx = i;
                }
            }

            let (candidate, _) = remaining.remove(best_idx);
            selected.push(candidate);
        }

        selected
    }
}

/// Min-max normalization to [0, 1]. A constant pool maps everything to
/// 1.0, degrading MMR to diversity-only selection after the first pick.
fn normalize_scores(candidates: &[Candidate]) -> Vec<f32> {
    let min = candidates
        .iter()
        .map(|c| c.hybrid_score)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.hybrid_score)
        .fold(f32::NEG_INFINITY, f32::max);

    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![1.0; candidates.len()];
    }

    candidates
        .iter()
        .map(|c| ((c.hybrid_score - min) / range).clamp(0.0, 1.0))
        .collect()
}

/// Highest pairwise similarity against the selected set. Candidates
/// without a usable embedding, and any non-finite similarity, contribute 0.
fn max_similarity(candidate: &Candidate, selected: &[Candidate]) -> f32 {
    let Some(embedding) = candidate.embedding.as_ref() else {
        return 0.0;
    };

    selected
        .iter()
        .filter_map(|other| other.embedding.as_ref())
        .map(|other| {
            let similarity = cosine_similarity(embedding, other);
            if similarity.is_finite() {
                similarity
            } else {
                0.0
            }
        })
        .fold(0.0_f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metrics::gini_coefficient;
    use uuid::Uuid;

    fn candidate(id: u128, score: f32, embedding: Option<Vec<f32>>) -> Candidate {
        let mut c = Candidate::new(Uuid::from_u128(id));
        c.hybrid_score = score;
        c.embedding = embedding;
        c
    }

    #[test]
    fn test_empty_pool_returns_empty() {
        let optimizer = DiversityOptimizer::new();
        assert!(optimizer.rerank(Vec::new(), 0.5, 10).is_empty());
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let optimizer = DiversityOptimizer::new();
        let pool = vec![
            candidate(1, 0.2, Some(vec![1.0, 0.0])),
            candidate(2, 0.9, Some(vec![0.0, 1.0])),
            candidate(3, 0.5, Some(vec![1.0, 1.0])),
        ];

        let reranked = optimizer.rerank(pool, 0.7, 3);
        assert_eq!(reranked[0].resource_id, Uuid::from_u128(2));
    }

    #[test]
    fn test_near_duplicate_is_deferred() {
        let optimizer = DiversityOptimizer::new();
        // Candidate 2 is a near-duplicate of the top pick; candidate 3 is
        // orthogonal and should be selected second despite a lower score.
        let pool = vec![
            candidate(1, 1.0, Some(vec![1.0, 0.0, 0.0])),
            candidate(2, 0.95, Some(vec![0.99, 0.1, 0.0])),
            candidate(3, 0.6, Some(vec![0.0, 1.0, 0.0])),
        ];

        let reranked = optimizer.rerank(pool, 0.5, 3);
        assert_eq!(reranked[0].resource_id, Uuid::from_u128(1));
        assert_eq!(reranked[1].resource_id, Uuid::from_u128(3));
    }

    #[test]
    fn test_non_finite_similarity_treated_as_zero() {
        let optimizer = DiversityOptimizer::new();
        let pool = vec![
            candidate(1, 1.0, Some(vec![f32::NAN, 1.0])),
            candidate(2, 0.8, Some(vec![f32::NAN, 0.5])),
        ];

        let reranked = optimizer.rerank(pool, 0.5, 2);
        assert_eq!(reranked.len(), 2);
        for c in &reranked {
            assert!(c.hybrid_score.is_finite());
        }
    }

    #[test]
    fn test_missing_embeddings_do_not_panic() {
        let optimizer = DiversityOptimizer::new();
        let pool = vec![candidate(1, 0.9, None), candidate(2, 0.7, None)];

        let reranked = optimizer.rerank(pool, 0.3, 2);
        assert_eq!(reranked.len(), 2);
    }

    #[test]
    fn test_exact_tie_prefers_lower_resource_id() {
        let optimizer = DiversityOptimizer::new();
        let pool = vec![
            candidate(9, 0.5, None),
            candidate(2, 0.5, None),
            candidate(5, 0.5, None),
        ];

        let reranked = optimizer.rerank(pool, 1.0, 3);
        assert_eq!(reranked[0].resource_id, Uuid::from_u128(2));
        assert_eq!(reranked[1].resource_id, Uuid::from_u128(5));
        assert_eq!(reranked[2].resource_id, Uuid::from_u128(9));
    }

    #[test]
    fn test_high_lambda_selection_is_diverse_by_gini() {
        let optimizer = DiversityOptimizer::new();

        // 24 candidates spanning three content clusters with graded scores.
        let cluster_axes = [
            vec![1.0_f32, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let mut pool = Vec::new();
        for i in 0..24u128 {
            let axis = &cluster_axes[(i % 3) as usize];
            let mut embedding = axis.clone();
            embedding[(i % 3) as usize] += 0.01 * i as f32;
            pool.push(candidate(i + 1, 0.4 + 0.02 * i as f32, Some(embedding)));
        }

        let reranked = optimizer.rerank(pool, 0.8, 12);
        let scores: Vec<f32> = reranked.iter().map(|c| c.hybrid_score).collect();

        let gini = gini_coefficient(&scores);
        assert!(gini < 0.3, "expected a diverse selection, gini = {}", gini);
    }
}
