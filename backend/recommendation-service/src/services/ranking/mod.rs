//! Hybrid score fusion.
//!
//! Each candidate's five component scores are combined with a weighted
//! linear blend. A component the candidate was not produced by counts as
//! 0.0 rather than being excluded, which deliberately penalizes
//! single-source candidates.

use crate::error::{AppError, Result};
use crate::models::Candidate;
use serde::{Deserialize, Serialize};

const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Fusion weights over the five component scores. Overrides must cover
/// every component and sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub collaborative: f32,
    pub content: f32,
    pub graph: f32,
    pub quality: f32,
    pub recency: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.35,
            content: 0.30,
            graph: 0.20,
            quality: 0.10,
            recency: 0.05,
        }
    }
}

impl HybridWeights {
    pub fn validate(&self) -> Result<()> {
        let components = [
            self.collaborative,
            self.content,
            self.graph,
            self.quality,
            self.recency,
        ];
        if components.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AppError::Validation(
                "score_weights components must be non-negative".to_string(),
            ));
        }

        let sum: f32 = components.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(AppError::Validation(format!(
                "score_weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

pub struct HybridRanker {
    weights: HybridWeights,
}

impl Default for HybridRanker {
    fn default() -> Self {
        Self::new(HybridWeights::default())
    }
}

impl HybridRanker {
    pub fn new(weights: HybridWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, candidate: &Candidate) -> f32 {
        let s = &candidate.scores;
        self.weights.collaborative * s.collaborative.unwrap_or(0.0)
            + self.weights.content * s.content.unwrap_or(0.0)
            + self.weights.graph * s.graph.unwrap_or(0.0)
            + self.weights.quality * s.quality.unwrap_or(0.0)
            + self.weights.recency * s.recency.unwrap_or(0.0)
    }

    /// Compute hybrid scores and sort descending; exact ties order by
    /// resource id ascending so the ranking is deterministic.
    pub fn rank(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        for candidate in candidates.iter_mut() {
            candidate.hybrid_score = self.score(candidate);
        }

        candidates.sort_by(|a, b| {
            b.hybrid_score
                .partial_cmp(&a.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, ComponentScores};
    use uuid::Uuid;

    fn candidate(id: u128, scores: ComponentScores) -> Candidate {
        Candidate {
            resource_id: Uuid::from_u128(id),
            scores,
            sources: Vec::new(),
            hybrid_score: 0.0,
            view_count: 0,
            embedding: None,
        }
    }

    #[test]
    fn test_default_weights_are_valid() {
        assert!(HybridWeights::default().validate().is_ok());
    }

    #[test]
    fn test_weight_validation_rejects_bad_sums() {
        let weights = HybridWeights {
            collaborative: 0.5,
            content: 0.5,
            graph: 0.5,
            quality: 0.0,
            recency: 0.0,
        };
        assert!(weights.validate().is_err());

        let negative = HybridWeights {
            collaborative: -0.2,
            content: 0.6,
            graph: 0.3,
            quality: 0.2,
            recency: 0.1,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_override_must_cover_all_components() {
        let partial = serde_json::json!({
            "collaborative": 0.5,
            "content": 0.5
        });
        assert!(serde_json::from_value::<HybridWeights>(partial).is_err());
    }

    #[test]
    fn test_missing_component_counts_as_zero() {
        let ranker = HybridRanker::default();

        let full = candidate(
            1,
            ComponentScores {
                collaborative: Some(0.8),
                content: Some(0.8),
                graph: Some(0.8),
                quality: Some(0.8),
                recency: Some(0.8),
            },
        );
        let single = candidate(
            2,
            ComponentScores {
                collaborative: Some(0.8),
                ..Default::default()
            },
        );

        let full_score = ranker.score(&full);
        let single_score = ranker.score(&single);
        assert!((full_score - 0.8).abs() < 1e-6);
        assert!((single_score - 0.8 * 0.35).abs() < 1e-6);
        assert!(single_score < full_score);
    }

    #[test]
    fn test_rank_sorts_descending_with_id_tiebreak() {
        let ranker = HybridRanker::default();
        let tied_scores = ComponentScores {
            content: Some(0.6),
            ..Default::default()
        };

        let ranked = ranker.rank(vec![
            candidate(7, tied_scores),
            candidate(
                1,
                ComponentScores {
                    content: Some(0.9),
                    ..Default::default()
                },
            ),
            candidate(3, tied_scores),
        ]);

        assert_eq!(ranked[0].resource_id, Uuid::from_u128(1));
        // Exactly tied scores fall back to ascending resource id.
        assert_eq!(ranked[1].resource_id, Uuid::from_u128(3));
        assert_eq!(ranked[2].resource_id, Uuid::from_u128(7));
    }
}
