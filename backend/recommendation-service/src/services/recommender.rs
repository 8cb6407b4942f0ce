//! Request-scoped recommendation pipeline:
//! candidate generation -> hybrid ranking -> MMR -> novelty boost.

use crate::error::{AppError, Result};
use crate::models::{
    Candidate, RecommendationFeedback, UserProfile, DEFAULT_DIVERSITY_PREFERENCE,
    DEFAULT_NOVELTY_PREFERENCE,
};
use crate::repository::{FeedbackRepository, ServedRecommendation};
use crate::services::candidates::{CandidateGenerator, RecommendationStrategy};
use crate::services::diversity::DiversityOptimizer;
use crate::services::metrics::gini_coefficient;
use crate::services::novelty::NoveltyBooster;
use crate::services::profile::UserProfileManager;
use crate::services::ranking::{HybridRanker, HybridWeights};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub user_id: Uuid,
    pub limit: usize,
    pub strategy: RecommendationStrategy,
    /// Per-request override of the stored diversity preference.
    pub diversity: Option<f32>,
    pub min_quality: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentScoreBreakdown {
    pub collaborative: f32,
    pub content: f32,
    pub graph: f32,
    pub quality: f32,
    pub recency: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedResource {
    pub resource_id: Uuid,
    pub hybrid_score: f32,
    pub component_scores: ComponentScoreBreakdown,
    pub contributing_strategies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub count: usize,
    pub gini_coefficient: f32,
    pub cold_start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<RecommendedResource>,
    pub metadata: ResponseMetadata,
}

impl From<&Candidate> for RecommendedResource {
    fn from(candidate: &Candidate) -> Self {
        let s = &candidate.scores;
        RecommendedResource {
            resource_id: candidate.resource_id,
            hybrid_score: candidate.hybrid_score,
            component_scores: ComponentScoreBreakdown {
                collaborative: s.collaborative.unwrap_or(0.0),
                content: s.content.unwrap_or(0.0),
                graph: s.graph.unwrap_or(0.0),
                quality: s.quality.unwrap_or(0.0),
                recency: s.recency.unwrap_or(0.0),
            },
            contributing_strategies: candidate
                .sources
                .iter()
                .map(|source| source.as_str().to_string())
                .collect(),
        }
    }
}

pub struct RecommendationEngine {
    profiles: UserProfileManager,
    generator: CandidateGenerator,
    diversity: DiversityOptimizer,
    novelty: NoveltyBooster,
    feedback: FeedbackRepository,
}

impl RecommendationEngine {
    pub fn new(
        profiles: UserProfileManager,
        generator: CandidateGenerator,
        feedback: FeedbackRepository,
    ) -> Self {
        Self {
            profiles,
            generator,
            diversity: DiversityOptimizer::new(),
            novelty: NoveltyBooster::new(),
            feedback,
        }
    }

    pub async fn recommend(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        if let Some(diversity) = request.diversity {
            if !(0.0..=1.0).contains(&diversity) || !diversity.is_finite() {
                return Err(AppError::InvalidPreferenceRange(format!(
                    "diversity must be within [0.0, 1.0], got {}",
                    diversity
                )));
            }
        }

        let limit = request.limit.clamp(1, MAX_LIMIT);
        let profile = self.profiles.get_profile(request.user_id).await?;

        let total_interactions = profile.as_ref().map(|p| p.total_interactions).unwrap_or(0);
        let cold_start = total_interactions == 0;

        let lambda = request.diversity.unwrap_or_else(|| {
            profile
                .as_ref()
                .map(|p| p.diversity_preference)
                .unwrap_or(DEFAULT_DIVERSITY_PREFERENCE)
        });
        let novelty_preference = profile
            .as_ref()
            .map(|p| p.novelty_preference)
            .unwrap_or(DEFAULT_NOVELTY_PREFERENCE);
        let excluded_domains = profile
            .as_ref()
            .map(|p| p.excluded_domains.clone())
            .unwrap_or_default();
        let weights = resolve_weights(profile.as_ref());

        let (pool, mut stats) = self
            .generator
            .generate(
                request.user_id,
                total_interactions,
                request.strategy,
                &excluded_domains,
                request.min_quality,
            )
            .await?;

        // An empty pool (every source degraded or nothing eligible) is a
        // valid outcome, not an error.
        if pool.is_empty() {
            return Ok(RecommendationResponse {
                recommendations: Vec::new(),
                metadata: ResponseMetadata {
                    count: 0,
                    gini_coefficient: 0.0,
                    cold_start,
                },
            });
        }

        let ranked = HybridRanker::new(weights).rank(pool);

        let selected = self.diversity.rerank(ranked.clone(), lambda, limit);
        let selected_ids: HashSet<Uuid> = selected.iter().map(|c| c.resource_id).collect();
        let rest: Vec<Candidate> = ranked
            .into_iter()
            .filter(|c| !selected_ids.contains(&c.resource_id))
            .collect();

        let final_list = self
            .novelty
            .finalize(selected, rest, novelty_preference, limit);

        stats.final_count = final_list.len();
        let scores: Vec<f32> = final_list.iter().map(|c| c.hybrid_score).collect();
        let gini = gini_coefficient(&scores);

        info!(
            user_id = %request.user_id,
            strategy = request.strategy.as_str(),
            pool = stats.merged_count,
            served = stats.final_count,
            gini,
            cold_start,
            "Recommendation pipeline complete"
        );

        self.record_impressions(request.user_id, request.strategy, &final_list);

        Ok(RecommendationResponse {
            recommendations: final_list.iter().map(RecommendedResource::from).collect(),
            metadata: ResponseMetadata {
                count: final_list.len(),
                gini_coefficient: gini,
                cold_start,
            },
        })
    }

    /// Impression rows are recorded off the request path; a failed write
    /// loses monitoring data, never a response.
    fn record_impressions(
        &self,
        user_id: Uuid,
        strategy: RecommendationStrategy,
        served: &[Candidate],
    ) {
        if served.is_empty() {
            return;
        }

        let rows: Vec<ServedRecommendation> = served
            .iter()
            .enumerate()
            .map(|(rank, candidate)| ServedRecommendation {
                user_id,
                resource_id: candidate.resource_id,
                strategy: strategy.as_str().to_string(),
                score: candidate.hybrid_score,
                rank_position: rank as i32,
            })
            .collect();

        let feedback = self.feedback.clone();
        tokio::spawn(async move {
            if let Err(e) = feedback.record_served(&rows).await {
                warn!(user_id = %user_id, "Failed to record impressions: {:#}", e);
            }
        });
    }

    pub async fn submit_feedback(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        was_clicked: Option<bool>,
        was_useful: Option<bool>,
        notes: Option<String>,
    ) -> Result<RecommendationFeedback> {
        let updated = self
            .feedback
            .apply_feedback(user_id, resource_id, was_clicked, was_useful, notes)
            .await?;

        updated.ok_or_else(|| {
            AppError::NotFound(format!(
                "no served recommendation for user {} and resource {}",
                user_id, resource_id
            ))
        })
    }
}

/// A stored weight override that no longer parses falls back to the
/// defaults rather than failing the request; writes are validated, so
/// this only happens if the stored JSON was corrupted out-of-band.
fn resolve_weights(profile: Option<&UserProfile>) -> HybridWeights {
    let Some(raw) = profile.and_then(|p| p.score_weights.as_ref()) else {
        return HybridWeights::default();
    };

    match serde_json::from_value::<HybridWeights>(raw.clone()) {
        Ok(weights) if weights.validate().is_ok() => weights,
        _ => {
            warn!("Stored score_weights are invalid, using defaults");
            HybridWeights::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComponentScores;

    #[test]
    fn test_resolve_weights_default_without_profile() {
        assert_eq!(resolve_weights(None), HybridWeights::default());
    }

    #[test]
    fn test_component_breakdown_fills_missing_with_zero() {
        let mut candidate = Candidate::new(Uuid::from_u128(1));
        candidate.scores = ComponentScores {
            content: Some(0.6),
            ..Default::default()
        };
        candidate.hybrid_score = 0.18;

        let resource = RecommendedResource::from(&candidate);
        assert_eq!(resource.component_scores.collaborative, 0.0);
        assert_eq!(resource.component_scores.content, 0.6);
        assert_eq!(resource.component_scores.graph, 0.0);
    }
}
