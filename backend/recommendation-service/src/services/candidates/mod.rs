//! Candidate generation.
//!
//! Three independent retrieval strategies (collaborative, content
//! similarity, graph neighborhood) run concurrently, each under its own
//! timeout. A source that fails or times out contributes zero candidates;
//! it never fails the request. Merged candidates keep the union of
//! component scores and provenance tags.

use crate::clients::{GraphNeighborClient, ResourceMetadataProvider, SimilarityIndexClient};
use crate::error::Result;
use crate::models::{Candidate, CandidateSource, PipelineStats};
use crate::repository::InteractionRepository;
use crate::services::collaborative::CollaborativeScorer;
use crate::services::embedding::{EmbeddingVector, UserEmbeddingService};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serving strategy requested by the caller. Non-hybrid modes restrict the
/// pipeline to a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStrategy {
    Collaborative,
    Content,
    Graph,
    Hybrid,
}

impl RecommendationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStrategy::Collaborative => "collaborative",
            RecommendationStrategy::Content => "content",
            RecommendationStrategy::Graph => "graph",
            RecommendationStrategy::Hybrid => "hybrid",
        }
    }

    fn includes(&self, source: CandidateSource) -> bool {
        match self {
            RecommendationStrategy::Hybrid => true,
            RecommendationStrategy::Collaborative => source == CandidateSource::Collaborative,
            RecommendationStrategy::Content => source == CandidateSource::Content,
            RecommendationStrategy::Graph => source == CandidateSource::Graph,
        }
    }
}

/// Per-source retrieval limit and merged pool cap.
const PER_SOURCE_LIMIT: usize = 100;
const MERGED_POOL_CAP: usize = 100;
/// Content candidates must clear this cosine similarity.
const MIN_CONTENT_SIMILARITY: f32 = 0.3;
/// Users below this interaction count never get collaborative candidates.
const MIN_COLLABORATIVE_INTERACTIONS: i64 = 5;
/// Graph neighborhood shape.
const GRAPH_HOPS: u32 = 2;
const GRAPH_SEED_LIMIT: i64 = 20;

/// Collaborative retrieval is gated on model availability AND a minimum
/// interaction history, regardless of which happens to be missing.
fn collaborative_eligible(
    strategy: RecommendationStrategy,
    scorer_available: bool,
    total_interactions: i64,
) -> bool {
    strategy.includes(CandidateSource::Collaborative)
        && scorer_available
        && total_interactions >= MIN_COLLABORATIVE_INTERACTIONS
}

/// Union by resource id: component scores merge (max per component) and
/// provenance tags accumulate.
fn merge_candidates(batches: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut merged: HashMap<Uuid, Candidate> = HashMap::new();

    for batch in batches {
        for candidate in batch {
            match merged.get_mut(&candidate.resource_id) {
                Some(existing) => {
                    let s = &mut existing.scores;
                    let n = &candidate.scores;
                    s.collaborative = max_option(s.collaborative, n.collaborative);
                    s.content = max_option(s.content, n.content);
                    s.graph = max_option(s.graph, n.graph);
                    for source in candidate.sources {
                        if !existing.sources.contains(&source) {
                            existing.sources.push(source);
                        }
                    }
                }
                None => {
                    merged.insert(candidate.resource_id, candidate);
                }
            }
        }
    }

    merged.into_values().collect()
}

fn max_option(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// Keep the strongest candidates when the merged pool overflows, judged by
/// the highest component score across sources.
fn cap_candidates(mut candidates: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    if candidates.len() > cap {
        candidates.sort_by(|a, b| {
            b.scores
                .max_component()
                .partial_cmp(&a.scores.max_component())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        candidates.truncate(cap);
    }
    candidates
}

pub struct CandidateGenerator {
    interactions: InteractionRepository,
    embeddings: UserEmbeddingService,
    scorer: CollaborativeScorer,
    metadata: Arc<dyn ResourceMetadataProvider>,
    similarity: Arc<dyn SimilarityIndexClient>,
    graph: Arc<dyn GraphNeighborClient>,
    source_timeout: Duration,
}

impl CandidateGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        interactions: InteractionRepository,
        embeddings: UserEmbeddingService,
        scorer: CollaborativeScorer,
        metadata: Arc<dyn ResourceMetadataProvider>,
        similarity: Arc<dyn SimilarityIndexClient>,
        graph: Arc<dyn GraphNeighborClient>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            interactions,
            embeddings,
            scorer,
            metadata,
            similarity,
            graph,
            source_timeout,
        }
    }

    /// Run the enabled sources concurrently and merge their outputs into a
    /// capped, metadata-enriched candidate pool.
    pub async fn generate(
        &self,
        user_id: Uuid,
        total_interactions: i64,
        strategy: RecommendationStrategy,
        excluded_domains: &[String],
        min_quality: Option<f32>,
    ) -> Result<(Vec<Candidate>, PipelineStats)> {
        let run_collaborative =
            collaborative_eligible(strategy, self.scorer.is_available(), total_interactions);
        let run_content = strategy.includes(CandidateSource::Content);
        let run_graph = strategy.includes(CandidateSource::Graph);

        let collaborative_fut = async {
            if run_collaborative {
                self.collaborative_candidates(user_id).await
            } else {
                Ok(Vec::new())
            }
        };
        let content_fut = async {
            if run_content {
                self.content_candidates(user_id).await
            } else {
                Ok(Vec::new())
            }
        };
        let graph_fut = async {
            if run_graph {
                self.graph_candidates(user_id).await
            } else {
                Ok(Vec::new())
            }
        };

        let (collaborative, content, graph) = tokio::join!(
            timeout(self.source_timeout, collaborative_fut),
            timeout(self.source_timeout, content_fut),
            timeout(self.source_timeout, graph_fut),
        );

        let collaborative = absorb_source("collaborative", collaborative);
        let content = absorb_source("content", content);
        let graph = absorb_source("graph", graph);

        let mut stats = PipelineStats {
            collaborative_count: collaborative.len(),
            content_count: content.len(),
            graph_count: graph.len(),
            ..Default::default()
        };

        let merged = cap_candidates(
            merge_candidates(vec![collaborative, content, graph]),
            MERGED_POOL_CAP,
        );
        stats.merged_count = merged.len();

        let enriched = self
            .enrich_candidates(merged, excluded_domains, min_quality)
            .await?;
        stats.final_count = enriched.len();

        info!(
            user_id = %user_id,
            strategy = strategy.as_str(),
            collaborative = stats.collaborative_count,
            content = stats.content_count,
            graph = stats.graph_count,
            merged = stats.merged_count,
            eligible = stats.final_count,
            "Candidate generation complete"
        );

        Ok((enriched, stats))
    }

    /// Score the trained item vocabulary (minus the user's seen set) and
    /// keep the strongest predictions.
    async fn collaborative_candidates(&self, user_id: Uuid) -> anyhow::Result<Vec<Candidate>> {
        let seen: HashSet<Uuid> = self
            .interactions
            .interacted_resource_ids(user_id)
            .await?
            .into_iter()
            .collect();

        let pool = self.scorer.known_items_except(&seen);
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.scorer.predict_batch(user_id, &pool);

        let mut scored: Vec<(Uuid, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .take(PER_SOURCE_LIMIT)
            .map(|(resource_id, score)| {
                let mut candidate = Candidate::new(resource_id);
                candidate.scores.collaborative = Some(score);
                candidate.sources.push(CandidateSource::Collaborative);
                candidate
            })
            .collect())
    }

    /// Nearest resources to the user's preference vector. Skipped entirely
    /// for cold-start users (zero vector is a sentinel, not a preference).
    async fn content_candidates(&self, user_id: Uuid) -> anyhow::Result<Vec<Candidate>> {
        let embedding = self.embeddings.get_user_embedding(user_id).await?;
        if embedding.is_zero() {
            debug!(user_id = %user_id, "Cold-start embedding, skipping content source");
            return Ok(Vec::new());
        }

        let hits = self
            .similarity
            .similar_to(embedding.as_slice(), PER_SOURCE_LIMIT, MIN_CONTENT_SIMILARITY)
            .await?;

        Ok(hits
            .into_iter()
            .filter(|(_, similarity)| *similarity > MIN_CONTENT_SIMILARITY)
            .take(PER_SOURCE_LIMIT)
            .map(|(resource_id, similarity)| {
                let mut candidate = Candidate::new(resource_id);
                candidate.scores.content = Some(similarity);
                candidate.sources.push(CandidateSource::Content);
                candidate
            })
            .collect())
    }

    /// Resources within the 2-hop neighborhood of recently touched seeds.
    /// Nearer neighbors score higher.
    async fn graph_candidates(&self, user_id: Uuid) -> anyhow::Result<Vec<Candidate>> {
        let seeds = self
            .interactions
            .recent_resource_ids(user_id, GRAPH_SEED_LIMIT)
            .await?;
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let seed_set: HashSet<Uuid> = seeds.iter().copied().collect();
        let neighbors = self
            .graph
            .neighbors(&seeds, GRAPH_HOPS, PER_SOURCE_LIMIT)
            .await?;

        Ok(neighbors
            .into_iter()
            .filter(|n| !seed_set.contains(&n.resource_id))
            .take(PER_SOURCE_LIMIT)
            .map(|neighbor| {
                let mut candidate = Candidate::new(neighbor.resource_id);
                candidate.scores.graph = Some(1.0 / neighbor.hops.max(1) as f32);
                candidate.sources.push(CandidateSource::Graph);
                candidate
            })
            .collect())
    }

    /// Fill quality/recency/view-count/embedding from resource metadata and
    /// apply the profile's excluded-domain filter plus the request's
    /// quality floor.
    async fn enrich_candidates(
        &self,
        candidates: Vec<Candidate>,
        excluded_domains: &[String],
        min_quality: Option<f32>,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.resource_id).collect();
        let metadata = self.metadata.get_batch(&ids).await?;
        let dim = self.embeddings.dim();

        let mut enriched = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            if let Some(meta) = metadata.get(&candidate.resource_id) {
                if meta
                    .domains
                    .iter()
                    .any(|domain| excluded_domains.contains(domain))
                {
                    debug!(resource_id = %candidate.resource_id, "Filtered by excluded domain");
                    continue;
                }

                candidate.scores.quality = Some(meta.quality_score);
                candidate.scores.recency = Some(meta.recency_score);
                candidate.view_count = meta.view_count;
                candidate.embedding = meta.embedding.as_ref().and_then(|raw| {
                    match EmbeddingVector::parse_json(raw, dim) {
                        Ok(embedding) => Some(embedding.into_inner()),
                        Err(e) => {
                            debug!(
                                resource_id = %candidate.resource_id,
                                "Skipping malformed candidate embedding: {}", e
                            );
                            None
                        }
                    }
                });
            }

            if let Some(floor) = min_quality {
                if candidate.scores.quality.unwrap_or(0.0) < floor {
                    continue;
                }
            }

            enriched.push(candidate);
        }

        Ok(enriched)
    }
}

/// Collapse a timed-out or failed source into "zero candidates".
fn absorb_source(
    name: &str,
    outcome: std::result::Result<anyhow::Result<Vec<Candidate>>, tokio::time::error::Elapsed>,
) -> Vec<Candidate> {
    match outcome {
        Ok(Ok(candidates)) => candidates,
        Ok(Err(e)) => {
            warn!(source = name, "Candidate source failed: {:#}", e);
            Vec::new()
        }
        Err(_) => {
            warn!(source = name, "Candidate source timed out");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComponentScores;

    fn candidate_from(id: u128, source: CandidateSource, score: f32) -> Candidate {
        let mut candidate = Candidate::new(Uuid::from_u128(id));
        match source {
            CandidateSource::Collaborative => candidate.scores.collaborative = Some(score),
            CandidateSource::Content => candidate.scores.content = Some(score),
            CandidateSource::Graph => candidate.scores.graph = Some(score),
        }
        candidate.sources.push(source);
        candidate
    }

    #[test]
    fn test_collaborative_gating() {
        // Scorer availability alone is not enough below the history floor.
        assert!(!collaborative_eligible(
            RecommendationStrategy::Hybrid,
            true,
            4
        ));
        assert!(collaborative_eligible(
            RecommendationStrategy::Hybrid,
            true,
            5
        ));
        assert!(!collaborative_eligible(
            RecommendationStrategy::Hybrid,
            false,
            50
        ));
        assert!(!collaborative_eligible(
            RecommendationStrategy::Content,
            true,
            50
        ));
    }

    #[test]
    fn test_merge_unions_scores_and_sources() {
        let merged = merge_candidates(vec![
            vec![candidate_from(1, CandidateSource::Content, 0.6)],
            vec![candidate_from(1, CandidateSource::Graph, 0.5)],
            vec![candidate_from(2, CandidateSource::Graph, 0.9)],
        ]);

        assert_eq!(merged.len(), 2);
        let multi = merged
            .iter()
            .find(|c| c.resource_id == Uuid::from_u128(1))
            .unwrap();
        assert_eq!(multi.scores.content, Some(0.6));
        assert_eq!(multi.scores.graph, Some(0.5));
        assert_eq!(multi.sources.len(), 2);
    }

    #[test]
    fn test_merge_takes_max_within_component() {
        let merged = merge_candidates(vec![
            vec![candidate_from(1, CandidateSource::Content, 0.4)],
            vec![candidate_from(1, CandidateSource::Content, 0.7)],
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].scores.content, Some(0.7));
        assert_eq!(merged[0].sources, vec![CandidateSource::Content]);
    }

    #[test]
    fn test_cap_keeps_highest_max_component() {
        let pool = vec![
            candidate_from(1, CandidateSource::Content, 0.2),
            candidate_from(2, CandidateSource::Graph, 0.9),
            candidate_from(3, CandidateSource::Content, 0.5),
        ];

        let capped = cap_candidates(pool, 2);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].resource_id, Uuid::from_u128(2));
        assert_eq!(capped[1].resource_id, Uuid::from_u128(3));
    }

    #[test]
    fn test_cap_noop_under_limit() {
        let pool = vec![candidate_from(1, CandidateSource::Content, 0.2)];
        assert_eq!(cap_candidates(pool, 100).len(), 1);
    }

    #[test]
    fn test_max_component_over_sources() {
        let scores = ComponentScores {
            collaborative: Some(0.3),
            graph: Some(0.8),
            ..Default::default()
        };
        assert_eq!(scores.max_component(), 0.8);
        assert_eq!(ComponentScores::default().max_component(), 0.0);
    }
}

#[cfg(test)]
mod generator_tests {
    use super::*;
    use crate::clients::{
        MockGraphNeighborClient, MockResourceMetadataProvider, MockSimilarityIndexClient,
    };
    use crate::models::ResourceMetadata;
    use crate::services::embedding::{
        EmbeddingCache, InMemoryEmbeddingCache, UserEmbeddingService,
    };
    use serde_json::json;

    const DIM: usize = 4;

    fn lazy_repo() -> InteractionRepository {
        // Nothing listens on this port; repository calls fail fast and the
        // generator must absorb them as degraded sources.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@127.0.0.1:1/unreachable")
            .expect("lazy pool");
        InteractionRepository::new(pool)
    }

    fn metadata_stub() -> MockResourceMetadataProvider {
        let mut metadata = MockResourceMetadataProvider::new();
        metadata.expect_get_batch().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        ResourceMetadata {
                            resource_id: *id,
                            title: "resource".to_string(),
                            authors: vec!["Doe, J.".to_string()],
                            domains: vec!["neuroscience".to_string()],
                            quality_score: 0.7,
                            recency_score: 0.4,
                            view_count: 12,
                            embedding: Some(json!([0.1, 0.2, 0.3, 0.4])),
                        },
                    )
                })
                .collect())
        });
        metadata
    }

    async fn warmed_embeddings(
        interactions: InteractionRepository,
        metadata: Arc<MockResourceMetadataProvider>,
        user_id: Uuid,
    ) -> UserEmbeddingService {
        let cache = Arc::new(InMemoryEmbeddingCache::new(300));
        cache.put(user_id, vec![0.5, 0.5, 0.5, 0.5]).await;
        UserEmbeddingService::new(interactions, metadata, cache, DIM)
    }

    #[tokio::test]
    async fn test_content_source_served_from_cached_embedding() {
        let user_id = Uuid::from_u128(10);
        let hit_a = Uuid::from_u128(21);
        let hit_b = Uuid::from_u128(22);

        let interactions = lazy_repo();
        let metadata = Arc::new(metadata_stub());
        let embeddings =
            warmed_embeddings(interactions.clone(), metadata.clone(), user_id).await;

        let mut similarity = MockSimilarityIndexClient::new();
        similarity
            .expect_similar_to()
            .returning(move |_, _, _| Ok(vec![(hit_a, 0.8), (hit_b, 0.45)]));

        let generator = CandidateGenerator::new(
            interactions,
            embeddings,
            CollaborativeScorer::unavailable(),
            metadata,
            Arc::new(similarity),
            Arc::new(MockGraphNeighborClient::new()),
            Duration::from_millis(500),
        );

        let (pool, stats) = generator
            .generate(user_id, 10, RecommendationStrategy::Hybrid, &[], None)
            .await
            .unwrap();

        assert_eq!(stats.collaborative_count, 0);
        assert_eq!(stats.content_count, 2);
        // Graph repository calls fail against the unreachable pool and are
        // absorbed, not surfaced.
        assert_eq!(stats.graph_count, 0);

        assert_eq!(pool.len(), 2);
        for candidate in &pool {
            assert!(candidate.scores.content.is_some());
            assert!(candidate.scores.collaborative.is_none());
            // Enrichment filled quality/recency and the content embedding.
            assert_eq!(candidate.scores.quality, Some(0.7));
            assert_eq!(candidate.scores.recency, Some(0.4));
            assert!(candidate.embedding.is_some());
        }
    }

    #[tokio::test]
    async fn test_below_history_floor_excludes_collaborative_even_when_model_loaded() {
        use crate::services::collaborative::{DenseLayer, TwoTowerModel};
        use ndarray::{Array1, Array2};

        let user_id = Uuid::from_u128(10);
        let known_item = Uuid::from_u128(77);

        let mut users = std::collections::HashMap::new();
        users.insert(user_id, Array1::from_vec(vec![0.1, 0.2]));
        let mut items = std::collections::HashMap::new();
        items.insert(known_item, Array1::from_vec(vec![0.3, 0.4]));
        let layers = vec![
            DenseLayer {
                weights: Array2::from_shape_vec((2, 4), vec![0.1; 8]).unwrap(),
                bias: Array1::zeros(2),
            },
            DenseLayer {
                weights: Array2::from_shape_vec((1, 2), vec![0.5, 0.5]).unwrap(),
                bias: Array1::zeros(1),
            },
        ];
        let scorer =
            CollaborativeScorer::from_model(TwoTowerModel::new(2, users, items, layers));

        let interactions = lazy_repo();
        let metadata = Arc::new(metadata_stub());
        let embeddings =
            warmed_embeddings(interactions.clone(), metadata.clone(), user_id).await;

        let mut similarity = MockSimilarityIndexClient::new();
        similarity
            .expect_similar_to()
            .returning(|_, _, _| Ok(vec![(Uuid::from_u128(30), 0.6)]));

        let generator = CandidateGenerator::new(
            interactions,
            embeddings,
            scorer,
            metadata,
            Arc::new(similarity),
            Arc::new(MockGraphNeighborClient::new()),
            Duration::from_millis(500),
        );

        // Three interactions: under the floor of five, so the pool must
        // contain zero collaborative-sourced items.
        let (pool, stats) = generator
            .generate(user_id, 3, RecommendationStrategy::Hybrid, &[], None)
            .await
            .unwrap();

        assert_eq!(stats.collaborative_count, 0);
        assert!(pool.iter().all(|c| c.scores.collaborative.is_none()));
        assert!(!pool.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_domain_and_quality_floor_filters() {
        let user_id = Uuid::from_u128(10);

        let interactions = lazy_repo();
        let metadata = Arc::new(metadata_stub());
        let embeddings =
            warmed_embeddings(interactions.clone(), metadata.clone(), user_id).await;

        let mut similarity = MockSimilarityIndexClient::new();
        similarity
            .expect_similar_to()
            .returning(|_, _, _| Ok(vec![(Uuid::from_u128(31), 0.9)]));

        let generator = CandidateGenerator::new(
            interactions,
            embeddings,
            CollaborativeScorer::unavailable(),
            metadata,
            Arc::new(similarity),
            Arc::new(MockGraphNeighborClient::new()),
            Duration::from_millis(500),
        );

        // The stub metadata tags everything "neuroscience" at quality 0.7.
        let (excluded, _) = generator
            .generate(
                user_id,
                10,
                RecommendationStrategy::Content,
                &["neuroscience".to_string()],
                None,
            )
            .await
            .unwrap();
        assert!(excluded.is_empty());

        let (below_floor, _) = generator
            .generate(user_id, 10, RecommendationStrategy::Content, &[], Some(0.9))
            .await
            .unwrap();
        assert!(below_floor.is_empty());
    }
}
