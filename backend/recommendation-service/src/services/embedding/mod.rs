//! User embedding computation.
//!
//! A user's vector is the interaction-strength-weighted average of the
//! embeddings of resources they interacted positively with. Users with no
//! usable positive interactions get the all-zero vector, which downstream
//! code must treat as the cold-start sentinel, not a preference vector.

mod cache;

pub use cache::{EmbeddingCache, InMemoryEmbeddingCache, RedisEmbeddingCache};

use crate::clients::ResourceMetadataProvider;
use crate::error::{AppError, Result};
use crate::repository::InteractionRepository;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Validated fixed-length numeric vector. Embeddings cross the service
/// boundary as dynamically-typed JSON; everything that reaches the
/// averaging step has already been checked for length and finiteness.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    components: Vec<f32>,
}

impl EmbeddingVector {
    /// Cold-start sentinel.
    pub fn zeros(dim: usize) -> Self {
        Self {
            components: vec![0.0; dim],
        }
    }

    pub fn from_components(components: Vec<f32>, dim: usize) -> Result<Self> {
        if components.len() != dim {
            return Err(AppError::MalformedEmbedding(format!(
                "expected dimension {}, got {}",
                dim,
                components.len()
            )));
        }
        if components.iter().any(|c| !c.is_finite()) {
            return Err(AppError::MalformedEmbedding(
                "embedding contains non-finite components".to_string(),
            ));
        }
        Ok(Self { components })
    }

    /// Parse a JSON array of numbers into a validated vector.
    pub fn parse_json(value: &serde_json::Value, dim: usize) -> Result<Self> {
        let array = value.as_array().ok_or_else(|| {
            AppError::MalformedEmbedding("embedding is not a JSON array".to_string())
        })?;

        let components = array
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    AppError::MalformedEmbedding("embedding component is not numeric".to_string())
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        Self::from_components(components, dim)
    }

    pub fn is_zero(&self) -> bool {
        self.components.iter().all(|c| *c == 0.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.components
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.components
    }

    pub fn dim(&self) -> usize {
        self.components.len()
    }
}

/// Cosine similarity with non-finite inputs flattened to 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

/// How many recent positive interactions feed the average.
const MAX_SOURCE_INTERACTIONS: i64 = 100;

#[derive(Clone)]
pub struct UserEmbeddingService {
    interactions: InteractionRepository,
    metadata: Arc<dyn ResourceMetadataProvider>,
    cache: Arc<dyn EmbeddingCache>,
    dim: usize,
}

impl UserEmbeddingService {
    pub fn new(
        interactions: InteractionRepository,
        metadata: Arc<dyn ResourceMetadataProvider>,
        cache: Arc<dyn EmbeddingCache>,
        dim: usize,
    ) -> Self {
        Self {
            interactions,
            metadata,
            cache,
            dim,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The user's preference vector, cached for 5 minutes. Malformed or
    /// missing resource embeddings are skipped, never fatal; with nothing
    /// usable left the zero vector is returned.
    pub async fn get_user_embedding(&self, user_id: Uuid) -> Result<EmbeddingVector> {
        if let Some(cached) = self.cache.get(user_id).await {
            return EmbeddingVector::from_components(cached, self.dim);
        }

        let embedding = self.compute_user_embedding(user_id).await?;
        self.cache.put(user_id, embedding.as_slice().to_vec()).await;

        Ok(embedding)
    }

    async fn compute_user_embedding(&self, user_id: Uuid) -> Result<EmbeddingVector> {
        let positives = self
            .interactions
            .recent_positive(user_id, MAX_SOURCE_INTERACTIONS)
            .await?;

        if positives.is_empty() {
            return Ok(EmbeddingVector::zeros(self.dim));
        }

        let resource_ids: Vec<Uuid> = positives.iter().map(|i| i.resource_id).collect();
        let metadata = self.metadata.get_batch(&resource_ids).await?;

        let mut weighted_sum = vec![0.0_f32; self.dim];
        let mut weight_total = 0.0_f32;
        let mut used = 0usize;

        for interaction in &positives {
            let Some(meta) = metadata.get(&interaction.resource_id) else {
                debug!(resource_id = %interaction.resource_id, "No metadata for resource, skipping");
                continue;
            };
            let Some(raw) = meta.embedding.as_ref() else {
                debug!(resource_id = %interaction.resource_id, "Resource has no embedding, skipping");
                continue;
            };

            let embedding = match EmbeddingVector::parse_json(raw, self.dim) {
                Ok(embedding) => embedding,
                Err(e) => {
                    debug!(
                        resource_id = %interaction.resource_id,
                        "Skipping malformed embedding: {}", e
                    );
                    continue;
                }
            };

            let weight = interaction.interaction_strength;
            for (acc, component) in weighted_sum.iter_mut().zip(embedding.as_slice()) {
                *acc += weight * component;
            }
            weight_total += weight;
            used += 1;
        }

        if used == 0 || weight_total <= 0.0 {
            info!(user_id = %user_id, "No usable embeddings, returning cold-start vector");
            return Ok(EmbeddingVector::zeros(self.dim));
        }

        for component in weighted_sum.iter_mut() {
            *component /= weight_total;
        }

        debug!(
            user_id = %user_id,
            sources = used,
            "Computed user embedding"
        );

        EmbeddingVector::from_components(weighted_sum, self.dim)
    }
}
