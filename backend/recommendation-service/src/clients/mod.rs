//! Collaborator contracts. The core only ever talks to resource metadata,
//! the content-similarity index, and the graph service through these
//! traits, so the transports can be swapped (or mocked) without touching
//! the pipeline.

mod graph;
mod metadata;
mod similarity;

pub use graph::HttpGraphNeighbors;
pub use metadata::PgResourceMetadata;
pub use similarity::HttpSimilarityIndex;

use crate::models::ResourceMetadata;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Read model for resource metadata owned by the content subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceMetadataProvider: Send + Sync {
    async fn get(&self, resource_id: Uuid) -> Result<Option<ResourceMetadata>>;
    async fn get_batch(&self, resource_ids: &[Uuid]) -> Result<HashMap<Uuid, ResourceMetadata>>;
}

/// Content-similarity index: top-K resources by embedding cosine similarity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SimilarityIndexClient: Send + Sync {
    async fn similar_to(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(Uuid, f32)>>;
}

/// A resource within N hops of one of the seeds, with its hop distance.
#[derive(Debug, Clone, Copy)]
pub struct GraphNeighbor {
    pub resource_id: Uuid,
    pub hops: u32,
}

/// Graph traversal service: resources within N hops of a seed set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphNeighborClient: Send + Sync {
    async fn neighbors(
        &self,
        seeds: &[Uuid],
        hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphNeighbor>>;
}
