use super::{GraphNeighbor, GraphNeighborClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP client for the graph-service neighborhood lookup.
#[derive(Clone)]
pub struct HttpGraphNeighbors {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct NeighborQuery<'a> {
    seed_ids: &'a [Uuid],
    hops: u32,
    limit: usize,
}

#[derive(Deserialize)]
struct NeighborHit {
    resource_id: Uuid,
    hops: u32,
}

#[derive(Deserialize)]
struct NeighborResponse {
    neighbors: Vec<NeighborHit>,
}

impl HttpGraphNeighbors {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl GraphNeighborClient for HttpGraphNeighbors {
    async fn neighbors(
        &self,
        seeds: &[Uuid],
        hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphNeighbor>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/neighbors", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&NeighborQuery {
                seed_ids: seeds,
                hops,
                limit,
            })
            .send()
            .await
            .context("graph service request failed")?
            .error_for_status()
            .context("graph service returned an error status")?
            .json::<NeighborResponse>()
            .await
            .context("failed to decode graph service response")?;

        Ok(response
            .neighbors
            .into_iter()
            .map(|hit| GraphNeighbor {
                resource_id: hit.resource_id,
                hops: hit.hops.max(1),
            })
            .collect())
    }
}
