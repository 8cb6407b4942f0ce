use super::SimilarityIndexClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP client for the platform's vector-similarity index.
#[derive(Clone)]
pub struct HttpSimilarityIndex {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SimilarQuery<'a> {
    embedding: &'a [f32],
    top_k: usize,
    min_similarity: f32,
}

#[derive(Deserialize)]
struct SimilarHit {
    resource_id: Uuid,
    similarity: f32,
}

#[derive(Deserialize)]
struct SimilarResponse {
    results: Vec<SimilarHit>,
}

impl HttpSimilarityIndex {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl SimilarityIndexClient for HttpSimilarityIndex {
    async fn similar_to(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(Uuid, f32)>> {
        let url = format!("{}/v1/similar", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&SimilarQuery {
                embedding,
                top_k,
                min_similarity,
            })
            .send()
            .await
            .context("similarity index request failed")?
            .error_for_status()
            .context("similarity index returned an error status")?
            .json::<SimilarResponse>()
            .await
            .context("failed to decode similarity index response")?;

        Ok(response
            .results
            .into_iter()
            .map(|hit| (hit.resource_id, hit.similarity))
            .collect())
    }
}
