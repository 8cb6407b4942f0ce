use super::ResourceMetadataProvider;
use crate::models::ResourceMetadata;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Postgres-backed read model over the externally-owned `resources` table.
#[derive(Clone)]
pub struct PgResourceMetadata {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    title: String,
    authors: Vec<String>,
    domains: Vec<String>,
    quality_score: f32,
    recency_score: f32,
    view_count: i64,
    embedding: Option<serde_json::Value>,
}

impl From<ResourceRow> for ResourceMetadata {
    fn from(row: ResourceRow) -> Self {
        ResourceMetadata {
            resource_id: row.id,
            title: row.title,
            authors: row.authors,
            domains: row.domains,
            quality_score: row.quality_score,
            recency_score: row.recency_score,
            view_count: row.view_count,
            embedding: row.embedding,
        }
    }
}

impl PgResourceMetadata {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceMetadataProvider for PgResourceMetadata {
    async fn get(&self, resource_id: Uuid) -> Result<Option<ResourceMetadata>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT id, title, authors, domains, quality_score, recency_score,
                   view_count, embedding
            FROM resources
            WHERE id = $1
            "#,
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ResourceMetadata::from))
    }

    async fn get_batch(&self, resource_ids: &[Uuid]) -> Result<HashMap<Uuid, ResourceMetadata>> {
        if resource_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT id, title, authors, domains, quality_score, recency_score,
                   view_count, embedding
            FROM resources
            WHERE id = ANY($1)
            "#,
        )
        .bind(resource_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, ResourceMetadata::from(row)))
            .collect())
    }
}
