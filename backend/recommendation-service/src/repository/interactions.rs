use crate::models::UserInteraction;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for user-resource interaction rows.
#[derive(Clone)]
pub struct InteractionRepository {
    pool: PgPool,
}

impl InteractionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update the single row for (user, resource) atomically.
    ///
    /// On conflict the row keeps its original `interaction_type`, bumps
    /// `return_visits`, and takes the maximum of the stored and incoming
    /// strength; `is_positive` is recomputed from that maximum in the same
    /// statement so the pair can never be observed inconsistent.
    pub async fn upsert_interaction(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        interaction_type: &str,
        strength: f32,
        confidence: f32,
    ) -> Result<UserInteraction> {
        let interaction = sqlx::query_as::<_, UserInteraction>(
            r#"
            INSERT INTO user_interactions
                (id, user_id, resource_id, interaction_type, interaction_strength,
                 is_positive, return_visits, confidence, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5 > 0.4, 0, $6, NOW(), NOW())
            ON CONFLICT (user_id, resource_id) DO UPDATE
            SET return_visits = user_interactions.return_visits + 1,
                interaction_strength =
                    GREATEST(user_interactions.interaction_strength, EXCLUDED.interaction_strength),
                is_positive =
                    GREATEST(user_interactions.interaction_strength, EXCLUDED.interaction_strength) > 0.4,
                updated_at = NOW()
            RETURNING id, user_id, resource_id, interaction_type, interaction_strength,
                      is_positive, return_visits, confidence, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(resource_id)
        .bind(interaction_type)
        .bind(strength)
        .bind(confidence)
        .fetch_one(&self.pool)
        .await?;

        Ok(interaction)
    }

    /// Most recent positive interactions, newest first.
    pub async fn recent_positive(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<UserInteraction>> {
        let interactions = sqlx::query_as::<_, UserInteraction>(
            r#"
            SELECT id, user_id, resource_id, interaction_type, interaction_strength,
                   is_positive, return_visits, confidence, created_at, updated_at
            FROM user_interactions
            WHERE user_id = $1 AND is_positive = TRUE
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(interactions)
    }

    /// Positive interactions inside a trailing window, capped. Feeds
    /// preference learning.
    pub async fn positive_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        cap: i64,
    ) -> Result<Vec<UserInteraction>> {
        let interactions = sqlx::query_as::<_, UserInteraction>(
            r#"
            SELECT id, user_id, resource_id, interaction_type, interaction_strength,
                   is_positive, return_visits, confidence, created_at, updated_at
            FROM user_interactions
            WHERE user_id = $1 AND is_positive = TRUE AND updated_at >= $2
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;

        Ok(interactions)
    }

    /// Every resource id the user has interacted with (seen-set for
    /// collaborative scoring).
    pub async fn interacted_resource_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT resource_id
            FROM user_interactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// The user's most recently touched resources, newest first. Seeds the
    /// graph neighborhood lookup.
    pub async fn recent_resource_ids(&self, user_id: Uuid, limit: i64) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT resource_id
            FROM user_interactions
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
