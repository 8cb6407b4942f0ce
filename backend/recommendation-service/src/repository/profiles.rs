use crate::models::{
    UserProfile, DEFAULT_DIVERSITY_PREFERENCE, DEFAULT_NOVELTY_PREFERENCE, DEFAULT_RECENCY_BIAS,
};
use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Validated partial update for profile settings. `None` fields are left
/// untouched by the UPDATE.
#[derive(Debug, Clone, Default)]
pub struct ProfileSettingsUpdate {
    pub diversity_preference: Option<f32>,
    pub novelty_preference: Option<f32>,
    pub recency_bias: Option<f32>,
    pub excluded_domains: Option<Vec<String>>,
    pub score_weights: Option<serde_json::Value>,
}

/// Repository for user preference profiles.
#[derive(Clone)]
pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT user_id, diversity_preference, novelty_preference, recency_bias,
                   excluded_domains, preferred_authors, score_weights,
                   total_interactions, last_active_at, created_at, updated_at
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Create with defaults if absent (idempotent).
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<UserProfile> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            INSERT INTO user_profiles
                (user_id, diversity_preference, novelty_preference, recency_bias,
                 excluded_domains, preferred_authors, score_weights,
                 total_interactions, last_active_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, '{}', '{}', NULL, 0, NOW(), NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET user_id = EXCLUDED.user_id
            RETURNING user_id, diversity_preference, novelty_preference, recency_bias,
                      excluded_domains, preferred_authors, score_weights,
                      total_interactions, last_active_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(DEFAULT_DIVERSITY_PREFERENCE)
        .bind(DEFAULT_NOVELTY_PREFERENCE)
        .bind(DEFAULT_RECENCY_BIAS)
        .fetch_one(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Bump the interaction counter and activity timestamp. Returns the
    /// new total, which drives the every-10th preference-learning trigger.
    pub async fn record_activity(&self, user_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            UPDATE user_profiles
            SET total_interactions = total_interactions + 1,
                last_active_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING total_interactions
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// Apply an already-validated settings update. Unset fields keep their
    /// stored values.
    pub async fn update_settings(
        &self,
        user_id: Uuid,
        update: ProfileSettingsUpdate,
    ) -> Result<UserProfile> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            UPDATE user_profiles
            SET diversity_preference = COALESCE($2, diversity_preference),
                novelty_preference = COALESCE($3, novelty_preference),
                recency_bias = COALESCE($4, recency_bias),
                excluded_domains = COALESCE($5, excluded_domains),
                score_weights = COALESCE($6, score_weights),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, diversity_preference, novelty_preference, recency_bias,
                      excluded_domains, preferred_authors, score_weights,
                      total_interactions, last_active_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(update.diversity_preference)
        .bind(update.novelty_preference)
        .bind(update.recency_bias)
        .bind(update.excluded_domains)
        .bind(update.score_weights)
        .fetch_one(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Replace the learned preferred-author list.
    pub async fn set_preferred_authors(&self, user_id: Uuid, authors: &[String]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_profiles
            SET preferred_authors = $2,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(authors)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
