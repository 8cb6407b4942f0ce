use crate::models::RecommendationFeedback;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// One slot of a served recommendation list, recorded as an impression.
#[derive(Debug, Clone)]
pub struct ServedRecommendation {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub strategy: String,
    pub score: f32,
    pub rank_position: i32,
}

/// Aggregated click-through row for one strategy tag.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StrategyCtrRow {
    pub strategy: String,
    pub impressions: i64,
    pub clicks: i64,
}

/// Repository for recommendation feedback (impressions, clicks, ratings).
#[derive(Clone)]
pub struct FeedbackRepository {
    pool: PgPool,
}

impl FeedbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one row per served item.
    pub async fn record_served(&self, served: &[ServedRecommendation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for item in served {
            sqlx::query(
                r#"
                INSERT INTO recommendation_feedback
                    (id, user_id, resource_id, strategy, score, rank_position,
                     was_clicked, was_useful, notes, served_at, feedback_at)
                VALUES ($1, $2, $3, $4, $5, $6, FALSE, NULL, NULL, NOW(), NULL)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(item.user_id)
            .bind(item.resource_id)
            .bind(&item.strategy)
            .bind(item.score)
            .bind(item.rank_position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Apply click / usefulness feedback to the most recently served slot
    /// for (user, resource). Returns the updated row, or None when nothing
    /// was ever served.
    pub async fn apply_feedback(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        was_clicked: Option<bool>,
        was_useful: Option<bool>,
        notes: Option<String>,
    ) -> Result<Option<RecommendationFeedback>> {
        let feedback = sqlx::query_as::<_, RecommendationFeedback>(
            r#"
            UPDATE recommendation_feedback
            SET was_clicked = COALESCE($3, was_clicked),
                was_useful = COALESCE($4, was_useful),
                notes = COALESCE($5, notes),
                feedback_at = NOW()
            WHERE id = (
                SELECT id FROM recommendation_feedback
                WHERE user_id = $1 AND resource_id = $2
                ORDER BY served_at DESC
                LIMIT 1
            )
            RETURNING id, user_id, resource_id, strategy, score, rank_position,
                      was_clicked, was_useful, notes, served_at, feedback_at
            "#,
        )
        .bind(user_id)
        .bind(resource_id)
        .bind(was_clicked)
        .bind(was_useful)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feedback)
    }

    /// Impressions and clicks per strategy tag inside a trailing window.
    pub async fn ctr_by_strategy(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<StrategyCtrRow>> {
        let rows = sqlx::query_as::<_, StrategyCtrRow>(
            r#"
            SELECT strategy,
                   COUNT(*) AS impressions,
                   COUNT(*) FILTER (WHERE was_clicked) AS clicks
            FROM recommendation_feedback
            WHERE user_id = $1 AND served_at >= $2
            GROUP BY strategy
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
