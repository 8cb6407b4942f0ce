use actix_web::{get, post, put, web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::repository::ProfileSettingsUpdate;
use crate::services::interaction::InteractionContext;
use crate::services::recommender::{RecommendationRequest, DEFAULT_LIMIT, MAX_LIMIT};
use crate::services::{
    InteractionRecorder, RecommendationEngine, RecommendationStrategy, UserProfileManager,
};

/// Shared handler state, wired in `main`.
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
    pub recorder: InteractionRecorder,
    pub profiles: UserProfileManager,
}

// ===========================================================================
// Request/Response DTOs
// ===========================================================================

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub user_id: Uuid,
    pub limit: Option<usize>,
    pub strategy: Option<RecommendationStrategy>,
    pub diversity: Option<f32>,
    pub min_quality: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct TrackInteractionRequest {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub interaction_type: String,
    pub dwell_time_seconds: Option<f32>,
    pub scroll_depth: Option<f32>,
    pub rating: Option<f32>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub diversity_preference: Option<f32>,
    pub novelty_preference: Option<f32>,
    pub recency_bias: Option<f32>,
    pub excluded_domains: Option<Vec<String>>,
    pub score_weights: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub was_clicked: Option<bool>,
    pub was_useful: Option<bool>,
    pub notes: Option<String>,
}

// ===========================================================================
// Handlers
// ===========================================================================

#[get("/api/v1/recommendations")]
pub async fn get_recommendations(
    state: web::Data<AppState>,
    query: web::Query<RecommendationQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::Validation(format!(
            "limit must be within 1..={}, got {}",
            MAX_LIMIT, limit
        )));
    }

    let response = state
        .engine
        .recommend(RecommendationRequest {
            user_id: query.user_id,
            limit,
            strategy: query.strategy.unwrap_or(RecommendationStrategy::Hybrid),
            diversity: query.diversity,
            min_quality: query.min_quality,
        })
        .await?;

    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/v1/interactions")]
pub async fn track_interaction(
    state: web::Data<AppState>,
    body: web::Json<TrackInteractionRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    if let Some(session_id) = &body.session_id {
        debug!(session_id = %session_id, "Interaction tracked within session");
    }

    let interaction = state
        .recorder
        .track_interaction(
            body.user_id,
            body.resource_id,
            &body.interaction_type,
            InteractionContext {
                dwell_time_seconds: body.dwell_time_seconds,
                scroll_depth: body.scroll_depth,
                rating: body.rating,
            },
        )
        .await?;

    Ok(HttpResponse::Created().json(interaction))
}

#[get("/api/v1/profile/{user_id}")]
pub async fn get_profile(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();

    let profile = state
        .profiles
        .get_profile(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no profile for user {}", user_id)))?;

    Ok(HttpResponse::Ok().json(profile))
}

#[put("/api/v1/profile/{user_id}")]
pub async fn update_profile(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let body = body.into_inner();

    let profile = state
        .profiles
        .update_profile_settings(
            user_id,
            ProfileSettingsUpdate {
                diversity_preference: body.diversity_preference,
                novelty_preference: body.novelty_preference,
                recency_bias: body.recency_bias,
                excluded_domains: body.excluded_domains,
                score_weights: body.score_weights,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(profile))
}

#[post("/api/v1/recommendations/feedback")]
pub async fn submit_feedback(
    state: web::Data<AppState>,
    body: web::Json<FeedbackRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();

    let feedback = state
        .engine
        .submit_feedback(
            body.user_id,
            body.resource_id,
            body.was_clicked,
            body.was_useful,
            body.notes,
        )
        .await?;

    Ok(HttpResponse::Ok().json(feedback))
}
