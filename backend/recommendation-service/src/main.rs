use actix_web::{web, App, HttpServer};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommendation_service::clients::{
    HttpGraphNeighbors, HttpSimilarityIndex, PgResourceMetadata,
};
use recommendation_service::config::Config;
use recommendation_service::handlers::{
    get_profile, get_recommendations, submit_feedback, track_interaction, update_profile, AppState,
};
use recommendation_service::repository::{
    FeedbackRepository, InteractionRepository, ProfileRepository,
};
use recommendation_service::services::embedding::{
    EmbeddingCache, InMemoryEmbeddingCache, RedisEmbeddingCache,
};
use recommendation_service::services::{
    CandidateGenerator, CollaborativeScorer, InteractionRecorder, RecommendationEngine,
    UserEmbeddingService, UserProfileManager,
};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    tracing::info!(
        "Starting {} v{}",
        config.service.service_name,
        env!("CARGO_PKG_VERSION")
    );

    // Initialize database
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to create database pool");

    // Repositories
    let interactions = InteractionRepository::new(db_pool.clone());
    let profiles_repo = ProfileRepository::new(db_pool.clone());
    let feedback_repo = FeedbackRepository::new(db_pool.clone());

    // External collaborators
    let http = reqwest::Client::new();
    let metadata = Arc::new(PgResourceMetadata::new(db_pool.clone()));
    let similarity = Arc::new(HttpSimilarityIndex::new(
        http.clone(),
        config.clients.similarity_service_url.clone(),
    ));
    let graph = Arc::new(HttpGraphNeighbors::new(
        http,
        config.clients.graph_service_url.clone(),
    ));

    // User-embedding cache: in-process by default, Redis when configured.
    let cache: Arc<dyn EmbeddingCache> = match &config.recommendation.embedding_cache_redis_url {
        Some(url) => {
            let client = redis::Client::open(url.clone()).expect("Invalid Redis URL");
            tracing::info!("Using Redis-backed user-embedding cache");
            Arc::new(RedisEmbeddingCache::new(
                client,
                config.recommendation.embedding_cache_ttl_secs,
            ))
        }
        None => Arc::new(InMemoryEmbeddingCache::new(
            config.recommendation.embedding_cache_ttl_secs,
        )),
    };

    let embeddings = UserEmbeddingService::new(
        interactions.clone(),
        metadata.clone(),
        cache,
        config.recommendation.embedding_dim,
    );

    // Collaborative model snapshot: missing or stale snapshots degrade to
    // content + graph candidate generation.
    let scorer = CollaborativeScorer::load(Path::new(&config.recommendation.model_snapshot_path));

    let profiles = UserProfileManager::new(
        profiles_repo,
        interactions.clone(),
        metadata.clone(),
    );

    let generator = CandidateGenerator::new(
        interactions.clone(),
        embeddings,
        scorer,
        metadata,
        similarity,
        graph,
        Duration::from_millis(config.clients.source_timeout_ms),
    );

    let engine = Arc::new(RecommendationEngine::new(
        profiles.clone(),
        generator,
        feedback_repo,
    ));
    let recorder = InteractionRecorder::new(interactions, profiles.clone());

    let state = web::Data::new(AppState {
        engine,
        recorder,
        profiles,
    });

    let port = config.service.http_port;
    tracing::info!("HTTP server listening on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .service(get_recommendations)
            .service(track_interaction)
            .service(get_profile)
            .service(update_profile)
            .service(submit_feedback)
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
