pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{
    CandidateGenerator, CollaborativeScorer, DiversityOptimizer, InteractionRecorder,
    NoveltyBooster, RecommendationEngine, UserProfileManager,
};
