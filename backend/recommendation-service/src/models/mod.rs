use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tracked interaction kinds. Stored as text in `user_interactions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Annotation,
    CollectionAdd,
    Export,
    Rating,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Annotation => "annotation",
            InteractionType::CollectionAdd => "collection_add",
            InteractionType::Export => "export",
            InteractionType::Rating => "rating",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(InteractionType::View),
            "annotation" => Some(InteractionType::Annotation),
            "collection_add" => Some(InteractionType::CollectionAdd),
            "export" => Some(InteractionType::Export),
            "rating" => Some(InteractionType::Rating),
            _ => None,
        }
    }
}

/// One user-resource interaction row. Unique on (user_id, resource_id):
/// repeats bump `return_visits` and can only raise `interaction_strength`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserInteraction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub interaction_type: String,
    pub interaction_strength: f32,
    pub is_positive: bool,
    pub return_visits: i32,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user preference settings and aggregate counters.
/// Created lazily on first interaction; never deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    /// MMR lambda, [0, 1].
    pub diversity_preference: f32,
    /// Novelty boost threshold, [0, 1].
    pub novelty_preference: f32,
    /// Recency bias, [0, 1].
    pub recency_bias: f32,
    pub excluded_domains: Vec<String>,
    /// Top-10 authors by positive-interaction frequency, recomputed
    /// by preference learning.
    pub preferred_authors: Vec<String>,
    /// Optional per-user hybrid weight override (all five components,
    /// summing to 1.0); validated on write.
    pub score_weights: Option<serde_json::Value>,
    pub total_interactions: i64,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_DIVERSITY_PREFERENCE: f32 = 0.5;
pub const DEFAULT_NOVELTY_PREFERENCE: f32 = 0.3;
pub const DEFAULT_RECENCY_BIAS: f32 = 0.5;

/// One served recommendation slot, updated at most twice (click, explicit
/// feedback). Read-side only - never feeds back into a live request.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecommendationFeedback {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_id: Uuid,
    pub strategy: String,
    pub score: f32,
    pub rank_position: i32,
    pub was_clicked: bool,
    pub was_useful: Option<bool>,
    pub notes: Option<String>,
    pub served_at: DateTime<Utc>,
    pub feedback_at: Option<DateTime<Utc>>,
}

/// Which retrieval strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Collaborative,
    Content,
    Graph,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Collaborative => "collaborative",
            CandidateSource::Content => "content",
            CandidateSource::Graph => "graph",
        }
    }
}

/// Per-strategy component scores before fusion. A component a candidate was
/// not produced by stays `None` and fuses as 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentScores {
    pub collaborative: Option<f32>,
    pub content: Option<f32>,
    pub graph: Option<f32>,
    pub quality: Option<f32>,
    pub recency: Option<f32>,
}

impl ComponentScores {
    /// Highest component score across sources, used for the merge cap.
    pub fn max_component(&self) -> f32 {
        [
            self.collaborative,
            self.content,
            self.graph,
            self.quality,
            self.recency,
        ]
        .iter()
        .flatten()
        .fold(0.0_f32, |acc, s| acc.max(*s))
    }
}

/// A resource under consideration for one recommendation request.
/// Ephemeral - lives only for the duration of the pipeline.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub resource_id: Uuid,
    pub scores: ComponentScores,
    pub sources: Vec<CandidateSource>,
    pub hybrid_score: f32,
    /// Enrichment from resource metadata.
    pub view_count: i64,
    pub embedding: Option<Vec<f32>>,
}

impl Candidate {
    pub fn new(resource_id: Uuid) -> Self {
        Self {
            resource_id,
            scores: ComponentScores::default(),
            sources: Vec::new(),
            hybrid_score: 0.0,
            view_count: 0,
            embedding: None,
        }
    }
}

/// External resource read model (owned elsewhere; consumed read-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub resource_id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub domains: Vec<String>,
    pub quality_score: f32,
    pub recency_score: f32,
    pub view_count: i64,
    pub embedding: Option<serde_json::Value>,
}

/// Per-request source statistics, logged after candidate generation.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub collaborative_count: usize,
    pub content_count: usize,
    pub graph_count: usize,
    pub merged_count: usize,
    pub final_count: usize,
}
