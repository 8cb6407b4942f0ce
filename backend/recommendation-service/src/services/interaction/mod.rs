//! Interaction recording and strength scoring.

use crate::error::{AppError, Result};
use crate::models::{InteractionType, UserInteraction};
use crate::repository::InteractionRepository;
use crate::services::profile::UserProfileManager;
use tracing::{debug, warn};
use uuid::Uuid;

/// Optional context captured with an interaction event.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionContext {
    pub dwell_time_seconds: Option<f32>,
    pub scroll_depth: Option<f32>,
    /// Caller-supplied rating signal, required for `rating` interactions.
    pub rating: Option<f32>,
}

/// Dwell time at which a view saturates its contribution.
const VIEW_DWELL_SATURATION_SECS: f32 = 300.0;
/// Interactions between preference-learning refreshes.
const LEARNING_TRIGGER_EVERY: i64 = 10;

/// Derive the engagement strength for one event, in [0, 1].
///
/// Fixed base values per type; views are computed from dwell time and
/// scroll depth and are monotonically increasing in both.
pub fn interaction_strength(interaction_type: InteractionType, context: &InteractionContext) -> f32 {
    match interaction_type {
        InteractionType::Annotation => 0.7,
        InteractionType::CollectionAdd => 0.8,
        InteractionType::Export => 0.9,
        InteractionType::View => {
            let dwell = context.dwell_time_seconds.unwrap_or(0.0).max(0.0);
            let scroll = context.scroll_depth.unwrap_or(0.0).clamp(0.0, 1.0);
            let dwell_part = (dwell / VIEW_DWELL_SATURATION_SECS).min(1.0);
            (0.1 + 0.5 * dwell_part + 0.4 * scroll).clamp(0.0, 1.0)
        }
        InteractionType::Rating => context.rating.unwrap_or(0.0).clamp(0.0, 1.0),
    }
}

/// Confidence in the derived strength: explicit signals are trusted more
/// than a bare view event.
fn interaction_confidence(interaction_type: InteractionType, context: &InteractionContext) -> f32 {
    match interaction_type {
        InteractionType::Rating => 1.0,
        InteractionType::Annotation | InteractionType::CollectionAdd | InteractionType::Export => {
            0.9
        }
        InteractionType::View => {
            if context.dwell_time_seconds.is_some() || context.scroll_depth.is_some() {
                0.8
            } else {
                0.5
            }
        }
    }
}

#[derive(Clone)]
pub struct InteractionRecorder {
    interactions: InteractionRepository,
    profiles: UserProfileManager,
}

impl InteractionRecorder {
    pub fn new(interactions: InteractionRepository, profiles: UserProfileManager) -> Self {
        Self {
            interactions,
            profiles,
        }
    }

    /// Persist one interaction event.
    ///
    /// Repeats on the same (user, resource) collapse into the existing row:
    /// `return_visits` is bumped and the stored strength only ever goes up.
    /// Every call bumps the profile counters; every 10th interaction kicks
    /// off preference learning in the background (best effort).
    pub async fn track_interaction(
        &self,
        user_id: Uuid,
        resource_id: Uuid,
        interaction_type: &str,
        context: InteractionContext,
    ) -> Result<UserInteraction> {
        let parsed = InteractionType::parse(interaction_type)
            .ok_or_else(|| AppError::InvalidInteractionType(interaction_type.to_string()))?;

        let strength = interaction_strength(parsed, &context);
        let confidence = interaction_confidence(parsed, &context);

        // Profile row must exist before its counters move.
        self.profiles.get_or_create_profile(user_id).await?;

        let interaction = self
            .interactions
            .upsert_interaction(user_id, resource_id, parsed.as_str(), strength, confidence)
            .await?;

        let total = self.profiles.record_activity(user_id).await?;

        debug!(
            user_id = %user_id,
            resource_id = %resource_id,
            interaction_type = parsed.as_str(),
            strength,
            return_visits = interaction.return_visits,
            "Tracked interaction"
        );

        if total % LEARNING_TRIGGER_EVERY == 0 {
            let profiles = self.profiles.clone();
            tokio::spawn(async move {
                if let Err(e) = profiles.learn_preferences(user_id).await {
                    warn!(user_id = %user_id, "Preference learning failed: {:#}", e);
                }
            });
        }

        Ok(interaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_strength_table() {
        let ctx = InteractionContext::default();
        assert_eq!(interaction_strength(InteractionType::Annotation, &ctx), 0.7);
        assert_eq!(
            interaction_strength(InteractionType::CollectionAdd, &ctx),
            0.8
        );
        assert_eq!(interaction_strength(InteractionType::Export, &ctx), 0.9);
    }

    #[test]
    fn test_view_strength_monotonic_in_dwell_and_scroll() {
        let strength = |dwell: f32, scroll: f32| {
            interaction_strength(
                InteractionType::View,
                &InteractionContext {
                    dwell_time_seconds: Some(dwell),
                    scroll_depth: Some(scroll),
                    rating: None,
                },
            )
        };

        assert!(strength(60.0, 0.2) > strength(10.0, 0.2));
        assert!(strength(60.0, 0.8) > strength(60.0, 0.2));
        // Clamped at both ends.
        assert!(strength(10_000.0, 1.0) <= 1.0);
        assert!(strength(0.0, 0.0) >= 0.0);
    }

    #[test]
    fn test_rating_strength_clamped() {
        let strength = |rating: f32| {
            interaction_strength(
                InteractionType::Rating,
                &InteractionContext {
                    rating: Some(rating),
                    ..Default::default()
                },
            )
        };

        assert_eq!(strength(0.6), 0.6);
        assert_eq!(strength(1.5), 1.0);
        assert_eq!(strength(-0.5), 0.0);
    }

    #[test]
    fn test_bare_view_is_weak_and_low_confidence() {
        let ctx = InteractionContext::default();
        let strength = interaction_strength(InteractionType::View, &ctx);
        assert!(strength <= 0.4, "a context-free view must not be positive");
        assert_eq!(interaction_confidence(InteractionType::View, &ctx), 0.5);
    }
}
