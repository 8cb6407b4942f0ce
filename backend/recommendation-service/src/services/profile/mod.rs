//! User profile management: preference settings, aggregate counters, and
//! the periodic preferred-author learning pass.

use crate::clients::ResourceMetadataProvider;
use crate::error::{AppError, Result};
use crate::models::UserProfile;
use crate::repository::{InteractionRepository, ProfileRepository, ProfileSettingsUpdate};
use crate::services::ranking::HybridWeights;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Preference learning window and cap.
const LEARNING_WINDOW_DAYS: i64 = 90;
const LEARNING_INTERACTION_CAP: i64 = 1000;
const PREFERRED_AUTHOR_COUNT: usize = 10;

const MAX_DOMAIN_LEN: usize = 100;

fn validate_unit_interval(field: &str, value: Option<f32>) -> Result<()> {
    if let Some(v) = value {
        if !(0.0..=1.0).contains(&v) || !v.is_finite() {
            return Err(AppError::InvalidPreferenceRange(format!(
                "{} must be within [0.0, 1.0], got {}",
                field, v
            )));
        }
    }
    Ok(())
}

/// Trim and validate excluded-domain entries. Entries that cannot be
/// sanitized reject the whole update.
fn sanitize_domains(domains: Vec<String>) -> Result<Vec<String>> {
    let mut sanitized = Vec::with_capacity(domains.len());
    for raw in domains {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidInputList(
                "excluded_domains contains an empty entry".to_string(),
            ));
        }
        if trimmed.len() > MAX_DOMAIN_LEN {
            return Err(AppError::InvalidInputList(format!(
                "excluded_domains entry exceeds {} characters",
                MAX_DOMAIN_LEN
            )));
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(AppError::InvalidInputList(
                "excluded_domains entry contains control characters".to_string(),
            ));
        }
        sanitized.push(trimmed.to_string());
    }
    Ok(sanitized)
}

#[derive(Clone)]
pub struct UserProfileManager {
    profiles: ProfileRepository,
    interactions: InteractionRepository,
    metadata: Arc<dyn ResourceMetadataProvider>,
}

impl UserProfileManager {
    pub fn new(
        profiles: ProfileRepository,
        interactions: InteractionRepository,
        metadata: Arc<dyn ResourceMetadataProvider>,
    ) -> Self {
        Self {
            profiles,
            interactions,
            metadata,
        }
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(user_id).await?)
    }

    pub async fn get_or_create_profile(&self, user_id: Uuid) -> Result<UserProfile> {
        Ok(self.profiles.get_or_create(user_id).await?)
    }

    pub async fn record_activity(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.profiles.record_activity(user_id).await?)
    }

    /// Validate and apply a settings update. Any scalar outside [0, 1], an
    /// unsanitizable excluded-domain entry, or a weight override that does
    /// not cover all five components summing to 1.0 rejects the update and
    /// leaves the stored profile untouched.
    pub async fn update_profile_settings(
        &self,
        user_id: Uuid,
        mut update: ProfileSettingsUpdate,
    ) -> Result<UserProfile> {
        validate_unit_interval("diversity_preference", update.diversity_preference)?;
        validate_unit_interval("novelty_preference", update.novelty_preference)?;
        validate_unit_interval("recency_bias", update.recency_bias)?;

        if let Some(domains) = update.excluded_domains.take() {
            update.excluded_domains = Some(sanitize_domains(domains)?);
        }

        if let Some(weights_json) = &update.score_weights {
            let weights: HybridWeights = serde_json::from_value(weights_json.clone())
                .map_err(|e| {
                    AppError::Validation(format!(
                        "score_weights must cover all five components: {}",
                        e
                    ))
                })?;
            weights.validate()?;
        }

        self.profiles.get_or_create(user_id).await?;
        Ok(self.profiles.update_settings(user_id, update).await?)
    }

    /// Recompute the preferred-author list from positive interactions in
    /// the trailing window. Best effort: callers treat a failure as a log
    /// line, not an error, and the previous list stays in place.
    pub async fn learn_preferences(&self, user_id: Uuid) -> Result<()> {
        let since = Utc::now() - Duration::days(LEARNING_WINDOW_DAYS);
        let positives = self
            .interactions
            .positive_since(user_id, since, LEARNING_INTERACTION_CAP)
            .await?;

        if positives.is_empty() {
            debug!(user_id = %user_id, "No positive interactions in window, keeping author list");
            return Ok(());
        }

        let resource_ids: Vec<Uuid> = positives.iter().map(|i| i.resource_id).collect();
        let metadata = self.metadata.get_batch(&resource_ids).await?;

        let mut author_counts: HashMap<String, usize> = HashMap::new();
        for interaction in &positives {
            if let Some(meta) = metadata.get(&interaction.resource_id) {
                for author in &meta.authors {
                    *author_counts.entry(author.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = author_counts.into_iter().collect();
        // Frequency descending, author name ascending for determinism.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let top_authors: Vec<String> = ranked
            .into_iter()
            .take(PREFERRED_AUTHOR_COUNT)
            .map(|(author, _)| author)
            .collect();

        self.profiles
            .set_preferred_authors(user_id, &top_authors)
            .await?;

        info!(
            user_id = %user_id,
            authors = top_authors.len(),
            "Refreshed preferred-author list"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_interval_validation() {
        assert!(validate_unit_interval("diversity_preference", Some(0.0)).is_ok());
        assert!(validate_unit_interval("diversity_preference", Some(1.0)).is_ok());
        assert!(validate_unit_interval("diversity_preference", None).is_ok());

        assert!(matches!(
            validate_unit_interval("diversity_preference", Some(1.2)),
            Err(AppError::InvalidPreferenceRange(_))
        ));
        assert!(matches!(
            validate_unit_interval("novelty_preference", Some(-0.1)),
            Err(AppError::InvalidPreferenceRange(_))
        ));
        assert!(matches!(
            validate_unit_interval("recency_bias", Some(f32::NAN)),
            Err(AppError::InvalidPreferenceRange(_))
        ));
    }

    #[test]
    fn test_sanitize_domains() {
        let cleaned =
            sanitize_domains(vec!["  neuroscience ".to_string(), "hci".to_string()]).unwrap();
        assert_eq!(cleaned, vec!["neuroscience".to_string(), "hci".to_string()]);

        assert!(matches!(
            sanitize_domains(vec!["   ".to_string()]),
            Err(AppError::InvalidInputList(_))
        ));
        assert!(matches!(
            sanitize_domains(vec!["bad\u{0007}domain".to_string()]),
            Err(AppError::InvalidInputList(_))
        ));
        assert!(matches!(
            sanitize_domains(vec!["x".repeat(101)]),
            Err(AppError::InvalidInputList(_))
        ));
    }
}
