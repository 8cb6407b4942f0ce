//! Read-side recommendation quality metrics.
//!
//! Monitoring signals only: none of these mutate ranking state, and all of
//! them tolerate empty input.

use crate::error::Result;
use crate::models::Candidate;
use crate::repository::FeedbackRepository;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Gini coefficient over a score distribution.
///
/// 0 = perfectly even, 1 = maximally concentrated. A served list under
/// 0.3 is considered diverse; that threshold is a monitoring target, not
/// a gate. Empty or zero-sum input yields 0.0.
pub fn gini_coefficient(scores: &[f32]) -> f32 {
    let n = scores.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted: Vec<f64> = scores.iter().map(|s| *s as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, score)| (i as f64 + 1.0) * score)
        .sum();

    let n = n as f64;
    ((2.0 * weighted) / (n * total) - (n + 1.0) / n) as f32
}

/// Fraction of a served list lying outside the top-viewed quartile of the
/// candidate pool it was drawn from. Empty input yields 0.0.
pub fn novelty_ratio(served: &[Candidate], pool: &[Candidate]) -> f32 {
    if served.is_empty() || pool.is_empty() {
        return 0.0;
    }

    let mut counts: Vec<i64> = pool.iter().map(|c| c.view_count).collect();
    counts.sort_unstable();
    let rank = ((counts.len() as f64) * 0.75).ceil() as usize;
    let quartile = counts[rank.saturating_sub(1).min(counts.len() - 1)];

    let outside = served.iter().filter(|c| c.view_count < quartile).count();
    outside as f32 / served.len() as f32
}

/// Click-through rate for one strategy tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyCtr {
    pub impressions: i64,
    pub clicks: i64,
    pub ctr: f32,
}

/// Read-side aggregations over recorded feedback.
#[derive(Clone)]
pub struct FeedbackMetricsService {
    feedback: FeedbackRepository,
}

impl FeedbackMetricsService {
    pub fn new(feedback: FeedbackRepository) -> Self {
        Self { feedback }
    }

    /// Clicks / impressions over the trailing window, segmented by the
    /// strategy that served each impression. No feedback in the window
    /// yields an empty map.
    pub async fn compute_ctr(
        &self,
        user_id: Uuid,
        window_days: i64,
    ) -> Result<HashMap<String, StrategyCtr>> {
        let since = Utc::now() - Duration::days(window_days);
        let rows = self.feedback.ctr_by_strategy(user_id, since).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let ctr = if row.impressions > 0 {
                    row.clicks as f32 / row.impressions as f32
                } else {
                    0.0
                };
                (
                    row.strategy,
                    StrategyCtr {
                        impressions: row.impressions,
                        clicks: row.clicks,
                        ctr,
                    },
                )
            })
            .collect())
    }
}
