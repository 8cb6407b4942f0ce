//! Novelty promotion.
//!
//! Under-exposed candidates (relative to the pool's median view count) get
//! a multiplicative boost when the user's novelty preference allows, and
//! the final list is guaranteed a floor of low-view items from outside the
//! top-viewed quartile.

use crate::models::Candidate;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Maximum relative boost for a fully novel candidate.
const NOVELTY_BOOST_FACTOR: f32 = 0.2;
/// Minimum share of the final list from outside the top-viewed quartile.
const LOW_VIEW_FLOOR_FRACTION: f32 = 0.2;

pub struct NoveltyBooster;

impl Default for NoveltyBooster {
    fn default() -> Self {
        Self::new()
    }
}

impl NoveltyBooster {
    pub fn new() -> Self {
        Self
    }

    /// Boost scores and enforce the low-view floor over the MMR selection,
    /// swapping in qualifying candidates from the rest of the pool when
    /// the floor is not already met. Returns the final list, re-sorted by
    /// boosted score and truncated to `limit`.
    pub fn finalize(
        &self,
        selected: Vec<Candidate>,
        rest_of_pool: Vec<Candidate>,
        novelty_preference: f32,
        limit: usize,
    ) -> Vec<Candidate> {
        if selected.is_empty() {
            return selected;
        }

        let median = median_view_count(selected.iter().chain(rest_of_pool.iter()));
        let quartile = top_view_quartile_threshold(selected.iter().chain(rest_of_pool.iter()));

        let mut selected = selected;
        let mut rest = rest_of_pool;
        for candidate in selected.iter_mut().chain(rest.iter_mut()) {
            apply_boost(candidate, median, novelty_preference);
        }

        enforce_low_view_floor(&mut selected, &mut rest, quartile, limit);

        selected.sort_by(|a, b| {
            b.hybrid_score
                .partial_cmp(&a.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        selected.truncate(limit);
        selected
    }
}

/// `1 - view_count / median`, clamped to [0, 1]. Zero views is fully
/// novel; anything far above the median clamps to 0. A pool with a zero
/// median treats every candidate as fully novel.
pub fn novelty_score(view_count: i64, median_view_count: f64) -> f32 {
    if median_view_count <= 0.0 {
        return 1.0;
    }
    (1.0 - (view_count as f64 / median_view_count) as f32).clamp(0.0, 1.0)
}

fn apply_boost(candidate: &mut Candidate, median: f64, novelty_preference: f32) {
    let novelty = novelty_score(candidate.view_count, median);
    // Boost only, never a penalty.
    if novelty > novelty_preference {
        candidate.hybrid_score *= 1.0 + NOVELTY_BOOST_FACTOR * novelty;
    }
}

fn median_view_count<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> f64 {
    let mut counts: Vec<i64> = candidates.map(|c| c.view_count).collect();
    if counts.is_empty() {
        return 0.0;
    }
    counts.sort_unstable();

    let mid = counts.len() / 2;
    if counts.len() % 2 == 1 {
        counts[mid] as f64
    } else {
        (counts[mid - 1] + counts[mid]) as f64 / 2.0
    }
}

/// Nearest-rank 75th percentile of pool view counts. A candidate at or
/// above this threshold is in the top-viewed quartile.
fn top_view_quartile_threshold<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> i64 {
    let mut counts: Vec<i64> = candidates.map(|c| c.view_count).collect();
    if counts.is_empty() {
        return i64::MAX;
    }
    counts.sort_unstable();

    let rank = ((counts.len() as f64) * 0.75).ceil() as usize;
    counts[rank.saturating_sub(1).min(counts.len() - 1)]
}

fn is_low_view(candidate: &Candidate, quartile: i64) -> bool {
    candidate.view_count < quartile
}

/// Ensure at least 20% of the final list comes from outside the top-viewed
/// quartile by swapping the weakest high-view picks for the strongest
/// qualifying unselected candidates.
fn enforce_low_view_floor(
    selected: &mut Vec<Candidate>,
    rest: &mut Vec<Candidate>,
    quartile: i64,
    limit: usize,
) {
    let final_len = selected.len().min(limit);
    if final_len == 0 {
        return;
    }

    let required = ((final_len as f32) * LOW_VIEW_FLOOR_FRACTION).ceil() as usize;
    let have = selected
        .iter()
        .take(final_len)
        .filter(|c| is_low_view(c, quartile))
        .count();
    if have >= required {
        return;
    }

    // Strongest qualifying replacements first.
    let selected_ids: HashSet<Uuid> = selected.iter().map(|c| c.resource_id).collect();
    let mut replacements: Vec<usize> = rest
        .iter()
        .enumerate()
        .filter(|(_, c)| is_low_view(c, quartile) && !selected_ids.contains(&c.resource_id))
        .map(|(i, _)| i)
        .collect();
    replacements.sort_by(|a, b| {
        rest[*b]
            .hybrid_score
            .partial_cmp(&rest[*a].hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut deficit = required - have;
    for replacement_idx in replacements {
        if deficit == 0 {
            break;
        }

        // Weakest high-view entry still in the list.
        let Some(victim_idx) = selected
            .iter()
            .enumerate()
            .filter(|(_, c)| !is_low_view(c, quartile))
            .min_by(|(_, a), (_, b)| {
                a.hybrid_score
                    .partial_cmp(&b.hybrid_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
        else {
            break;
        };

        let incoming = rest[replacement_idx].clone();
        debug!(
            displaced = %selected[victim_idx].resource_id,
            promoted = %incoming.resource_id,
            "Swapped in low-view candidate to satisfy novelty floor"
        );
        selected[victim_idx] = incoming;
        deficit -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u128, score: f32, views: i64) -> Candidate {
        let mut c = Candidate::new(Uuid::from_u128(id));
        c.hybrid_score = score;
        c.view_count = views;
        c
    }

    #[test]
    fn test_novelty_score_bounds() {
        assert_eq!(novelty_score(0, 100.0), 1.0);
        assert_eq!(novelty_score(100, 100.0), 0.0);
        assert_eq!(novelty_score(500, 100.0), 0.0);
        assert!((novelty_score(50, 100.0) - 0.5).abs() < 1e-6);
        // Zero-median pool: everything is equally under-exposed.
        assert_eq!(novelty_score(0, 0.0), 1.0);
    }

    #[test]
    fn test_boost_only_above_preference() {
        let median = 100.0;

        let mut boosted = candidate(1, 0.5, 0);
        apply_boost(&mut boosted, median, 0.3);
        assert!((boosted.hybrid_score - 0.5 * 1.2).abs() < 1e-6);

        // Novelty below the preference threshold: untouched.
        let mut untouched = candidate(2, 0.5, 90);
        apply_boost(&mut untouched, median, 0.3);
        assert_eq!(untouched.hybrid_score, 0.5);

        // Never a penalty, even for the most-viewed candidate.
        let mut heavy = candidate(3, 0.5, 10_000);
        apply_boost(&mut heavy, median, 0.0);
        assert!(heavy.hybrid_score >= 0.5);
    }

    #[test]
    fn test_finalize_empty_is_empty() {
        let booster = NoveltyBooster::new();
        assert!(booster.finalize(Vec::new(), Vec::new(), 0.3, 20).is_empty());
    }

    #[test]
    fn test_low_view_floor_swaps_in_novel_candidates() {
        let booster = NoveltyBooster::new();

        // 20 selected heavy-view items, low-view alternatives left in the
        // pool. At novelty_preference = 1.0 no boost fires, so the floor
        // alone must pull in >= 4 low-view items.
        let selected: Vec<Candidate> = (0..20)
            .map(|i| candidate(i + 1, 0.9 - 0.01 * i as f32, 1_000 + i as i64))
            .collect();
        let rest: Vec<Candidate> = (0..10)
            .map(|i| candidate(100 + i, 0.5 - 0.01 * i as f32, 3))
            .collect();

        let final_list = booster.finalize(selected, rest, 1.0, 20);

        assert_eq!(final_list.len(), 20);
        let low_view = final_list.iter().filter(|c| c.view_count < 1_000).count();
        assert!(low_view >= 4, "expected >= 4 low-view items, got {}", low_view);
    }

    #[test]
    fn test_floor_already_met_changes_nothing() {
        let booster = NoveltyBooster::new();

        let selected = vec![
            candidate(1, 0.9, 1_000),
            candidate(2, 0.8, 900),
            candidate(3, 0.7, 2),
            candidate(4, 0.6, 1),
        ];
        let ids_before: Vec<Uuid> = selected.iter().map(|c| c.resource_id).collect();

        let final_list = booster.finalize(selected, Vec::new(), 1.0, 4);
        let ids_after: Vec<Uuid> = final_list.iter().map(|c| c.resource_id).collect();
        assert_eq!(ids_before, ids_after);
    }

    #[test]
    fn test_no_qualifying_replacements_degrades_gracefully() {
        let booster = NoveltyBooster::new();

        // Uniform view counts: nobody is outside the top quartile and no
        // replacement qualifies; the list passes through unharmed.
        let selected: Vec<Candidate> =
            (0..10).map(|i| candidate(i + 1, 0.5, 100)).collect();

        let final_list = booster.finalize(selected, Vec::new(), 1.0, 10);
        assert_eq!(final_list.len(), 10);
    }

    #[test]
    fn test_median_view_count() {
        let pool = vec![
            candidate(1, 0.0, 10),
            candidate(2, 0.0, 20),
            candidate(3, 0.0, 30),
        ];
        assert_eq!(median_view_count(pool.iter()), 20.0);

        let even = vec![candidate(1, 0.0, 10), candidate(2, 0.0, 30)];
        assert_eq!(median_view_count(even.iter()), 20.0);
    }
}
