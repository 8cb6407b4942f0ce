//! Collaborative scorer.
//!
//! Serves scores from an immutable trained snapshot (see
//! `jobs::train_collaborative` for the offline side). "No signal" is a
//! first-class outcome: an untrained model or an unseen user/item yields
//! `Prediction::Unavailable`, never a zero score.

mod model;

pub use model::{
    DenseLayer, LayerSnapshot, ModelSnapshot, TwoTowerModel, DEFAULT_EMBEDDING_DIM, HIDDEN_WIDTHS,
};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of scoring one (user, item) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prediction {
    Scored(f32),
    Unavailable,
}

impl Prediction {
    pub fn scored(&self) -> Option<f32> {
        match self {
            Prediction::Scored(value) => Some(*value),
            Prediction::Unavailable => None,
        }
    }
}

/// Serving wrapper around the trained model. The snapshot is loaded once
/// and shared read-only; training replaces the file out-of-band.
#[derive(Clone)]
pub struct CollaborativeScorer {
    model: Option<Arc<TwoTowerModel>>,
}

impl CollaborativeScorer {
    /// Load the snapshot at `path`. A missing or undecodable snapshot is a
    /// degraded state, not a startup failure: the scorer reports
    /// unavailable and candidate generation falls back to content + graph.
    pub fn load(path: &Path) -> Self {
        match TwoTowerModel::load(path) {
            Ok(model) => {
                info!(
                    items = model.item_ids().count(),
                    path = %path.display(),
                    "Loaded collaborative model snapshot"
                );
                Self {
                    model: Some(Arc::new(model)),
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "Collaborative model unavailable, serving without it: {:#}", e
                );
                Self { model: None }
            }
        }
    }

    pub fn unavailable() -> Self {
        Self { model: None }
    }

    pub fn from_model(model: TwoTowerModel) -> Self {
        Self {
            model: Some(Arc::new(model)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn predict(&self, user_id: Uuid, item_id: Uuid) -> Prediction {
        match &self.model {
            Some(model) => match model.score(user_id, item_id) {
                Some(score) => Prediction::Scored(score),
                None => Prediction::Unavailable,
            },
            None => Prediction::Unavailable,
        }
    }

    /// Scores for every item the model can score; unseen items are simply
    /// absent from the map, so callers cannot mistake "no signal" for a
    /// low score.
    pub fn predict_batch(&self, user_id: Uuid, item_ids: &[Uuid]) -> HashMap<Uuid, f32> {
        let Some(model) = &self.model else {
            return HashMap::new();
        };
        if !model.knows_user(user_id) {
            return HashMap::new();
        }

        item_ids
            .iter()
            .filter_map(|item_id| {
                model
                    .score(user_id, *item_id)
                    .map(|score| (*item_id, score))
            })
            .collect()
    }

    /// The trained item vocabulary minus an exclusion set. Used to build
    /// the eligible pool for collaborative candidate generation.
    pub fn known_items_except(&self, exclude: &HashSet<Uuid>) -> Vec<Uuid> {
        match &self.model {
            Some(model) => model
                .item_ids()
                .filter(|id| !exclude.contains(id))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn scorer_with_pair(user_id: Uuid, item_id: Uuid) -> CollaborativeScorer {
        let mut users = HashMap::new();
        users.insert(user_id, Array1::from_vec(vec![0.1, 0.9]));
        let mut items = HashMap::new();
        items.insert(item_id, Array1::from_vec(vec![0.4, 0.6]));

        let layers = vec![
            DenseLayer {
                weights: Array2::from_shape_vec((2, 4), vec![0.1; 8]).unwrap(),
                bias: Array1::from_vec(vec![0.0, 0.0]),
            },
            DenseLayer {
                weights: Array2::from_shape_vec((1, 2), vec![0.5, 0.5]).unwrap(),
                bias: Array1::from_vec(vec![0.0]),
            },
        ];

        CollaborativeScorer::from_model(TwoTowerModel::new(2, users, items, layers))
    }

    #[test]
    fn test_unloaded_scorer_is_unavailable() {
        let scorer = CollaborativeScorer::unavailable();
        assert!(!scorer.is_available());
        assert_eq!(
            scorer.predict(Uuid::new_v4(), Uuid::new_v4()),
            Prediction::Unavailable
        );
        assert!(scorer.predict_batch(Uuid::new_v4(), &[Uuid::new_v4()]).is_empty());
    }

    #[test]
    fn test_unseen_pair_unavailable_not_zero() {
        let user_id = Uuid::from_u128(1);
        let item_id = Uuid::from_u128(2);
        let scorer = scorer_with_pair(user_id, item_id);

        assert!(matches!(
            scorer.predict(user_id, item_id),
            Prediction::Scored(_)
        ));
        assert_eq!(
            scorer.predict(user_id, Uuid::from_u128(3)),
            Prediction::Unavailable
        );
    }

    #[test]
    fn test_batch_skips_unknown_items() {
        let user_id = Uuid::from_u128(1);
        let item_id = Uuid::from_u128(2);
        let scorer = scorer_with_pair(user_id, item_id);

        let scores = scorer.predict_batch(user_id, &[item_id, Uuid::from_u128(3)]);
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key(&item_id));
    }

    #[test]
    fn test_known_items_except() {
        let user_id = Uuid::from_u128(1);
        let item_id = Uuid::from_u128(2);
        let scorer = scorer_with_pair(user_id, item_id);

        let mut exclude = HashSet::new();
        assert_eq!(scorer.known_items_except(&exclude), vec![item_id]);

        exclude.insert(item_id);
        assert!(scorer.known_items_except(&exclude).is_empty());
    }
}
