use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Default width of the user/item embedding tables.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

/// Hidden widths of the scoring network. The input is the concatenation of
/// one user and one item embedding (2 * embedding_dim).
pub const HIDDEN_WIDTHS: [usize; 3] = [64, 32, 1];

/// One fully-connected layer, weights stored (out, in).
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl DenseLayer {
    pub fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        self.weights.dot(input) + &self.bias
    }
}

/// Serialized form of a trained model. Written by the offline trainer,
/// loaded read-only by the serving path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub embedding_dim: usize,
    pub user_embeddings: HashMap<Uuid, Vec<f32>>,
    pub item_embeddings: HashMap<Uuid, Vec<f32>>,
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSnapshot {
    /// Row-major, (out, in).
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

/// Two-tower interaction model: user and item embedding tables feeding a
/// small feed-forward network with a sigmoid output in [0, 1].
#[derive(Debug, Clone)]
pub struct TwoTowerModel {
    embedding_dim: usize,
    user_embeddings: HashMap<Uuid, Array1<f32>>,
    item_embeddings: HashMap<Uuid, Array1<f32>>,
    layers: Vec<DenseLayer>,
}

fn relu(x: Array1<f32>) -> Array1<f32> {
    x.mapv(|v| v.max(0.0))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl TwoTowerModel {
    pub fn new(
        embedding_dim: usize,
        user_embeddings: HashMap<Uuid, Array1<f32>>,
        item_embeddings: HashMap<Uuid, Array1<f32>>,
        layers: Vec<DenseLayer>,
    ) -> Self {
        Self {
            embedding_dim,
            user_embeddings,
            item_embeddings,
            layers,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn knows_user(&self, user_id: Uuid) -> bool {
        self.user_embeddings.contains_key(&user_id)
    }

    pub fn knows_item(&self, item_id: Uuid) -> bool {
        self.item_embeddings.contains_key(&item_id)
    }

    /// Items seen during training; the eligible pool for collaborative
    /// candidate generation.
    pub fn item_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.item_embeddings.keys()
    }

    pub fn user_embedding(&self, user_id: Uuid) -> Option<&Array1<f32>> {
        self.user_embeddings.get(&user_id)
    }

    pub fn item_embedding(&self, item_id: Uuid) -> Option<&Array1<f32>> {
        self.item_embeddings.get(&item_id)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    pub fn user_embedding_mut(&mut self, user_id: Uuid) -> Option<&mut Array1<f32>> {
        self.user_embeddings.get_mut(&user_id)
    }

    pub fn item_embedding_mut(&mut self, item_id: Uuid) -> Option<&mut Array1<f32>> {
        self.item_embeddings.get_mut(&item_id)
    }

    /// Forward pass over a concatenated (user, item) input. ReLU between
    /// layers, sigmoid on the scalar output.
    pub fn forward(&self, input: &Array1<f32>) -> f32 {
        let mut activation = input.clone();
        let last = self.layers.len() - 1;

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation);
            activation = if i < last { relu(z) } else { z };
        }

        sigmoid(activation[0])
    }

    /// Score one (user, item) pair; None when either side was never seen
    /// during training.
    pub fn score(&self, user_id: Uuid, item_id: Uuid) -> Option<f32> {
        let user = self.user_embeddings.get(&user_id)?;
        let item = self.item_embeddings.get(&item_id)?;

        let mut input = Vec::with_capacity(self.embedding_dim * 2);
        input.extend(user.iter().copied());
        input.extend(item.iter().copied());

        Some(self.forward(&Array1::from_vec(input)))
    }

    pub fn to_snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            embedding_dim: self.embedding_dim,
            user_embeddings: self
                .user_embeddings
                .iter()
                .map(|(id, v)| (*id, v.to_vec()))
                .collect(),
            item_embeddings: self
                .item_embeddings
                .iter()
                .map(|(id, v)| (*id, v.to_vec()))
                .collect(),
            layers: self
                .layers
                .iter()
                .map(|layer| LayerSnapshot {
                    weights: layer
                        .weights
                        .rows()
                        .into_iter()
                        .map(|row| row.to_vec())
                        .collect(),
                    bias: layer.bias.to_vec(),
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        if snapshot.layers.is_empty() {
            bail!("model snapshot has no layers");
        }

        let mut layers = Vec::with_capacity(snapshot.layers.len());
        for layer in &snapshot.layers {
            let rows = layer.weights.len();
            let cols = layer.weights.first().map(|r| r.len()).unwrap_or(0);
            if rows == 0 || cols == 0 || rows != layer.bias.len() {
                bail!("model snapshot layer has inconsistent shape");
            }

            let flat: Vec<f32> = layer.weights.iter().flatten().copied().collect();
            let weights = Array2::from_shape_vec((rows, cols), flat)
                .context("model snapshot weights are not rectangular")?;

            layers.push(DenseLayer {
                weights,
                bias: Array1::from_vec(layer.bias.clone()),
            });
        }

        let dim = snapshot.embedding_dim;
        let check = |table: &HashMap<Uuid, Vec<f32>>| table.values().all(|v| v.len() == dim);
        if !check(&snapshot.user_embeddings) || !check(&snapshot.item_embeddings) {
            bail!("model snapshot embedding tables disagree with embedding_dim");
        }

        Ok(Self {
            embedding_dim: dim,
            user_embeddings: snapshot
                .user_embeddings
                .into_iter()
                .map(|(id, v)| (id, Array1::from_vec(v)))
                .collect(),
            item_embeddings: snapshot
                .item_embeddings
                .into_iter()
                .map(|(id, v)| (id, Array1::from_vec(v)))
                .collect(),
            layers,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model snapshot at {}", path.display()))?;
        let snapshot: ModelSnapshot =
            serde_json::from_str(&json).context("failed to decode model snapshot")?;
        Self::from_snapshot(snapshot)
    }

    /// Write the snapshot to `path` atomically (temp file + rename) so the
    /// serving path never observes a partial write.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&self.to_snapshot())
            .context("failed to encode model snapshot")?;

        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model() -> TwoTowerModel {
        let user_id = Uuid::from_u128(1);
        let item_id = Uuid::from_u128(2);

        let mut users = HashMap::new();
        users.insert(user_id, Array1::from_vec(vec![0.5, -0.5]));
        let mut items = HashMap::new();
        items.insert(item_id, Array1::from_vec(vec![0.25, 0.75]));

        // 4 -> 3 -> 1
        let layers = vec![
            DenseLayer {
                weights: Array2::from_shape_vec(
                    (3, 4),
                    vec![0.1, 0.2, -0.1, 0.05, -0.2, 0.1, 0.3, 0.0, 0.0, 0.1, 0.1, 0.1],
                )
                .unwrap(),
                bias: Array1::from_vec(vec![0.0, 0.1, -0.1]),
            },
            DenseLayer {
                weights: Array2::from_shape_vec((1, 3), vec![0.5, -0.5, 0.25]).unwrap(),
                bias: Array1::from_vec(vec![0.0]),
            },
        ];

        TwoTowerModel::new(2, users, items, layers)
    }

    #[test]
    fn test_score_in_unit_interval() {
        let model = tiny_model();
        let score = model
            .score(Uuid::from_u128(1), Uuid::from_u128(2))
            .expect("both sides known");
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_unseen_pair_is_none() {
        let model = tiny_model();
        assert!(model.score(Uuid::from_u128(99), Uuid::from_u128(2)).is_none());
        assert!(model.score(Uuid::from_u128(1), Uuid::from_u128(99)).is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let model = tiny_model();
        let restored = TwoTowerModel::from_snapshot(model.to_snapshot()).unwrap();

        let before = model.score(Uuid::from_u128(1), Uuid::from_u128(2)).unwrap();
        let after = restored
            .score(Uuid::from_u128(1), Uuid::from_u128(2))
            .unwrap();
        assert!((before - after).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_snapshot_rejected() {
        let mut snapshot = tiny_model().to_snapshot();
        snapshot.layers[0].bias.pop();
        assert!(TwoTowerModel::from_snapshot(snapshot).is_err());
    }
}
