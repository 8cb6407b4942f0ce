//! Offline training job for the collaborative scorer.
//!
//! Positive interactions are implicit-feedback labels; for every positive
//! example a fixed number of items the user never touched are sampled as
//! negatives. The model (embedding tables + feed-forward net) is fit with
//! plain SGD on binary cross-entropy and written out as an atomic
//! snapshot. This never runs on the request path.

use crate::services::collaborative::{
    DenseLayer, TwoTowerModel, DEFAULT_EMBEDDING_DIM, HIDDEN_WIDTHS,
};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub embedding_dim: usize,
    /// Negatives sampled per positive example.
    pub negative_ratio: usize,
    pub epochs: usize,
    pub learning_rate: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            negative_ratio: 4,
            epochs: 10,
            learning_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingExample {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub label: f32,
}

fn init_vector<R: Rng>(rng: &mut R, dim: usize, scale: f32) -> Array1<f32> {
    Array1::from_shape_fn(dim, |_| (rng.gen::<f32>() - 0.5) * 2.0 * scale)
}

fn init_layer<R: Rng>(rng: &mut R, out: usize, input: usize) -> DenseLayer {
    let scale = (2.0 / input as f32).sqrt();
    DenseLayer {
        weights: Array2::from_shape_fn((out, input), |_| (rng.gen::<f32>() - 0.5) * 2.0 * scale),
        bias: Array1::zeros(out),
    }
}

/// Expand positive (user, item) pairs into labeled examples with sampled
/// negatives drawn from items the user has not interacted with.
pub fn build_examples<R: Rng>(
    positives: &[(Uuid, Uuid)],
    config: &TrainingConfig,
    rng: &mut R,
) -> Vec<TrainingExample> {
    let item_pool: Vec<Uuid> = {
        let unique: HashSet<Uuid> = positives.iter().map(|(_, item)| *item).collect();
        unique.into_iter().collect()
    };

    let mut seen_by_user: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for (user, item) in positives {
        seen_by_user.entry(*user).or_default().insert(*item);
    }

    let mut examples = Vec::with_capacity(positives.len() * (1 + config.negative_ratio));

    for (user, item) in positives {
        examples.push(TrainingExample {
            user_id: *user,
            item_id: *item,
            label: 1.0,
        });

        let seen = &seen_by_user[user];
        if seen.len() >= item_pool.len() {
            // The user touched everything; nothing left to sample.
            continue;
        }

        let mut sampled = 0;
        let mut attempts = 0;
        while sampled < config.negative_ratio && attempts < config.negative_ratio * 20 {
            attempts += 1;
            let candidate = item_pool[rng.gen_range(0..item_pool.len())];
            if seen.contains(&candidate) {
                continue;
            }
            examples.push(TrainingExample {
                user_id: *user,
                item_id: candidate,
                label: 0.0,
            });
            sampled += 1;
        }
    }

    examples
}

fn forward_cached(
    model: &TwoTowerModel,
    input: &Array1<f32>,
) -> (Vec<Array1<f32>>, Vec<Array1<f32>>, f32) {
    // Pre-activations and activations per layer; sigmoid applied to the
    // scalar output outside the layer loop.
    let mut zs = Vec::with_capacity(model.layers().len());
    let mut activations = Vec::with_capacity(model.layers().len());
    let last = model.layers().len() - 1;

    let mut current = input.clone();
    for (i, layer) in model.layers().iter().enumerate() {
        let z = layer.forward(&current);
        let a = if i < last {
            z.mapv(|v| v.max(0.0))
        } else {
            z.clone()
        };
        zs.push(z);
        current = a.clone();
        activations.push(a);
    }

    let logit = activations[last][0];
    let prediction = 1.0 / (1.0 + (-logit).exp());
    (zs, activations, prediction)
}

/// One SGD step on one example. Returns the BCE loss before the update.
fn sgd_step(model: &mut TwoTowerModel, example: &TrainingExample, lr: f32) -> Option<f32> {
    let user = model.user_embedding(example.user_id)?.clone();
    let item = model.item_embedding(example.item_id)?.clone();
    let dim = model.embedding_dim();

    let mut input = Vec::with_capacity(dim * 2);
    input.extend(user.iter().copied());
    input.extend(item.iter().copied());
    let input = Array1::from_vec(input);

    let (zs, activations, prediction) = forward_cached(model, &input);

    let eps = 1e-7_f32;
    let p = prediction.clamp(eps, 1.0 - eps);
    let loss = -(example.label * p.ln() + (1.0 - example.label) * (1.0 - p).ln());

    // Output delta for sigmoid + BCE.
    let mut delta = Array1::from_vec(vec![prediction - example.label]);

    let layer_count = model.layers().len();
    let mut weight_grads: Vec<Array2<f32>> = Vec::with_capacity(layer_count);
    let mut bias_grads: Vec<Array1<f32>> = Vec::with_capacity(layer_count);
    let mut input_grad: Array1<f32> = Array1::zeros(0);

    for i in (0..layer_count).rev() {
        let layer_input = if i == 0 { &input } else { &activations[i - 1] };

        let grad_w = delta
            .clone()
            .insert_axis(Axis(1))
            .dot(&layer_input.clone().insert_axis(Axis(0)));
        weight_grads.push(grad_w);
        bias_grads.push(delta.clone());

        let upstream = model.layers()[i].weights.t().dot(&delta);
        if i == 0 {
            input_grad = upstream;
        } else {
            let mask = zs[i - 1].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            delta = upstream * &mask;
        }
    }

    weight_grads.reverse();
    bias_grads.reverse();

    for (i, layer) in model.layers_mut().iter_mut().enumerate() {
        layer.weights.scaled_add(-lr, &weight_grads[i]);
        layer.bias.scaled_add(-lr, &bias_grads[i]);
    }

    let user_grad = input_grad.slice(ndarray::s![..dim]).to_owned();
    let item_grad = input_grad.slice(ndarray::s![dim..]).to_owned();
    if let Some(embedding) = model.user_embedding_mut(example.user_id) {
        embedding.scaled_add(-lr, &user_grad);
    }
    if let Some(embedding) = model.item_embedding_mut(example.item_id) {
        embedding.scaled_add(-lr, &item_grad);
    }

    Some(loss)
}

/// Fit a model on positive (user, item) pairs.
pub fn train<R: Rng>(
    positives: &[(Uuid, Uuid)],
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<TwoTowerModel> {
    if positives.is_empty() {
        bail!("no positive interactions to train on");
    }

    let dim = config.embedding_dim;
    let scale = 1.0 / (dim as f32).sqrt();

    let mut user_embeddings = HashMap::new();
    let mut item_embeddings = HashMap::new();
    for (user, item) in positives {
        user_embeddings
            .entry(*user)
            .or_insert_with(|| init_vector(rng, dim, scale));
        item_embeddings
            .entry(*item)
            .or_insert_with(|| init_vector(rng, dim, scale));
    }

    let mut widths = Vec::with_capacity(HIDDEN_WIDTHS.len() + 1);
    widths.push(dim * 2);
    widths.extend(HIDDEN_WIDTHS);
    let layers = widths
        .windows(2)
        .map(|w| init_layer(rng, w[1], w[0]))
        .collect();

    let mut model = TwoTowerModel::new(dim, user_embeddings, item_embeddings, layers);

    let mut examples = build_examples(positives, config, rng);

    for epoch in 0..config.epochs {
        examples.shuffle(rng);

        let mut loss_total = 0.0_f64;
        let mut steps = 0usize;
        for example in &examples {
            if let Some(loss) = sgd_step(&mut model, example, config.learning_rate) {
                loss_total += loss as f64;
                steps += 1;
            }
        }

        info!(
            epoch = epoch + 1,
            examples = steps,
            avg_loss = loss_total / steps.max(1) as f64,
            "Training epoch complete"
        );
    }

    Ok(model)
}

/// Full batch job: read positive interactions, fit, snapshot atomically.
pub async fn run(pool: &PgPool, config: TrainingConfig, snapshot_path: &Path) -> Result<()> {
    let positives: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT user_id, resource_id
        FROM user_interactions
        WHERE is_positive = TRUE
        "#,
    )
    .fetch_all(pool)
    .await?;

    if positives.is_empty() {
        warn!("No positive interactions found, leaving existing snapshot untouched");
        return Ok(());
    }

    info!(positives = positives.len(), "Starting collaborative training");

    let mut rng = rand::thread_rng();
    let model = train(&positives, &config, &mut rng)?;
    model.save(snapshot_path)?;

    info!(path = %snapshot_path.display(), "Wrote collaborative model snapshot");
    Ok(())
}
