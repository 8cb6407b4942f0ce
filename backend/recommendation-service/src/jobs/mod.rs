pub mod train_collaborative;

pub use train_collaborative::{train, TrainingConfig, TrainingExample};
