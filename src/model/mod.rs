//! Quantile forecasting network (burn), its loss and on-disk artifact

pub mod artifact;
mod hyperparameters;
mod loss;
mod network;

pub use artifact::{ModelArtifact, TrainingSummary, ARTIFACT_FORMAT_VERSION};
pub use hyperparameters::Hyperparameters;
pub use loss::QuantileLoss;
pub use network::{InferenceBackend, QuantileForecaster, QuantileNetwork, TrainingBackend};
