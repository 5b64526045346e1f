//! Model artifact persisted by training and loaded once by the service

use super::{Hyperparameters, QuantileForecaster};
use crate::dataset::WindowConfig;
use crate::error::ForecastError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Bumped whenever the layout of [`ModelArtifact`] or the network module changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 2;

/// What the training run looked like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub trained_at: DateTime<Utc>,
    pub symbols: Vec<String>,
    pub train_windows: usize,
    pub validation_windows: usize,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_validation_loss: Option<f64>,
    pub final_train_loss: Option<f64>,
    pub final_learning_rate: f64,
}

/// Weights plus everything needed to rebuild identical inputs for them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub hyperparameters: Hyperparameters,
    pub window: WindowConfig,
    pub feature_names: Vec<String>,
    /// burn module record, `BinBytesRecorder` with full precision
    pub weights: Vec<u8>,
    pub summary: TrainingSummary,
}

impl ModelArtifact {
    pub fn new(model: &QuantileForecaster, window: &WindowConfig, summary: TrainingSummary) -> Result<Self> {
        Ok(Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            hyperparameters: model.hyperparameters().clone(),
            window: window.clone(),
            feature_names: window.feature_names(),
            weights: model.to_bytes()?,
            summary,
        })
    }

    /// Write the artifact as JSON, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;

        tracing::info!(
            "Saved model artifact to {} ({} bytes of weights)",
            path.display(),
            self.weights.len()
        );
        Ok(())
    }

    /// Read and validate an artifact
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let artifact: ModelArtifact = serde_json::from_str(&json)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check that the stored pieces agree with each other and the weights decode
    pub fn validate(&self) -> Result<()> {
        self.validate_layout()?;
        QuantileForecaster::from_bytes(self.hyperparameters.clone(), self.weights.clone())?;
        Ok(())
    }

    fn validate_layout(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ForecastError::Artifact(format!(
                "unsupported format version {} (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }

        let hp = &self.hyperparameters;
        hp.validate()
            .map_err(|e| ForecastError::Artifact(e.to_string()))?;

        if self.window.feature_names() != self.feature_names {
            return Err(ForecastError::Artifact(format!(
                "window produces features {:?}, weights were trained on {:?}",
                self.window.feature_names(),
                self.feature_names
            )));
        }
        if hp.input_size != self.feature_names.len()
            || hp.encoder_length != self.window.encoder_length
            || hp.prediction_length != self.window.prediction_length
        {
            return Err(ForecastError::Artifact(
                "hyperparameters disagree with the window configuration".into(),
            ));
        }
        Ok(())
    }

    /// Rebuild the network from the stored weights
    pub fn into_model(self) -> Result<(QuantileForecaster, WindowConfig)> {
        self.validate_layout()?;
        let model = QuantileForecaster::from_bytes(self.hyperparameters, self.weights)?;
        Ok((model, self.window))
    }
}
