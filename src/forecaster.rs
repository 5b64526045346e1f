//! Loaded model plus the window configuration it was trained with

use crate::dataset::{TimeSeriesDataset, WindowConfig};
use crate::error::ForecastError;
use crate::model::{ModelArtifact, QuantileForecaster};
use crate::models::Token;
use crate::panel::Panel;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// One forecast for a token, in price units
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub token: Token,
    pub current_price: f64,
    pub current_time: DateTime<Utc>,
    /// Median forecast `horizon_minutes` ahead, rounded to 2 decimals
    pub predicted_price: f64,
    pub horizon_minutes: usize,
    /// `(quantile, price)` pairs at the horizon step, monotone in price
    pub quantiles: Vec<(f64, f64)>,
}

/// Read-only inference handle shared by all requests
#[derive(Debug, Clone)]
pub struct Forecaster {
    model: QuantileForecaster,
    window: WindowConfig,
}

impl Forecaster {
    pub fn new(model: QuantileForecaster, window: WindowConfig) -> Result<Self> {
        let hp = model.hyperparameters();
        if hp.input_size != window.feature_names().len()
            || hp.encoder_length != window.encoder_length
            || hp.prediction_length != window.prediction_length
        {
            return Err(ForecastError::Artifact(
                "model does not match the window configuration".into(),
            ));
        }
        Ok(Self { model, window })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let (model, window) = artifact.into_model()?;
        Self::new(model, window)
    }

    /// Load the artifact written by training
    pub fn load(path: &Path) -> Result<Self> {
        let forecaster = Self::from_artifact(ModelArtifact::load(path)?)?;
        tracing::info!(
            "Loaded model from {} (encoder {} steps, {} features)",
            path.display(),
            forecaster.window.encoder_length,
            forecaster.window.feature_names().len()
        );
        Ok(forecaster)
    }

    /// Candles needed per request
    pub fn encoder_length(&self) -> usize {
        self.window.encoder_length
    }

    pub fn window_config(&self) -> &WindowConfig {
        &self.window
    }

    pub fn model(&self) -> &QuantileForecaster {
        &self.model
    }

    /// Forecast `token` from the most recent rows of its panel group
    pub fn predict(&self, panel: &Panel, token: Token) -> Result<Prediction> {
        let symbol = token.symbol();
        let window = TimeSeriesDataset::latest_window(panel, symbol, &self.window)?;
        let output = self.model.predict(&window.encoder)?;

        let horizon = self.window.horizon_for(symbol);
        let step = output.row(horizon - 1);
        let mut prices: Vec<f64> = step.iter().map(|v| window.scale.inverse(*v)).collect();
        prices.sort_by(f64::total_cmp);

        let hp = self.model.hyperparameters();
        let median = prices[hp.median_index()];
        if !median.is_finite() {
            return Err(ForecastError::Artifact(format!(
                "model produced a non-finite forecast for {}",
                symbol
            )));
        }

        Ok(Prediction {
            token,
            current_price: window.current_price,
            current_time: window.current_time,
            predicted_price: round_cents(median),
            horizon_minutes: horizon,
            quantiles: hp.quantiles.iter().copied().zip(prices).collect(),
        })
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
