//! Windowed training/inference samples built from a [`Panel`].
//!
//! Every window is normalized with its own target scale so that symbols trading at very
//! different price levels share one model. The same encoding is used at training and at
//! inference time; the window configuration travels inside the model artifact.

mod scaling;

use crate::error::ForecastError;
use crate::models::{PanelRow, Token};
use crate::panel::Panel;
use crate::Result;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

pub use scaling::TargetScale;

/// Shape of the encoder/decoder windows and the optional auxiliary features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub encoder_length: usize,
    pub prediction_length: usize,
    pub add_relative_time_idx: bool,
    pub add_target_scales: bool,
    pub add_encoder_length: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            encoder_length: 120,
            prediction_length: 20,
            add_relative_time_idx: true,
            add_target_scales: true,
            add_encoder_length: true,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.encoder_length == 0 {
            return Err(ForecastError::InvalidConfig(
                "encoder_length must be > 0".into(),
            ));
        }
        if self.prediction_length == 0 {
            return Err(ForecastError::InvalidConfig(
                "prediction_length must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Encoder feature columns, in order. Column 0 is always the normalized target.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec!["target", "time_idx", "volume", "range"];
        if self.add_relative_time_idx {
            names.push("relative_time_idx");
        }
        if self.add_target_scales {
            names.push("target_scale");
        }
        if self.add_encoder_length {
            names.push("encoder_length");
        }
        names.into_iter().map(String::from).collect()
    }

    /// Forecast horizon for a symbol, capped at the configured prediction length
    pub fn horizon_for(&self, symbol: &str) -> usize {
        Token::from_symbol(symbol)
            .map(|t| t.horizon_minutes())
            .unwrap_or(self.prediction_length)
            .min(self.prediction_length)
    }

    /// Encode `rows` (exactly one encoder window) into a feature matrix
    fn encode(&self, rows: &[PanelRow], scale: &TargetScale) -> Array2<f64> {
        let length = rows.len();
        let num_features = self.feature_names().len();
        let mut features = Array2::zeros((length, num_features));

        let log_volumes: Vec<f64> = rows.iter().map(|r| r.volume.max(0.0).ln_1p()).collect();
        let volume_scale = TargetScale::fit(&log_volumes);
        let first_idx = rows.first().map(|r| r.time_idx).unwrap_or(0);
        let max_length = self.encoder_length as f64;

        for (t, row) in rows.iter().enumerate() {
            let mut col = 0;
            let mut push = |value: f64| {
                features[[t, col]] = value;
                col += 1;
            };

            push(scale.transform(row.target));
            push((row.time_idx - first_idx) as f64 / max_length);
            push(volume_scale.transform(log_volumes[t]));
            push(row.range / scale.scale);
            if self.add_relative_time_idx {
                push((t as f64 - length as f64) / max_length);
            }
            if self.add_target_scales {
                push(scale.relative_scale());
            }
            if self.add_encoder_length {
                push(length as f64 / max_length);
            }
        }

        features
    }
}

/// One supervised sample: encoder history plus the normalized future target
#[derive(Debug, Clone)]
pub struct Window {
    pub symbol: String,
    /// Shape: (encoder_length, num_features)
    pub encoder: Array2<f64>,
    /// Normalized future prices, length = the symbol's horizon
    pub target: Array1<f64>,
    pub scale: TargetScale,
    pub encoder_start_idx: i64,
    pub decoder_start_idx: i64,
    pub decoder_end_idx: i64,
}

/// Encoder window for a live prediction
#[derive(Debug, Clone)]
pub struct InferenceWindow {
    pub symbol: String,
    pub encoder: Array2<f64>,
    pub scale: TargetScale,
    pub current_price: f64,
    pub current_time: DateTime<Utc>,
}

/// All windows of a panel, grouped by symbol
#[derive(Debug, Clone)]
pub struct TimeSeriesDataset {
    pub config: WindowConfig,
    pub windows: Vec<Window>,
}

impl TimeSeriesDataset {
    /// Slide a window over every symbol group of the panel
    ///
    /// Only gap-free `time_idx` runs produce windows. Fails with `DataInsufficient`
    /// when no symbol has enough history for a single window.
    pub fn from_panel(panel: &Panel, config: &WindowConfig) -> Result<Self> {
        config.validate()?;

        let mut windows = Vec::new();
        let mut longest = (String::new(), 0usize);

        for (symbol, rows) in panel.groups() {
            let horizon = config.horizon_for(symbol);
            let span = config.encoder_length + horizon;
            if rows.len() > longest.1 {
                longest = (symbol.to_string(), rows.len());
            }

            let before = windows.len();
            for start in 0..rows.len().saturating_sub(span - 1) {
                let slice = &rows[start..start + span];
                if !is_contiguous(slice) {
                    continue;
                }
                let (encoder_rows, decoder_rows) = slice.split_at(config.encoder_length);
                let prices: Vec<f64> = encoder_rows.iter().map(|r| r.target).collect();
                let scale = TargetScale::fit(&prices);

                windows.push(Window {
                    symbol: symbol.to_string(),
                    encoder: config.encode(encoder_rows, &scale),
                    target: decoder_rows.iter().map(|r| scale.transform(r.target)).collect(),
                    scale,
                    encoder_start_idx: encoder_rows[0].time_idx,
                    decoder_start_idx: decoder_rows[0].time_idx,
                    decoder_end_idx: decoder_rows[decoder_rows.len() - 1].time_idx,
                });
            }

            tracing::debug!(
                "{}: {} rows -> {} windows (horizon {})",
                symbol,
                rows.len(),
                windows.len() - before,
                horizon
            );
        }

        if windows.is_empty() {
            return Err(ForecastError::DataInsufficient {
                symbol: if longest.0.is_empty() {
                    "<all>".to_string()
                } else {
                    longest.0
                },
                required: config.encoder_length + config.prediction_length.min(min_horizon()),
                available: longest.1,
            });
        }

        Ok(Self {
            config: config.clone(),
            windows,
        })
    }

    /// Most recent `encoder_length` rows of `symbol`, encoded for inference
    pub fn latest_window(
        panel: &Panel,
        symbol: &str,
        config: &WindowConfig,
    ) -> Result<InferenceWindow> {
        let rows = panel.group(symbol);
        if rows.len() < config.encoder_length {
            return Err(ForecastError::DataInsufficient {
                symbol: symbol.to_string(),
                required: config.encoder_length,
                available: rows.len(),
            });
        }

        let encoder_rows = &rows[rows.len() - config.encoder_length..];
        if !is_contiguous(encoder_rows) {
            tracing::warn!("{}: encoder window has gaps in time_idx", symbol);
        }

        let prices: Vec<f64> = encoder_rows.iter().map(|r| r.target).collect();
        let scale = TargetScale::fit(&prices);
        let last = &encoder_rows[encoder_rows.len() - 1];

        Ok(InferenceWindow {
            symbol: symbol.to_string(),
            encoder: config.encode(encoder_rows, &scale),
            scale,
            current_price: last.price,
            current_time: last.timestamp,
        })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.config.feature_names().len()
    }

    /// Chronological split: training windows end at or before `cutoff`,
    /// validation windows start predicting after it
    pub fn split_by_time_idx(&self, cutoff: i64) -> (TimeSeriesDataset, TimeSeriesDataset) {
        let subset = |keep: &dyn Fn(&Window) -> bool| TimeSeriesDataset {
            config: self.config.clone(),
            windows: self.windows.iter().filter(|w| keep(w)).cloned().collect(),
        };

        let train = subset(&|w| w.decoder_end_idx <= cutoff);
        let validation = subset(&|w| w.decoder_start_idx > cutoff);
        (train, validation)
    }

    /// Split at `fraction` of the covered `time_idx` span
    pub fn split_chronological(&self, fraction: f64) -> (TimeSeriesDataset, TimeSeriesDataset) {
        let min = self.windows.iter().map(|w| w.encoder_start_idx).min().unwrap_or(0);
        let max = self.windows.iter().map(|w| w.decoder_end_idx).max().unwrap_or(0);
        let cutoff = min + ((max - min) as f64 * fraction).floor() as i64;
        self.split_by_time_idx(cutoff)
    }
}

fn min_horizon() -> usize {
    Token::ALL
        .iter()
        .map(|t| t.horizon_minutes())
        .min()
        .unwrap_or(1)
}

fn is_contiguous(rows: &[PanelRow]) -> bool {
    rows.windows(2).all(|pair| pair[1].time_idx == pair[0].time_idx + 1)
}
