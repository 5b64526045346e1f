use crate::dataset::WindowConfig;
use crate::error::ForecastError;
use crate::model::Hyperparameters;
use crate::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "cryptocast";
const ENV_PREFIX: &str = "CRYPTOCAST";

/// Application configuration
///
/// Layered as: built-in defaults, then `cryptocast.toml` (or an explicit file),
/// then `CRYPTOCAST_<SECTION>__<KEY>` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub dataset: WindowConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub server: ServerConfig,
    pub log_filter: LogFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub interval: String,
    /// Optional request timeout. Unset means a hung upstream hangs the request.
    pub timeout_secs: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com/api/v3".to_string(),
            interval: "1m".to_string(),
            timeout_secs: None,
        }
    }
}

/// Architecture settings; the input size and window lengths come from the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub hidden_continuous_size: usize,
    pub attention_heads: usize,
    pub dropout: f64,
    pub quantiles: Vec<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            hidden_continuous_size: 64,
            attention_heads: 4,
            dropout: 0.3,
            quantiles: vec![0.02, 0.1, 0.25, 0.5, 0.75, 0.9, 0.98],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub reduce_on_plateau_patience: usize,
    pub train_fraction: f64,
    pub gradient_clip_val: Option<f64>,
    pub seed: u64,
    pub metrics_dir: PathBuf,
    pub artifact_path: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.0005,
            batch_size: 64,
            max_epochs: 50,
            reduce_on_plateau_patience: 5,
            train_fraction: 0.8,
            gradient_clip_val: Some(1.0),
            seed: 42,
            metrics_dir: PathBuf::from("logs/forecaster"),
            artifact_path: PathBuf::from("final_model.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub model_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            model_path: PathBuf::from("final_model.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFilter(pub String);

impl Default for LogFilter {
    fn default() -> Self {
        Self("cryptocast=info".to_string())
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// When `path` is `None`, `cryptocast.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would produce an unusable dataset or model
    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        self.hyperparameters().validate()?;

        let training = &self.training;
        if training.batch_size == 0 {
            return Err(ForecastError::InvalidConfig("batch_size must be > 0".into()));
        }
        if training.max_epochs == 0 {
            return Err(ForecastError::InvalidConfig("max_epochs must be > 0".into()));
        }
        if !(training.learning_rate > 0.0) {
            return Err(ForecastError::InvalidConfig(
                "learning_rate must be > 0".into(),
            ));
        }
        if !(training.train_fraction > 0.0 && training.train_fraction < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "train_fraction {} must be in (0, 1)",
                training.train_fraction
            )));
        }
        if let Some(clip) = training.gradient_clip_val {
            if !(clip > 0.0) {
                return Err(ForecastError::InvalidConfig(
                    "gradient_clip_val must be > 0 when set".into(),
                ));
            }
        }
        Ok(())
    }

    /// Full model hyperparameters derived from the model and dataset sections
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            input_size: self.dataset.feature_names().len(),
            encoder_length: self.dataset.encoder_length,
            prediction_length: self.dataset.prediction_length,
            hidden_size: self.model.hidden_size,
            hidden_continuous_size: self.model.hidden_continuous_size,
            attention_heads: self.model.attention_heads,
            dropout: self.model.dropout,
            quantiles: self.model.quantiles.clone(),
        }
    }
}
