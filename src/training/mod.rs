//! Training driver: panel -> windows -> fitted model -> artifact

mod history;
mod trainer;

pub use history::{EpochMetrics, TrainingHistory};
pub use trainer::{evaluate, Trainer};

use crate::config::AppConfig;
use crate::dataset::TimeSeriesDataset;
use crate::error::ForecastError;
use crate::model::{ModelArtifact, QuantileForecaster, QuantileNetwork, TrainingBackend, TrainingSummary};
use crate::panel::Panel;
use crate::Result;
use burn::backend::ndarray::NdArrayDevice;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Run a complete training job on `panel`
///
/// Windows are split chronologically at `train_fraction` of the covered time range.
/// Per-epoch metrics land in `training.metrics_dir`; the returned artifact is not
/// written anywhere yet.
pub fn train_on_panel(panel: &Panel, config: &AppConfig) -> Result<ModelArtifact> {
    config.validate()?;

    let dataset = TimeSeriesDataset::from_panel(panel, &config.dataset)?;
    let (train, validation) = dataset.split_chronological(config.training.train_fraction);
    if train.is_empty() {
        return Err(ForecastError::DataInsufficient {
            symbol: panel.symbols().join(","),
            required: config.dataset.encoder_length + config.dataset.prediction_length,
            available: panel.len(),
        });
    }
    tracing::info!(
        "Dataset: {} windows from {} rows ({} train / {} validation)",
        dataset.len(),
        panel.len(),
        train.len(),
        validation.len()
    );

    let hp = config.hyperparameters();
    let device = NdArrayDevice::default();
    TrainingBackend::seed(config.training.seed);
    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let network = QuantileNetwork::<TrainingBackend>::new(&hp, &mut rng, &device);

    let mut trainer = Trainer::new(config.training.clone());
    let network = trainer.fit(network, &hp, &train, &validation, &device)?;
    let history = trainer.into_history();
    let model = QuantileForecaster::from_network(hp, network.valid())?;

    let metrics_path = history.write_csv(&config.training.metrics_dir)?;
    tracing::info!("Wrote epoch metrics to {}", metrics_path.display());

    let summary = TrainingSummary {
        trained_at: Utc::now(),
        symbols: panel.symbols().into_iter().map(String::from).collect(),
        train_windows: train.len(),
        validation_windows: validation.len(),
        epochs_run: history.len(),
        best_epoch: history.best_epoch,
        best_validation_loss: history.best_loss,
        final_train_loss: history.last().map(|e| e.train_loss),
        final_learning_rate: history
            .last()
            .map_or(config.training.learning_rate, |e| e.learning_rate),
    };

    ModelArtifact::new(&model, &config.dataset, summary)
}
