//! Mini-batch training loop

use super::history::{EpochMetrics, TrainingHistory};
use crate::config::TrainingConfig;
use crate::dataset::TimeSeriesDataset;
use crate::error::ForecastError;
use crate::model::{Hyperparameters, QuantileLoss, QuantileNetwork};
use crate::Result;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

/// Factor applied to the learning rate when the monitored loss plateaus
const PLATEAU_FACTOR: f64 = 0.5;
const MIN_LEARNING_RATE: f64 = 1e-7;

pub struct Trainer {
    config: TrainingConfig,
    rng: StdRng,
    history: TrainingHistory,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            history: TrainingHistory::default(),
        }
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn into_history(self) -> TrainingHistory {
        self.history
    }

    /// Train `model` and return the weights of the best epoch
    ///
    /// Only `train` is shuffled. The learning rate is halved after
    /// `reduce_on_plateau_patience` epochs without improvement.
    pub fn fit<B: AutodiffBackend>(
        &mut self,
        model: QuantileNetwork<B>,
        hp: &Hyperparameters,
        train: &TimeSeriesDataset,
        validation: &TimeSeriesDataset,
        device: &B::Device,
    ) -> Result<QuantileNetwork<B>> {
        if train.is_empty() {
            return Err(ForecastError::DataInsufficient {
                symbol: "<train>".to_string(),
                required: 1,
                available: 0,
            });
        }
        if train.num_features() != hp.input_size || train.config.encoder_length != hp.encoder_length {
            return Err(ForecastError::InvalidConfig(format!(
                "dataset windows are {}x{}, model expects {}x{}",
                train.config.encoder_length,
                train.num_features(),
                hp.encoder_length,
                hp.input_size
            )));
        }

        let start = Instant::now();
        let loss = QuantileLoss::new(hp.quantiles.clone());
        let mut optimizer = AdamConfig::new()
            .with_grad_clipping(
                self.config
                    .gradient_clip_val
                    .map(|clip| GradientClippingConfig::Norm(clip as f32)),
            )
            .init::<B, QuantileNetwork<B>>();
        let mut learning_rate = self.config.learning_rate;
        let mut model = model;
        let mut best = model.clone();
        let mut stale_epochs = 0usize;

        tracing::info!(
            "Training on {} windows ({} validation), {} parameters",
            train.len(),
            validation.len(),
            model.num_params()
        );

        for epoch in 0..self.config.max_epochs {
            let (trained, train_loss) =
                self.train_epoch(model, hp, train, &loss, &mut optimizer, learning_rate, device);
            model = trained;

            let val_loss = if validation.is_empty() {
                None
            } else {
                Some(evaluate(&model.valid(), hp, validation, &loss, self.config.batch_size, device))
            };

            if !train_loss.is_finite() {
                tracing::warn!("Epoch {}: train loss is not finite, stopping", epoch + 1);
                break;
            }

            let improved = self.history.add_epoch(EpochMetrics {
                epoch,
                train_loss,
                val_loss,
                learning_rate,
            });

            tracing::info!(
                "Epoch {}/{}: train_loss={:.6}, val_loss={}, lr={:.2e}",
                epoch + 1,
                self.config.max_epochs,
                train_loss,
                val_loss.map_or_else(|| "-".to_string(), |v| format!("{:.6}", v)),
                learning_rate
            );

            if improved {
                best = model.clone();
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
                if stale_epochs >= self.config.reduce_on_plateau_patience {
                    learning_rate = (learning_rate * PLATEAU_FACTOR).max(MIN_LEARNING_RATE);
                    tracing::info!(
                        "Loss plateaued for {} epochs, learning rate -> {:.2e}",
                        stale_epochs,
                        learning_rate
                    );
                    stale_epochs = 0;
                }
            }
        }

        self.history.training_time = start.elapsed().as_secs_f64();
        self.history.log_summary();
        Ok(best)
    }

    /// One pass over the shuffled training windows; returns the mean sample loss
    #[allow(clippy::too_many_arguments)]
    fn train_epoch<B: AutodiffBackend, O: Optimizer<QuantileNetwork<B>, B>>(
        &mut self,
        mut model: QuantileNetwork<B>,
        hp: &Hyperparameters,
        data: &TimeSeriesDataset,
        loss: &QuantileLoss,
        optimizer: &mut O,
        learning_rate: f64,
        device: &B::Device,
    ) -> (QuantileNetwork<B>, f64) {
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total = 0.0;
        for batch in order.chunks(self.config.batch_size.max(1)) {
            let (encoder, target, mask) = batch_tensors::<B>(data, batch, hp, device);
            let value = loss.forward(model.forward(encoder), target, mask);
            total += value.clone().into_scalar().elem::<f64>() * batch.len() as f64;

            let grads = GradientsParams::from_grads(value.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);
        }

        (model, total / data.len() as f64)
    }
}

/// Mean quantile loss over `data` in batches of `batch_size`, without dropout
pub fn evaluate<B: Backend>(
    model: &QuantileNetwork<B>,
    hp: &Hyperparameters,
    data: &TimeSeriesDataset,
    loss: &QuantileLoss,
    batch_size: usize,
    device: &B::Device,
) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut total = 0.0;
    for batch in indices.chunks(batch_size.max(1)) {
        let (encoder, target, mask) = batch_tensors::<B>(data, batch, hp, device);
        let value = loss.forward(model.forward(encoder), target, mask);
        total += value.into_scalar().elem::<f64>() * batch.len() as f64;
    }
    total / data.len() as f64
}

/// Stack the selected windows into (encoder, target, mask) tensors
///
/// Targets shorter than `prediction_length` are zero-padded and masked out.
fn batch_tensors<B: Backend>(
    data: &TimeSeriesDataset,
    indices: &[usize],
    hp: &Hyperparameters,
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 2>) {
    let steps = hp.prediction_length;
    let mut encoder = Vec::with_capacity(indices.len() * hp.encoder_length * hp.input_size);
    let mut target = vec![0.0f32; indices.len() * steps];
    let mut mask = vec![0.0f32; indices.len() * steps];

    for (row, &i) in indices.iter().enumerate() {
        let window = &data.windows[i];
        encoder.extend(window.encoder.iter().map(|v| *v as f32));
        for (t, value) in window.target.iter().take(steps).enumerate() {
            target[row * steps + t] = *value as f32;
            mask[row * steps + t] = 1.0;
        }
    }

    (
        Tensor::from_data(
            TensorData::new(encoder, [indices.len(), hp.encoder_length, hp.input_size]),
            device,
        ),
        Tensor::from_data(TensorData::new(target, [indices.len(), steps]), device),
        Tensor::from_data(TensorData::new(mask, [indices.len(), steps]), device),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::WindowConfig;
    use crate::model::{InferenceBackend, TrainingBackend};
    use crate::models::PanelRow;
    use crate::panel::Panel;
    use burn::backend::ndarray::NdArrayDevice;
    use chrono::{Duration, TimeZone, Utc};

    fn dataset() -> TimeSeriesDataset {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = (0..120)
            .map(|i| {
                let price = 100.0 + 0.2 * i as f64 + (i as f64 * 0.3).sin();
                PanelRow {
                    timestamp: origin + Duration::minutes(i),
                    symbol: "ETHUSDT".to_string(),
                    price,
                    volume: 5.0 + (i % 4) as f64,
                    range: 0.5,
                    time_idx: i,
                    target: price,
                }
            })
            .collect();
        let config = WindowConfig {
            encoder_length: 16,
            prediction_length: 4,
            ..WindowConfig::default()
        };
        TimeSeriesDataset::from_panel(&Panel::from_rows(rows), &config).unwrap()
    }

    fn hyperparameters(data: &TimeSeriesDataset, dropout: f64) -> Hyperparameters {
        Hyperparameters {
            input_size: data.num_features(),
            encoder_length: data.config.encoder_length,
            prediction_length: data.config.prediction_length,
            hidden_size: 8,
            hidden_continuous_size: 4,
            attention_heads: 2,
            dropout,
            quantiles: vec![0.1, 0.5, 0.9],
        }
    }

    fn network(hp: &Hyperparameters) -> QuantileNetwork<TrainingBackend> {
        QuantileNetwork::new(hp, &mut StdRng::seed_from_u64(0), &NdArrayDevice::default())
    }

    fn config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            learning_rate: 0.01,
            batch_size: 16,
            max_epochs: epochs,
            reduce_on_plateau_patience: 2,
            ..TrainingConfig::default()
        }
    }

    fn score(model: &QuantileNetwork<InferenceBackend>, hp: &Hyperparameters, data: &TimeSeriesDataset) -> f64 {
        let loss = QuantileLoss::new(hp.quantiles.clone());
        evaluate(model, hp, data, &loss, 16, &NdArrayDevice::default())
    }

    #[test]
    fn test_loss_decreases() {
        let data = dataset();
        let (train, validation) = data.split_chronological(0.8);
        let hp = hyperparameters(&data, 0.1);
        let model = network(&hp);
        let before = score(&model.valid(), &hp, &train);

        let mut trainer = Trainer::new(config(15));
        let model = trainer
            .fit(model, &hp, &train, &validation, &NdArrayDevice::default())
            .unwrap();
        assert_eq!(trainer.history().len(), 15);

        let after = score(&model.valid(), &hp, &train);
        assert!(after < before, "loss {} -> {}", before, after);
    }

    #[test]
    fn test_restores_best_weights() {
        let data = dataset();
        let (train, validation) = data.split_chronological(0.8);
        let hp = hyperparameters(&data, 0.1);

        let mut trainer = Trainer::new(config(8));
        let model = trainer
            .fit(network(&hp), &hp, &train, &validation, &NdArrayDevice::default())
            .unwrap();
        let best = trainer.history().best_loss.unwrap();
        let restored = score(&model.valid(), &hp, &validation);
        assert!((restored - best).abs() < 1e-6);
    }

    #[test]
    fn test_same_seed_same_result() {
        let data = dataset();
        let (train, validation) = data.split_chronological(0.8);
        // Dropout draws from the backend RNG, which is process-wide
        let hp = hyperparameters(&data, 0.0);
        let device = NdArrayDevice::default();

        let a = Trainer::new(config(3))
            .fit(network(&hp), &hp, &train, &validation, &device)
            .unwrap();
        let b = Trainer::new(config(3))
            .fit(network(&hp), &hp, &train, &validation, &device)
            .unwrap();
        assert_eq!(score(&a.valid(), &hp, &validation), score(&b.valid(), &hp, &validation));
    }

    #[test]
    fn test_empty_training_set_fails() {
        let data = dataset();
        let empty = TimeSeriesDataset {
            config: data.config.clone(),
            windows: vec![],
        };
        let hp = hyperparameters(&data, 0.1);
        let result = Trainer::new(config(1)).fit(network(&hp), &hp, &empty, &data, &NdArrayDevice::default());
        assert!(matches!(result, Err(ForecastError::DataInsufficient { .. })));
    }

    #[test]
    fn test_plateau_halves_learning_rate() {
        let data = dataset();
        let (train, _) = data.split_chronological(0.8);
        let hp = hyperparameters(&data, 0.1);
        // A zero learning rate cannot improve after the first epoch
        let mut cfg = config(3);
        cfg.learning_rate = 0.0;
        cfg.reduce_on_plateau_patience = 1;

        let mut trainer = Trainer::new(cfg);
        trainer
            .fit(network(&hp), &hp, &train, &train, &NdArrayDevice::default())
            .unwrap();
        let rates: Vec<f64> = trainer.history().epochs.iter().map(|e| e.learning_rate).collect();
        assert_eq!(rates, vec![0.0, 0.0, MIN_LEARNING_RATE]);
    }

    #[test]
    fn test_short_horizon_targets_are_masked() {
        let data = dataset();
        let mut hp = hyperparameters(&data, 0.0);
        hp.prediction_length = 6;
        let (_, target, mask) = batch_tensors::<InferenceBackend>(&data, &[0, 1], &hp, &NdArrayDevice::default());

        let mask = mask.into_data().to_vec::<f32>().unwrap();
        assert_eq!(mask, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        let target = target.into_data().to_vec::<f32>().unwrap();
        assert_eq!(target[4], 0.0);
        assert_eq!(target[5], 0.0);
    }
}
