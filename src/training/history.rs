use crate::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// One row of the per-epoch metrics log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub learning_rate: f64,
}

/// Loss curve of a training run and the best epoch seen so far
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    /// Wall-clock seconds
    pub training_time: f64,
}

impl TrainingHistory {
    /// Record an epoch; returns true when it improves on the best monitored loss
    ///
    /// The monitored loss is the validation loss when present, the train loss otherwise.
    pub fn add_epoch(&mut self, metrics: EpochMetrics) -> bool {
        let monitored = metrics.val_loss.unwrap_or(metrics.train_loss);
        let improved = monitored.is_finite() && self.best_loss.map_or(true, |best| monitored < best);
        if improved {
            self.best_loss = Some(monitored);
            self.best_epoch = Some(metrics.epoch);
        }
        self.epochs.push(metrics);
        improved
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Write `metrics.csv` under `dir`, creating it if needed
    pub fn write_csv(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join("metrics.csv");
        let mut writer = csv::Writer::from_writer(File::create(&path)?);
        for row in &self.epochs {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    pub fn log_summary(&self) {
        let (first, last) = match (self.epochs.first(), self.epochs.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return,
        };
        tracing::info!(
            "Training finished: {} epochs in {:.1}s, train loss {:.6} -> {:.6}, best epoch {:?} (loss {:?})",
            self.epochs.len(),
            self.training_time,
            first.train_loss,
            last.train_loss,
            self.best_epoch,
            self.best_loss
        );
    }
}
