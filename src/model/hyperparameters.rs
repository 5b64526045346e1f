use crate::error::ForecastError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Architecture hyperparameters
///
/// Stored verbatim in the model artifact; weights are only usable with the exact
/// hyperparameters they were trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Encoder features per time step
    pub input_size: usize,

    /// Encoder history length (time steps)
    pub encoder_length: usize,

    /// Forecast steps produced per call
    pub prediction_length: usize,

    /// Width of the per-step embedding
    pub hidden_size: usize,

    /// Width of each continuous variable's own input projection
    pub hidden_continuous_size: usize,

    /// Number of attention pooling heads; must divide `hidden_size`
    pub attention_heads: usize,

    /// Dropout rate applied before the output layer during training
    pub dropout: f64,

    /// Quantiles predicted for every forecast step, strictly increasing
    pub quantiles: Vec<f64>,
}

impl Hyperparameters {
    /// Number of quantile outputs per forecast step
    pub fn output_size(&self) -> usize {
        self.quantiles.len()
    }

    pub fn head_size(&self) -> usize {
        self.hidden_size / self.attention_heads
    }

    /// Index of the quantile closest to the median
    pub fn median_index(&self) -> usize {
        self.quantiles
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - 0.5).abs().total_cmp(&(b.1 - 0.5).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(ForecastError::InvalidConfig(msg)) };

        if self.input_size == 0 {
            return fail("input_size must be > 0".into());
        }
        if self.encoder_length == 0 || self.prediction_length == 0 {
            return fail("encoder_length and prediction_length must be > 0".into());
        }
        if self.hidden_size == 0 {
            return fail("hidden_size must be > 0".into());
        }
        if self.hidden_continuous_size == 0 {
            return fail("hidden_continuous_size must be > 0".into());
        }
        if self.attention_heads == 0 {
            return fail("attention_heads must be > 0".into());
        }
        if self.hidden_size % self.attention_heads != 0 {
            return fail(format!(
                "hidden_size {} must be divisible by attention_heads {}",
                self.hidden_size, self.attention_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout {} must be in [0, 1)", self.dropout));
        }
        if self.quantiles.is_empty() {
            return fail("quantiles must not be empty".into());
        }
        for &q in &self.quantiles {
            if q <= 0.0 || q >= 1.0 {
                return fail(format!("quantile {} must be in (0, 1)", q));
            }
        }
        if self.quantiles.windows(2).any(|pair| pair[0] >= pair[1]) {
            return fail("quantiles must be strictly increasing".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Hyperparameters {
        Hyperparameters {
            input_size: 7,
            encoder_length: 120,
            prediction_length: 20,
            hidden_size: 128,
            hidden_continuous_size: 64,
            attention_heads: 4,
            dropout: 0.3,
            quantiles: vec![0.02, 0.1, 0.25, 0.5, 0.75, 0.9, 0.98],
        }
    }

    #[test]
    fn test_valid() {
        let hp = sample();
        assert!(hp.validate().is_ok());
        assert_eq!(hp.output_size(), 7);
        assert_eq!(hp.head_size(), 32);
        assert_eq!(hp.median_index(), 3);
    }

    #[test]
    fn test_invalid() {
        let mut hp = sample();
        hp.hidden_size = 0;
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.hidden_continuous_size = 0;
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.attention_heads = 3;
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.quantiles = vec![];
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.quantiles = vec![0.5, 1.5];
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.quantiles = vec![0.9, 0.1];
        assert!(hp.validate().is_err());

        let mut hp = sample();
        hp.dropout = 1.0;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn test_median_index_without_exact_median() {
        let mut hp = sample();
        hp.quantiles = vec![0.1, 0.45, 0.9];
        assert_eq!(hp.median_index(), 1);
    }
}
