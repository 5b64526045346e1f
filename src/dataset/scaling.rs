use serde::{Deserialize, Serialize};

/// Minimum scale relative to the center, keeps flat windows from blowing up
const RELATIVE_SCALE_FLOOR: f64 = 1e-4;
const ABSOLUTE_SCALE_FLOOR: f64 = 1e-8;

/// Per-window standardization: `(x - center) / scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetScale {
    pub center: f64,
    pub scale: f64,
}

impl TargetScale {
    /// Mean and (floored) population standard deviation of `values`
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                center: 0.0,
                scale: 1.0,
            };
        }

        let n = values.len() as f64;
        let center = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / n;
        let scale = variance
            .sqrt()
            .max(center.abs() * RELATIVE_SCALE_FLOOR)
            .max(ABSOLUTE_SCALE_FLOOR);

        Self { center, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }

    pub fn inverse(&self, value: f64) -> f64 {
        value * self.scale + self.center
    }

    /// Scale expressed as a fraction of the center (0 when the center is ~0)
    pub fn relative_scale(&self) -> f64 {
        if self.center.abs() > ABSOLUTE_SCALE_FLOOR {
            self.scale / self.center.abs()
        } else {
            0.0
        }
    }
}
