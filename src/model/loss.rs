//! Quantile (pinball) loss

use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

/// Pinball loss averaged over scored forecast steps and quantiles
///
/// `mask` marks which forecast steps carry a target, so symbols with a shorter
/// horizon share the same output layer.
#[derive(Debug, Clone)]
pub struct QuantileLoss {
    quantiles: Vec<f64>,
}

impl QuantileLoss {
    pub fn new(quantiles: Vec<f64>) -> Self {
        Self { quantiles }
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// `prediction` is (batch, steps, quantiles); `target` and `mask` are (batch, steps)
    pub fn forward<B: Backend>(
        &self,
        prediction: Tensor<B, 3>,
        target: Tensor<B, 2>,
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        let quantiles = self.quantiles.len();
        let levels: Vec<f32> = self.quantiles.iter().map(|q| *q as f32).collect();
        let levels = Tensor::<B, 1>::from_data(TensorData::new(levels, [quantiles]), &prediction.device())
            .reshape([1, 1, quantiles]);

        // Under-prediction costs q · error, over-prediction (1 - q) · error
        let error = target.unsqueeze_dim::<3>(2) - prediction;
        let pinball = relu(error.clone()) * levels.clone() + relu(error.neg()) * levels.neg().add_scalar(1.0);

        let mask = mask.unsqueeze_dim::<3>(2);
        let scored = mask.clone().sum().mul_scalar(quantiles as f32).clamp_min(1.0);
        (pinball * mask).sum() / scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InferenceBackend;
    use burn::tensor::ElementConversion;

    type B = InferenceBackend;

    fn tensor2(values: Vec<f32>, shape: [usize; 2]) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn tensor3(values: Vec<f32>, shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn value(loss: Tensor<B, 1>) -> f64 {
        loss.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_perfect_prediction_has_zero_loss() {
        let loss = QuantileLoss::new(vec![0.1, 0.5, 0.9]);
        let prediction = tensor3(vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0], [1, 2, 3]);
        let target = tensor2(vec![1.0, 2.0], [1, 2]);
        let mask = tensor2(vec![1.0, 1.0], [1, 2]);
        assert_eq!(value(loss.forward(prediction, target, mask)), 0.0);
    }

    #[test]
    fn test_asymmetric_penalty() {
        let loss = QuantileLoss::new(vec![0.9]);
        let target = || tensor2(vec![10.0], [1, 1]);
        let mask = || tensor2(vec![1.0], [1, 1]);

        let under = value(loss.forward(tensor3(vec![8.0], [1, 1, 1]), target(), mask()));
        let over = value(loss.forward(tensor3(vec![12.0], [1, 1, 1]), target(), mask()));
        assert!((under - 1.8).abs() < 1e-5);
        assert!((over - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_masked_steps_are_not_scored() {
        let loss = QuantileLoss::new(vec![0.5]);
        let prediction = tensor3(vec![1.0, 100.0, 100.0], [1, 3, 1]);
        let target = tensor2(vec![1.0, 0.0, 0.0], [1, 3]);
        let mask = tensor2(vec![1.0, 0.0, 0.0], [1, 3]);
        assert_eq!(value(loss.forward(prediction, target, mask)), 0.0);
    }

    #[test]
    fn test_average_over_scored_elements() {
        let loss = QuantileLoss::new(vec![0.25, 0.75]);
        // Two samples: one scores 2 steps, the other 1
        let prediction = tensor3(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 9.0, 9.0], [2, 2, 2]);
        let target = tensor2(vec![1.0, 1.0, 1.0, 0.0], [2, 2]);
        let mask = tensor2(vec![1.0, 1.0, 1.0, 0.0], [2, 2]);

        // Every scored element under-predicts by 1: (0.25 + 0.75) / 2 per step
        assert!((value(loss.forward(prediction, target, mask)) - 0.5).abs() < 1e-6);
    }
}
