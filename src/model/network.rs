//! Attention-pooled quantile forecaster
//!
//! ```text
//! c_i    = relu(x_i · w_i + b_i)                      (L, C) per input variable i
//! E      = tanh([c_1 … c_F] · W_in + b_in)            (L, H)
//! a_k    = softmax(E_k · q_k / √d)                    per head k, E_k = E[:, k·d..(k+1)·d]
//! p_k    = a_kᵀ · E_k                                 (d)
//! z      = [p_1 … p_heads, E[L-1]]                    (2H)
//! y      = dropout(z) · W_out + b_out + x[L-1, 0]     (P·Q) -> (P, Q)
//! ```
//!
//! The residual term `x[L-1, 0]` is the last normalized target, so the network learns
//! the move away from the latest price rather than the price itself.

use super::Hyperparameters;
use crate::error::ForecastError;
use crate::Result;
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, MutexGuard};

/// Backend used for inference and for evaluating trained weights
pub type InferenceBackend = NdArray<f32>;

/// Backend used while training
pub type TrainingBackend = Autodiff<InferenceBackend>;

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

#[derive(Module, Debug)]
pub struct QuantileNetwork<B: Backend> {
    /// One `1 -> hidden_continuous_size` projection per input variable
    variable_projections: Vec<Linear<B>>,
    /// `input_size · hidden_continuous_size -> hidden_size`
    embedding: Linear<B>,
    /// One attention query per head, (heads, head_size)
    queries: Param<Tensor<B, 2>>,
    /// `2 · hidden_size -> prediction_length · quantiles`
    output: Linear<B>,
    dropout: Dropout,
    heads: usize,
    prediction_length: usize,
    quantiles: usize,
}

impl<B: Backend> QuantileNetwork<B> {
    /// Xavier-uniform weights drawn from `rng`, zero biases
    pub fn new<R: Rng>(hp: &Hyperparameters, rng: &mut R, device: &B::Device) -> Self {
        let hidden = hp.hidden_size;
        let continuous = hp.hidden_continuous_size;

        let variable_projections = (0..hp.input_size)
            .map(|_| linear(rng, 1, continuous, device))
            .collect();

        Self {
            variable_projections,
            embedding: linear(rng, hp.input_size * continuous, hidden, device),
            queries: Param::from_tensor(xavier(rng, hp.attention_heads, hp.head_size(), device)),
            output: linear(rng, 2 * hidden, hp.prediction_length * hp.output_size(), device),
            dropout: DropoutConfig::new(hp.dropout).init(),
            heads: hp.attention_heads,
            prediction_length: hp.prediction_length,
            quantiles: hp.output_size(),
        }
    }

    /// `x` has shape (batch, encoder_length, input_size); the result has shape
    /// (batch, prediction_length, quantiles) in normalized units
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, steps, _] = x.dims();

        let projected: Vec<Tensor<B, 3>> = self
            .variable_projections
            .iter()
            .enumerate()
            .map(|(i, projection)| relu(projection.forward(x.clone().slice([0..batch, 0..steps, i..i + 1]))))
            .collect();
        let embedded = self.embedding.forward(Tensor::cat(projected, 2)).tanh();

        let hidden = embedded.dims()[2];
        let head_size = hidden / self.heads;

        // (batch, heads, steps, head_size)
        let per_head = embedded
            .clone()
            .reshape([batch, steps, self.heads, head_size])
            .swap_dims(1, 2);
        let queries = self.queries.val().reshape([1, self.heads, 1, head_size]);
        let scores = (per_head.clone() * queries)
            .sum_dim(3)
            .div_scalar((head_size as f32).sqrt());
        let attention = softmax(scores, 2);
        let pooled = (attention * per_head).sum_dim(2).reshape([batch, hidden]);

        let last = embedded
            .slice([0..batch, steps - 1..steps, 0..hidden])
            .reshape([batch, hidden]);
        let z = self.dropout.forward(Tensor::cat(vec![pooled, last], 1));

        let anchor = x.slice([0..batch, steps - 1..steps, 0..1]);
        self.output
            .forward(z)
            .reshape([batch, self.prediction_length, self.quantiles])
            + anchor
    }

    /// Verify every weight tensor has the shape implied by `hp`
    pub fn check_shapes(&self, hp: &Hyperparameters) -> Result<()> {
        if self.variable_projections.len() != hp.input_size {
            return Err(ForecastError::Artifact(format!(
                "weights hold {} variable projections, hyperparameters require {}",
                self.variable_projections.len(),
                hp.input_size
            )));
        }

        let continuous = hp.hidden_continuous_size;
        let hidden = hp.hidden_size;
        let outputs = hp.prediction_length * hp.output_size();

        let mut expected = vec![
            ("embedding", self.embedding.weight.dims(), [hp.input_size * continuous, hidden]),
            ("queries", self.queries.dims(), [hp.attention_heads, hp.head_size()]),
            ("output", self.output.weight.dims(), [2 * hidden, outputs]),
        ];
        for projection in &self.variable_projections {
            expected.push(("variable_projection", projection.weight.dims(), [1, continuous]));
        }

        for (name, actual, wanted) in expected {
            if actual != wanted {
                return Err(ForecastError::Artifact(format!(
                    "{} has shape {:?}, hyperparameters require {:?}",
                    name, actual, wanted
                )));
            }
        }
        Ok(())
    }
}

fn xavier<B: Backend, R: Rng>(rng: &mut R, rows: usize, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    let values: Vec<f32> = (0..rows * cols).map(|_| rng.gen_range(-limit..limit)).collect();
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

fn linear<B: Backend, R: Rng>(rng: &mut R, d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    let mut layer = LinearConfig::new(d_input, d_output)
        .with_initializer(Initializer::Zeros)
        .init(device);
    layer.weight = Param::from_tensor(xavier(rng, d_input, d_output, device));
    layer
}

/// Trained network ready for inference
///
/// burn modules are `Send` but not `Sync`, so the network sits behind a mutex to be
/// shared across request handlers.
#[derive(Debug)]
pub struct QuantileForecaster {
    hyperparameters: Hyperparameters,
    network: Mutex<QuantileNetwork<InferenceBackend>>,
}

impl QuantileForecaster {
    /// Fresh, randomly initialized network
    pub fn new<R: Rng>(hyperparameters: Hyperparameters, rng: &mut R) -> Result<Self> {
        hyperparameters.validate()?;
        let network = QuantileNetwork::new(&hyperparameters, rng, &NdArrayDevice::default());
        Ok(Self::wrap(hyperparameters, network))
    }

    /// Wrap weights produced by training
    pub fn from_network(
        hyperparameters: Hyperparameters,
        network: QuantileNetwork<InferenceBackend>,
    ) -> Result<Self> {
        hyperparameters.validate()?;
        network.check_shapes(&hyperparameters)?;
        Ok(Self::wrap(hyperparameters, network))
    }

    /// Rebuild a network from a record written by [`QuantileForecaster::to_bytes`]
    pub fn from_bytes(hyperparameters: Hyperparameters, bytes: Vec<u8>) -> Result<Self> {
        hyperparameters
            .validate()
            .map_err(|e| ForecastError::Artifact(e.to_string()))?;

        let device = NdArrayDevice::default();
        let record = WeightsRecorder::default()
            .load(bytes, &device)
            .map_err(|e| ForecastError::Artifact(format!("cannot decode weights: {:?}", e)))?;
        let network = QuantileNetwork::new(&hyperparameters, &mut StdRng::seed_from_u64(0), &device)
            .load_record(record);

        network.check_shapes(&hyperparameters)?;
        Ok(Self::wrap(hyperparameters, network))
    }

    fn wrap(hyperparameters: Hyperparameters, network: QuantileNetwork<InferenceBackend>) -> Self {
        Self {
            hyperparameters,
            network: Mutex::new(network),
        }
    }

    fn network(&self) -> Result<MutexGuard<'_, QuantileNetwork<InferenceBackend>>> {
        self.network
            .lock()
            .map_err(|_| ForecastError::ModelUnavailable("model lock poisoned".into()))
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn num_parameters(&self) -> usize {
        self.network().map_or(0, |network| network.num_params())
    }

    /// Module record encoded as bytes, stored inside the model artifact
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let record = self.network()?.clone().into_record();
        WeightsRecorder::default()
            .record(record, ())
            .map_err(|e| ForecastError::Artifact(format!("cannot encode weights: {:?}", e)))
    }

    /// Replace the output head with zeros so the network forecasts its residual anchor
    pub fn into_residual_only(self) -> Result<Self> {
        let hp = self.hyperparameters;
        let mut network = self
            .network
            .into_inner()
            .map_err(|_| ForecastError::ModelUnavailable("model lock poisoned".into()))?;
        network.output = LinearConfig::new(2 * hp.hidden_size, hp.prediction_length * hp.output_size())
            .with_initializer(Initializer::Zeros)
            .init(&NdArrayDevice::default());
        Ok(Self::wrap(hp, network))
    }

    /// Inference forward pass. `encoder` has shape (encoder_length, input_size);
    /// the result has shape (prediction_length, quantiles) in normalized units.
    pub fn predict(&self, encoder: &Array2<f64>) -> Result<Array2<f64>> {
        let hp = &self.hyperparameters;
        if encoder.shape() != [hp.encoder_length, hp.input_size] {
            return Err(ForecastError::InvalidConfig(format!(
                "encoder window has shape {:?}, model expects [{}, {}]",
                encoder.shape(),
                hp.encoder_length,
                hp.input_size
            )));
        }

        let values: Vec<f32> = encoder.iter().map(|v| *v as f32).collect();
        let input = Tensor::<InferenceBackend, 3>::from_data(
            TensorData::new(values, [1, hp.encoder_length, hp.input_size]),
            &NdArrayDevice::default(),
        );
        let output = self.network()?.forward(input);

        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ForecastError::Artifact(format!("cannot read model output: {:?}", e)))?;
        Array2::from_shape_vec(
            (hp.prediction_length, hp.output_size()),
            values.into_iter().map(f64::from).collect(),
        )
        .map_err(|e| ForecastError::Artifact(e.to_string()))
    }
}

impl Clone for QuantileForecaster {
    fn clone(&self) -> Self {
        let network = match self.network.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Self::wrap(self.hyperparameters.clone(), network)
    }
}
