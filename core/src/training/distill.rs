//! Distillation: a small feed-forward regressor trained to reproduce
//! the boosted classifier's probabilities.
//!
//! The target is the classifier's output, never the ground-truth label.

use crate::{
    config::DistillConfig,
    error::{PipelineError, PipelineResult},
    rng::StreamRng,
};
use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-7;
/// Probabilities are clipped before taking logs in the loss.
const LOSS_CLIP: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(&self, z: f64) -> f64 {
        match self {
            Self::Relu => z.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Shape (outputs, inputs).
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    /// He-uniform initialisation.
    fn new(inputs: usize, outputs: usize, activation: Activation, rng: &mut StreamRng) -> Self {
        let limit = (6.0 / inputs as f64).sqrt();
        let weights = Array2::from_shape_fn((outputs, inputs), |_| rng.uniform(-limit, limit));
        Self {
            weights,
            biases: Array1::zeros(outputs),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weights.nrows()
    }

    /// Pre-activation for a batch: (batch, inputs) -> (batch, outputs).
    fn linear(&self, a: &Array2<f64>) -> Array2<f64> {
        a.dot(&self.weights.t()) + &self.biases
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpRegressor {
    pub layers: Vec<DenseLayer>,
}

/// Training outcome of the distillation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistillSummary {
    pub epochs: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub final_train_loss: f64,
    pub final_validation_loss: f64,
}

struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, lr: f64, t: i32) {
        self.m.zip_mut_with(grad, |m, &g| *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g);
        self.v.zip_mut_with(grad, |v, &g| *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g);
        let bc1 = 1.0 - ADAM_BETA1.powi(t);
        let bc2 = 1.0 - ADAM_BETA2.powi(t);
        Zip::from(param)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| *p -= lr * (m / bc1) / ((v / bc2).sqrt() + ADAM_EPS));
    }
}

impl MlpRegressor {
    /// Hidden layers use ReLU; the single output unit is a sigmoid.
    pub fn new(input_dim: usize, hidden: &[usize], rng: &mut StreamRng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input_dim;
        for &width in hidden {
            layers.push(DenseLayer::new(fan_in, width, Activation::Relu, rng));
            fan_in = width;
        }
        layers.push(DenseLayer::new(fan_in, 1, Activation::Sigmoid, rng));
        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs())
    }

    /// Forward pass keeping (pre-activation, activation) per layer.
    fn forward(&self, x: &Array2<f64>) -> Vec<(Array2<f64>, Array2<f64>)> {
        let mut trace: Vec<(Array2<f64>, Array2<f64>)> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let input = trace.last().map_or(x, |(_, a)| a);
            let z = layer.linear(input);
            let a = z.mapv(|v| layer.activation.apply(v));
            trace.push((z, a));
        }
        trace
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        self.forward(x)
            .pop()
            .map(|(_, a)| a.column(0).to_vec())
            .unwrap_or_default()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let x = Array2::from_shape_vec((1, row.len()), row.to_vec()).unwrap_or_else(|_| Array2::zeros((1, 0)));
        self.predict(&x).first().copied().unwrap_or(f64::NAN)
    }

    /// Fit against soft targets in [0, 1] with binary cross-entropy and Adam.
    pub fn fit(
        x: &Array2<f64>,
        targets: &[f64],
        config: &DistillConfig,
        rng: &mut StreamRng,
    ) -> PipelineResult<(Self, DistillSummary)> {
        let n = x.nrows();
        if n < 2 || n != targets.len() {
            return Err(PipelineError::DataQuality(format!(
                "distillation got {n} rows for {} targets",
                targets.len()
            )));
        }
        if targets.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(PipelineError::DataQuality("distillation targets must lie in [0, 1]".into()));
        }

        // Hold out the tail as validation data.
        let n_val = ((n as f64 * config.validation_fraction) as usize).min(n - 1);
        let n_train = n - n_val;
        let train_idx: Vec<usize> = (0..n_train).collect();
        let val_idx: Vec<usize> = (n_train..n).collect();
        let y = Array1::from_vec(targets.to_vec());

        let mut model = Self::new(x.ncols(), &config.hidden_layers, rng);
        let mut weight_moments: Vec<Moments<ndarray::Ix2>> =
            model.layers.iter().map(|l| Moments::like(&l.weights)).collect();
        let mut bias_moments: Vec<Moments<ndarray::Ix1>> =
            model.layers.iter().map(|l| Moments::like(&l.biases)).collect();

        let mut step = 0i32;
        let mut order = train_idx.clone();
        let mut summary = DistillSummary {
            epochs: config.epochs,
            train_rows: n_train,
            validation_rows: n_val,
            ..DistillSummary::default()
        };

        for epoch in 0..config.epochs {
            rng.shuffle(&mut order);
            for batch in order.chunks(config.batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                step += 1;
                model.train_batch(&xb, &yb, config.learning_rate, step, &mut weight_moments, &mut bias_moments);
            }
            summary.final_train_loss = model.loss(x, &y, &train_idx);
            if n_val > 0 {
                summary.final_validation_loss = model.loss(x, &y, &val_idx);
            }
            log::debug!(
                "distill: epoch {epoch} train_loss={:.5} val_loss={:.5}",
                summary.final_train_loss,
                summary.final_validation_loss
            );
        }
        if !summary.final_train_loss.is_finite() {
            return Err(PipelineError::DataQuality("distillation loss diverged".into()));
        }
        Ok((model, summary))
    }

    fn train_batch(
        &mut self,
        xb: &Array2<f64>,
        yb: &Array1<f64>,
        lr: f64,
        step: i32,
        weight_moments: &mut [Moments<ndarray::Ix2>],
        bias_moments: &mut [Moments<ndarray::Ix1>],
    ) {
        let batch = xb.nrows() as f64;
        let trace = self.forward(xb);

        // Sigmoid + cross-entropy: dL/dz at the output is (p - y).
        let (_, out) = &trace[trace.len() - 1];
        let mut delta = out - &yb.view().insert_axis(Axis(1));

        for l in (0..self.layers.len()).rev() {
            let input = if l == 0 { xb } else { &trace[l - 1].1 };
            let grad_w = delta.t().dot(input) / batch;
            let grad_b = delta.sum_axis(Axis(0)) / batch;

            if l > 0 {
                let mut upstream = delta.dot(&self.layers[l].weights);
                let z_prev = &trace[l - 1].0;
                Zip::from(&mut upstream).and(z_prev).for_each(|d, &z| {
                    if z <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = upstream;
            }

            let layer = &mut self.layers[l];
            weight_moments[l].step(&mut layer.weights, &grad_w, lr, step);
            bias_moments[l].step(&mut layer.biases, &grad_b, lr, step);
        }
    }

    fn loss(&self, x: &Array2<f64>, y: &Array1<f64>, rows: &[usize]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let preds = self.predict(&x.select(Axis(0), rows));
        let total: f64 = rows
            .iter()
            .zip(&preds)
            .map(|(&i, &p)| {
                let p = p.clamp(LOSS_CLIP, 1.0 - LOSS_CLIP);
                -(y[i] * p.ln() + (1.0 - y[i]) * (1.0 - p).ln())
            })
            .sum();
        total / rows.len() as f64
    }
}
