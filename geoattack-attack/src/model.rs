//! Classifier interface and a reference PointNet-style classifier
//!
//! The attack only ever talks to a classifier through [`ModelAdapter`]: a
//! batched forward pass producing class scores, and a vector-Jacobian product
//! that carries a gradient on those scores back to the input points.

use geoattack_core::{CloudBatch, Error, Result};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A differentiable point cloud classifier
///
/// Implementations must be safe to call repeatedly and must not change their
/// parameters between calls.
pub trait ModelAdapter: Send + Sync {
    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Class scores `[B, C]` for a `[B, 3, N]` batch
    fn forward(&self, batch: &CloudBatch) -> Result<Array2<f32>>;

    /// Gradient of `sum(grad_scores * forward(batch))` with respect to the points, `[B, 3, N]`
    fn backward(&self, batch: &CloudBatch, grad_scores: &Array2<f32>) -> Result<Array3<f32>>;

    /// Top-1 label of every sample
    fn predict(&self, batch: &CloudBatch) -> Result<Vec<usize>> {
        let scores = self.forward(batch)?;
        Ok(scores.outer_iter().map(argmax).collect())
    }
}

/// Index of the largest entry; the first one wins ties
pub fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Fraction of samples the model labels correctly
pub fn evaluate_accuracy<M: ModelAdapter + ?Sized>(
    model: &M,
    batch: &CloudBatch,
    labels: &[usize],
) -> Result<f32> {
    if labels.len() != batch.num_samples() {
        return Err(Error::ShapeMismatch {
            expected: vec![batch.num_samples()],
            found: vec![labels.len()],
        });
    }
    if labels.is_empty() {
        return Ok(0.0);
    }
    let predicted = model.predict(batch)?;
    let correct = predicted.iter().zip(labels).filter(|(p, l)| p == l).count();
    Ok(correct as f32 / labels.len() as f32)
}

/// Fully connected layer `y = W x + b` with `W` stored as `[out, in]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseLayer {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weights.nrows() != bias.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![weights.nrows()],
                found: vec![bias.len()],
            });
        }
        Ok(Self { weights, bias })
    }

    /// He-initialized layer with zero bias
    pub fn random(inputs: usize, outputs: usize, rng: &mut StdRng) -> Result<Self> {
        let std = (2.0 / inputs.max(1) as f32).sqrt();
        let normal = Normal::new(0.0f32, std).map_err(|e| Error::Algorithm(e.to_string()))?;
        let weights = Array2::from_shape_fn((outputs, inputs), |_| normal.sample(&mut *rng));
        Ok(Self {
            weights,
            bias: Array1::zeros(outputs),
        })
    }

    pub fn inputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weights.nrows()
    }

    /// Apply the layer to every column of `[in, N]`
    fn apply_columns(&self, x: &ArrayView2<'_, f32>) -> Array2<f32> {
        let mut z = self.weights.dot(x);
        z += &self.bias.view().insert_axis(Axis(1));
        z
    }

    fn apply(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weights.dot(x) + &self.bias
    }
}

/// Activations kept from a forward pass over one cloud
struct PointNetTrace {
    /// Post-ReLU output of every shared point layer, `[C_l, N]`
    point_activations: Vec<Array2<f32>>,
    /// Point index that won the max-pool for every global feature channel
    pooled_from: Vec<usize>,
    /// Output of every head layer, after ReLU for all but the last
    head_activations: Vec<Array1<f32>>,
}

/// PointNet-style classifier: shared per-point MLP, max-pool, dense head
///
/// Every point layer and every head layer but the last is followed by a ReLU.
/// The input transform networks of the full PointNet are not modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointNetClassifier {
    point_layers: Vec<DenseLayer>,
    head_layers: Vec<DenseLayer>,
}

impl PointNetClassifier {
    pub fn new(point_layers: Vec<DenseLayer>, head_layers: Vec<DenseLayer>) -> Result<Self> {
        if point_layers.is_empty() || head_layers.is_empty() {
            return Err(Error::InvalidData(
                "classifier needs at least one point layer and one head layer".to_string(),
            ));
        }
        if point_layers[0].inputs() != 3 {
            return Err(Error::ShapeMismatch {
                expected: vec![3],
                found: vec![point_layers[0].inputs()],
            });
        }

        let chained = point_layers.iter().chain(head_layers.iter()).collect::<Vec<_>>();
        for pair in chained.windows(2) {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(Error::ShapeMismatch {
                    expected: vec![pair[0].outputs()],
                    found: vec![pair[1].inputs()],
                });
            }
        }

        Ok(Self {
            point_layers,
            head_layers,
        })
    }

    /// Randomly initialized classifier with the given hidden widths
    pub fn random(
        point_widths: &[usize],
        head_widths: &[usize],
        num_classes: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut inputs = 3;
        let mut point_layers = Vec::with_capacity(point_widths.len());
        for &width in point_widths {
            point_layers.push(DenseLayer::random(inputs, width, &mut rng)?);
            inputs = width;
        }

        let mut head_layers = Vec::with_capacity(head_widths.len() + 1);
        for &width in head_widths.iter().chain(std::iter::once(&num_classes)) {
            head_layers.push(DenseLayer::random(inputs, width, &mut rng)?);
            inputs = width;
        }

        Self::new(point_layers, head_layers)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let model: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        Self::new(model.point_layers, model.head_layers)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn trace(&self, cloud: ArrayView2<'_, f32>) -> PointNetTrace {
        let mut point_activations = Vec::with_capacity(self.point_layers.len());
        let mut current = cloud.to_owned();
        for layer in &self.point_layers {
            let mut z = layer.apply_columns(&current.view());
            z.mapv_inplace(|v| v.max(0.0));
            point_activations.push(z.clone());
            current = z;
        }

        let channels = current.nrows();
        let mut pooled = Array1::zeros(channels);
        let mut pooled_from = vec![0usize; channels];
        for (c, row) in current.outer_iter().enumerate() {
            let i = argmax(row);
            pooled[c] = row[i];
            pooled_from[c] = i;
        }

        let last = self.head_layers.len() - 1;
        let mut head_activations = Vec::with_capacity(self.head_layers.len());
        let mut feature = pooled;
        for (l, layer) in self.head_layers.iter().enumerate() {
            let mut z = layer.apply(&feature);
            if l != last {
                z.mapv_inplace(|v| v.max(0.0));
            }
            head_activations.push(z.clone());
            feature = z;
        }

        PointNetTrace {
            point_activations,
            pooled_from,
            head_activations,
        }
    }

    fn backward_sample(
        &self,
        cloud: ArrayView2<'_, f32>,
        grad_scores: ArrayView1<'_, f32>,
    ) -> Array2<f32> {
        let trace = self.trace(cloud);
        let last = self.head_layers.len() - 1;

        let mut delta = grad_scores.to_owned();
        for l in (0..self.head_layers.len()).rev() {
            if l != last {
                let activation = &trace.head_activations[l];
                delta.zip_mut_with(activation, |d, &a| {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                });
            }
            delta = self.head_layers[l].weights.t().dot(&delta);
        }

        let num_points = cloud.ncols();
        let mut grad = Array2::zeros((delta.len(), num_points));
        for (c, &i) in trace.pooled_from.iter().enumerate() {
            grad[[c, i]] = delta[c];
        }

        for l in (0..self.point_layers.len()).rev() {
            grad.zip_mut_with(&trace.point_activations[l], |g, &a| {
                if a <= 0.0 {
                    *g = 0.0;
                }
            });
            grad = self.point_layers[l].weights.t().dot(&grad);
        }

        grad
    }
}

impl ModelAdapter for PointNetClassifier {
    fn num_classes(&self) -> usize {
        self.head_layers[self.head_layers.len() - 1].outputs()
    }

    fn forward(&self, batch: &CloudBatch) -> Result<Array2<f32>> {
        let rows: Vec<Array1<f32>> = (0..batch.num_samples())
            .into_par_iter()
            .map(|k| {
                let trace = self.trace(batch.sample(k));
                trace.head_activations[trace.head_activations.len() - 1].clone()
            })
            .collect();

        let mut scores = Array2::zeros((batch.num_samples(), self.num_classes()));
        for (k, row) in rows.iter().enumerate() {
            scores.row_mut(k).assign(row);
        }
        Ok(scores)
    }

    fn backward(&self, batch: &CloudBatch, grad_scores: &Array2<f32>) -> Result<Array3<f32>> {
        let expected = [batch.num_samples(), self.num_classes()];
        if grad_scores.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                found: grad_scores.shape().to_vec(),
            });
        }

        let grads: Vec<Array2<f32>> = (0..batch.num_samples())
            .into_par_iter()
            .map(|k| self.backward_sample(batch.sample(k), grad_scores.row(k)))
            .collect();

        let mut out = Array3::zeros((batch.num_samples(), 3, batch.num_points()));
        for (k, grad) in grads.iter().enumerate() {
            out.index_axis_mut(Axis(0), k).assign(grad);
        }
        Ok(out)
    }
}
