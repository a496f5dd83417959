//! Shared fixtures for the attack integration tests

#![allow(dead_code)]

use geoattack_attack::ModelAdapter;
use geoattack_core::{CloudBatch, Error, Point3f, Result, Vector3f};
use ndarray::{Array1, Array2, Array3};
use std::sync::Mutex;

/// Linear classifier on the cloud centroid: `scores = W * mean(points) + b`
pub struct CentroidClassifier {
    /// `[C, 3]`
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl CentroidClassifier {
    /// Class 0 prefers negative x, class 1 positive x, any further classes are
    /// given `bias` and zero weights
    pub fn along_x(extra_biases: &[f32]) -> Self {
        let classes = 2 + extra_biases.len();
        let mut weights = Array2::zeros((classes, 3));
        weights[[0, 0]] = -10.0;
        weights[[1, 0]] = 10.0;
        let mut bias = Array1::zeros(classes);
        for (c, &b) in extra_biases.iter().enumerate() {
            bias[2 + c] = b;
        }
        Self { weights, bias }
    }
}

impl ModelAdapter for CentroidClassifier {
    fn num_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn forward(&self, batch: &CloudBatch) -> Result<Array2<f32>> {
        let mut scores = Array2::zeros((batch.num_samples(), self.num_classes()));
        for k in 0..batch.num_samples() {
            let points = batch.points(k);
            let centroid = points.iter().fold(Vector3f::zeros(), |acc, p| acc + p.coords)
                / points.len() as f32;
            for c in 0..self.num_classes() {
                scores[[k, c]] = self.bias[c]
                    + self.weights[[c, 0]] * centroid.x
                    + self.weights[[c, 1]] * centroid.y
                    + self.weights[[c, 2]] * centroid.z;
            }
        }
        Ok(scores)
    }

    fn backward(&self, batch: &CloudBatch, grad_scores: &Array2<f32>) -> Result<Array3<f32>> {
        if grad_scores.nrows() != batch.num_samples() {
            return Err(Error::ShapeMismatch {
                expected: vec![batch.num_samples()],
                found: vec![grad_scores.nrows()],
            });
        }
        let n = batch.num_points();
        let direction = grad_scores.dot(&self.weights) / n as f32;
        let mut grad = Array3::zeros((batch.num_samples(), 3, n));
        for k in 0..batch.num_samples() {
            for d in 0..3 {
                for i in 0..n {
                    grad[[k, d, i]] = direction[[k, d]];
                }
            }
        }
        Ok(grad)
    }
}

/// Delegates to a [`CentroidClassifier`] and keeps every batch passed to `forward`
pub struct RecordingClassifier {
    pub inner: CentroidClassifier,
    inputs: Mutex<Vec<CloudBatch>>,
}

impl RecordingClassifier {
    pub fn new(inner: CentroidClassifier) -> Self {
        Self {
            inner,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Forward inputs in call order
    pub fn inputs(&self) -> Vec<CloudBatch> {
        self.inputs.lock().unwrap().clone()
    }
}

impl ModelAdapter for RecordingClassifier {
    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn forward(&self, batch: &CloudBatch) -> Result<Array2<f32>> {
        self.inputs.lock().unwrap().push(batch.clone());
        self.inner.forward(batch)
    }

    fn backward(&self, batch: &CloudBatch, grad_scores: &Array2<f32>) -> Result<Array3<f32>> {
        self.inner.backward(batch, grad_scores)
    }
}

/// Evenly spread points on a sphere, with outward unit normals
pub fn sphere(center: Point3f, radius: f32, count: usize) -> (Vec<Point3f>, Vec<Vector3f>) {
    let golden_angle = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    let mut points = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);
    for i in 0..count {
        let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
        let ring = (1.0 - y * y).sqrt();
        let theta = golden_angle * i as f32;
        let normal = Vector3f::new(ring * theta.cos(), y, ring * theta.sin());
        points.push(center + normal * radius);
        normals.push(normal);
    }
    (points, normals)
}

/// A batch of spheres centred at the given x offsets
pub fn sphere_batch(centers_x: &[f32], count: usize) -> (CloudBatch, CloudBatch) {
    let (clouds, fields): (Vec<_>, Vec<_>) = centers_x
        .iter()
        .map(|&x| sphere(Point3f::new(x, 0.0, 0.0), 0.5, count))
        .unzip();
    (
        CloudBatch::from_points(&clouds).unwrap(),
        CloudBatch::from_vectors(&fields).unwrap(),
    )
}
