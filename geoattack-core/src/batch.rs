//! Batched point cloud container
//!
//! A `CloudBatch` stores `B` clouds of `N` points each as a dense `[B, 3, N]`
//! array. The same container carries normal fields, which share the layout
//! and positional correspondence of the clouds they belong to.

use crate::error::{Error, Result};
use crate::point::*;
use ndarray::{Array3, Array4, ArrayView2, Axis};

/// A batch of equally sized point clouds laid out as `[B, 3, N]`
#[derive(Debug, Clone, PartialEq)]
pub struct CloudBatch {
    data: Array3<f32>,
}

impl CloudBatch {
    /// Wrap an existing `[B, 3, N]` array
    pub fn new(data: Array3<f32>) -> Result<Self> {
        if data.shape()[1] != 3 {
            return Err(Error::ShapeMismatch {
                expected: vec![data.shape()[0], 3, data.shape()[2]],
                found: data.shape().to_vec(),
            });
        }
        Ok(Self { data })
    }

    /// A batch of `num_samples` clouds with every coordinate set to zero
    pub fn zeros(num_samples: usize, num_points: usize) -> Self {
        Self {
            data: Array3::zeros((num_samples, 3, num_points)),
        }
    }

    /// A batch with every coordinate set to `value`
    pub fn filled(num_samples: usize, num_points: usize, value: f32) -> Self {
        Self {
            data: Array3::from_elem((num_samples, 3, num_points), value),
        }
    }

    /// Build a batch from per-sample point lists, which must all have the same length
    pub fn from_points(clouds: &[Vec<Point3f>]) -> Result<Self> {
        let vectors: Vec<Vec<Vector3f>> = clouds
            .iter()
            .map(|cloud| cloud.iter().map(|p| p.coords).collect())
            .collect();
        Self::from_vectors(&vectors)
    }

    /// Build a batch from per-sample vector lists, which must all have the same length
    pub fn from_vectors(fields: &[Vec<Vector3f>]) -> Result<Self> {
        let num_points = fields.first().map(|f| f.len()).unwrap_or(0);
        if let Some(bad) = fields.iter().find(|f| f.len() != num_points) {
            return Err(Error::ShapeMismatch {
                expected: vec![num_points],
                found: vec![bad.len()],
            });
        }

        let mut data = Array3::zeros((fields.len(), 3, num_points));
        for (k, field) in fields.iter().enumerate() {
            for (i, v) in field.iter().enumerate() {
                data[[k, 0, i]] = v.x;
                data[[k, 1, i]] = v.y;
                data[[k, 2, i]] = v.z;
            }
        }
        Ok(Self { data })
    }

    /// Flatten a `[B, L, N, 3]` or `[B, L, 3, N]` array into a `[B*L, 3, N]` batch
    ///
    /// When the last axis has length 3 it is taken as the coordinate axis,
    /// so a cloud of exactly three points must be supplied as `[B, L, N, 3]`.
    pub fn from_layout(array: Array4<f32>) -> Result<Self> {
        let array = if array.shape()[3] == 3 {
            array.permuted_axes([0, 1, 3, 2])
        } else {
            array
        };

        let shape = array.shape().to_vec();
        if shape[2] != 3 {
            return Err(Error::ShapeMismatch {
                expected: vec![shape[0], shape[1], 3, shape[3]],
                found: shape,
            });
        }

        let (b, l, n) = (shape[0], shape[1], shape[3]);
        let data = array
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((b * l, 3, n))
            .map_err(|e| Error::InvalidData(format!("cannot flatten batch: {}", e)))?;
        Ok(Self { data })
    }

    /// Number of clouds in the batch
    pub fn num_samples(&self) -> usize {
        self.data.shape()[0]
    }

    /// Number of points per cloud
    pub fn num_points(&self) -> usize {
        self.data.shape()[2]
    }

    /// Shape as `[B, 3, N]`
    pub fn shape(&self) -> [usize; 3] {
        [self.num_samples(), 3, self.num_points()]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// The `[3, N]` view of one sample
    pub fn sample(&self, k: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), k)
    }

    /// Point `i` of sample `k`
    pub fn point(&self, k: usize, i: usize) -> Point3f {
        Point3f::from(self.vector(k, i))
    }

    /// Column `i` of sample `k` read as a vector
    pub fn vector(&self, k: usize, i: usize) -> Vector3f {
        Vector3f::new(
            self.data[[k, 0, i]],
            self.data[[k, 1, i]],
            self.data[[k, 2, i]],
        )
    }

    /// Overwrite column `i` of sample `k`
    pub fn set_vector(&mut self, k: usize, i: usize, v: &Vector3f) {
        self.data[[k, 0, i]] = v.x;
        self.data[[k, 1, i]] = v.y;
        self.data[[k, 2, i]] = v.z;
    }

    /// All points of sample `k`
    pub fn points(&self, k: usize) -> Vec<Point3f> {
        (0..self.num_points()).map(|i| self.point(k, i)).collect()
    }

    /// All columns of sample `k` read as vectors
    pub fn vectors(&self, k: usize) -> Vec<Vector3f> {
        (0..self.num_points()).map(|i| self.vector(k, i)).collect()
    }

    /// Copy sample `src_k` of `other` into sample `k` of this batch
    pub fn copy_sample_from(&mut self, k: usize, other: &CloudBatch, src_k: usize) {
        self.data
            .index_axis_mut(Axis(0), k)
            .assign(&other.data.index_axis(Axis(0), src_k));
    }

    /// Check that another batch has the same `[B, 3, N]` shape
    pub fn ensure_same_shape(&self, other: &CloudBatch) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                found: other.shape().to_vec(),
            });
        }
        Ok(())
    }
}
