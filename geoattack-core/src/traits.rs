//! Core traits for geoattack

use crate::point::*;

/// Trait for nearest neighbor search functionality
///
/// All distances reported by implementors are squared Euclidean distances,
/// which is what the fidelity losses consume directly.
pub trait NearestNeighborSearch {
    /// Find the k nearest neighbors to a query point, closest first
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)>;

    /// Find all neighbors within a given radius
    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)>;

    /// Find the single nearest neighbor, if the searched set is non-empty
    fn find_nearest(&self, query: &Point3f) -> Option<(usize, f32)> {
        self.find_k_nearest(query, 1).into_iter().next()
    }
}
