//! Nearest neighbor search implementations
//!
//! Distances are squared Euclidean throughout. Attack clouds are small
//! (around a thousand points) and change every iteration, so an exhaustive
//! search that needs no index rebuild is the right trade-off here.

use geoattack_core::{NearestNeighborSearch, Point3f};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Brute force nearest neighbor search over a borrowed point set
pub struct BruteForceSearch<'a> {
    points: &'a [Point3f],
}

impl<'a> BruteForceSearch<'a> {
    pub fn new(points: &'a [Point3f]) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn by_distance(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(Ordering::Equal)
        .then(a.0.cmp(&b.0))
}

impl NearestNeighborSearch for BruteForceSearch<'_> {
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)> {
        if k == 0 {
            return Vec::new();
        }

        let mut distances: Vec<(usize, f32)> = self
            .points
            .iter()
            .enumerate()
            .map(|(idx, point)| (idx, (point - query).norm_squared()))
            .collect();

        // Partial selection first, then order only the survivors
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, by_distance);
            distances.truncate(k);
        }
        distances.sort_by(by_distance);
        distances
    }

    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)> {
        let radius_squared = radius * radius;
        self.points
            .iter()
            .enumerate()
            .filter_map(|(idx, point)| {
                let distance_squared = (point - query).norm_squared();
                (distance_squared <= radius_squared).then_some((idx, distance_squared))
            })
            .collect()
    }

    fn find_nearest(&self, query: &Point3f) -> Option<(usize, f32)> {
        self.points
            .iter()
            .enumerate()
            .map(|(idx, point)| (idx, (point - query).norm_squared()))
            .min_by(by_distance)
    }
}

/// For each source point, the index of its nearest target point and the squared distance
///
/// Returns an empty vector when `target` is empty.
pub fn nearest_correspondences(source: &[Point3f], target: &[Point3f]) -> Vec<(usize, f32)> {
    if target.is_empty() {
        return Vec::new();
    }
    let search = BruteForceSearch::new(target);
    source
        .par_iter()
        .filter_map(|point| search.find_nearest(point))
        .collect()
}

/// The `k` nearest neighbors of every point within its own cloud, excluding the point itself
///
/// The `k + 1` closest points are gathered and the closest one is dropped,
/// so a duplicate of the query point may stand in for the query itself.
/// Fewer than `k` neighbors are returned when the cloud is too small.
pub fn k_nearest_within(points: &[Point3f], k: usize) -> Vec<Vec<usize>> {
    let search = BruteForceSearch::new(points);
    points
        .par_iter()
        .map(|point| {
            search
                .find_k_nearest(point, k + 1)
                .into_iter()
                .skip(1)
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect()
}
