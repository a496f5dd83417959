//! Sampling primitives: farthest point sampling and ball queries

use geoattack_core::Point3f;

/// Pick `m` well-spread point indices by iterative farthest point sampling
///
/// Sampling starts from index 0 and is deterministic. At most `points.len()`
/// indices are returned.
pub fn farthest_point_sample(points: &[Point3f], m: usize) -> Vec<usize> {
    let m = m.min(points.len());
    if m == 0 {
        return Vec::new();
    }

    let mut selected = Vec::with_capacity(m);
    let mut min_distance = vec![f32::INFINITY; points.len()];
    let mut current = 0usize;

    for _ in 0..m {
        selected.push(current);
        let anchor = points[current];

        let mut farthest = current;
        let mut farthest_distance = -1.0f32;
        for (i, point) in points.iter().enumerate() {
            let d = (point - anchor).norm_squared();
            if d < min_distance[i] {
                min_distance[i] = d;
            }
            if min_distance[i] > farthest_distance {
                farthest_distance = min_distance[i];
                farthest = i;
            }
        }
        current = farthest;
    }

    selected
}

/// Group of exactly `max_samples` indices around the point at `center`
///
/// Points strictly within `radius` are taken in cloud order. A partial group
/// is padded with its first member, and an empty one with `center` itself.
pub fn ball_query(
    points: &[Point3f],
    center: usize,
    radius: f32,
    max_samples: usize,
) -> Vec<usize> {
    if max_samples == 0 || center >= points.len() {
        return Vec::new();
    }

    let anchor = points[center];
    let radius_squared = radius * radius;
    let mut group: Vec<usize> = points
        .iter()
        .enumerate()
        .filter(|(_, point)| (*point - anchor).norm_squared() < radius_squared)
        .map(|(i, _)| i)
        .take(max_samples)
        .collect();

    let pad = group.first().copied().unwrap_or(center);
    group.resize(max_samples, pad);
    group
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_farthest_point_sample_spreads_out() {
        let points = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.1, 0.0, 0.0),
            Point3f::new(5.0, 0.0, 0.0),
            Point3f::new(2.5, 0.0, 0.0),
        ];
        let selected = farthest_point_sample(&points, 3);
        assert_eq!(selected, vec![0, 2, 3]);
    }

    #[test]
    fn test_farthest_point_sample_caps_count() {
        let points = vec![Point3f::origin(), Point3f::new(1.0, 0.0, 0.0)];
        assert_eq!(farthest_point_sample(&points, 10).len(), 2);
        assert!(farthest_point_sample(&points, 0).is_empty());
        assert!(farthest_point_sample(&[], 3).is_empty());
    }

    #[test]
    fn test_ball_query_order_and_cap() {
        let points: Vec<Point3f> =
            (0..10).map(|i| Point3f::new(i as f32 * 0.1, 0.0, 0.0)).collect();
        let found = ball_query(&points, 0, 0.35, 4);
        assert_eq!(found, vec![0, 1, 2, 3]);

        let capped = ball_query(&points, 0, 0.35, 2);
        assert_eq!(capped, vec![0, 1]);
    }

    #[test]
    fn test_ball_query_pads_partial_group_with_first_member() {
        let points: Vec<Point3f> =
            (0..10).map(|i| Point3f::new(i as f32 * 0.1, 0.0, 0.0)).collect();
        // the first hit is point 1, not the center
        let found = ball_query(&points, 2, 0.15, 6);
        assert_eq!(found, vec![1, 2, 3, 1, 1, 1]);
    }

    #[test]
    fn test_ball_query_pads_empty_group_with_center() {
        let points = vec![Point3f::origin(), Point3f::new(1.0, 0.0, 0.0)];
        assert_eq!(ball_query(&points, 1, 0.0, 3), vec![1, 1, 1]);
        assert!(ball_query(&points, 1, 0.5, 0).is_empty());
        assert!(ball_query(&points, 5, 0.5, 3).is_empty());
    }
}
