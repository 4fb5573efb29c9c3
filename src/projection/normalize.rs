//! Per-axis rescaling into a symmetric bounding box.

use super::Point3;

/// Default edge length of the bounding box; coordinates land in
/// `[-DEFAULT_SCALE / 2, DEFAULT_SCALE / 2]`.
pub const DEFAULT_SCALE: f64 = 40.0;

/// Rescales each axis independently into `[-scale / 2, scale / 2]`.
///
/// An axis with zero range (a single point, or identical points) is divided
/// by 1 instead, which collapses it to `-scale / 2`.
pub fn normalize(points: &[Point3], scale: f64) -> Vec<Point3> {
    if points.is_empty() {
        return Vec::new();
    }

    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for p in points {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }

    let mut range = [0.0; 3];
    for axis in 0..3 {
        let r = max[axis] - min[axis];
        range[axis] = if r == 0.0 { 1.0 } else { r };
    }

    points
        .iter()
        .map(|p| {
            let mut out = [0.0; 3];
            for axis in 0..3 {
                out[axis] = ((p[axis] - min[axis]) / range[axis] - 0.5) * scale;
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_full_box() {
        let points = vec![[0.0, 10.0, -5.0], [2.0, 20.0, 5.0], [1.0, 15.0, 0.0]];
        let out = normalize(&points, DEFAULT_SCALE);

        assert_eq!(out[0], [-20.0, -20.0, -20.0]);
        assert_eq!(out[1], [20.0, 20.0, 20.0]);
        assert_eq!(out[2], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn single_point_collapses_to_lower_bound() {
        let out = normalize(&[[3.5, -1.0, 7.0]], DEFAULT_SCALE);
        assert_eq!(out, vec![[-20.0, -20.0, -20.0]]);
    }

    #[test]
    fn constant_axis_collapses_independently() {
        let out = normalize(&[[0.0, 4.0, 1.0], [1.0, 4.0, 3.0]], 10.0);
        assert_eq!(out[0], [-5.0, -5.0, -5.0]);
        assert_eq!(out[1], [5.0, -5.0, 5.0]);
    }

    #[test]
    fn empty_input() {
        assert!(normalize(&[], DEFAULT_SCALE).is_empty());
    }

    #[test]
    fn output_stays_in_bounds() {
        let points: Vec<Point3> = (0..50)
            .map(|i| {
                let t = i as f64;
                [t.sin() * 1e6, t.cos() * 1e-6, t * t]
            })
            .collect();

        for p in normalize(&points, DEFAULT_SCALE) {
            for v in p {
                assert!((-20.0..=20.0).contains(&v), "{v} out of bounds");
            }
        }
    }
}
