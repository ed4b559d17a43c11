//! Ray/circle intersection for instantaneous weapons.

use nalgebra::Vector2;
use std::f32::consts::FRAC_PI_2;

/// Distance along the shooter's heading at which the ray first enters a
/// circle of `radius` around `target`, if that happens within `(0, range)`.
///
/// The target is translated into the shooter's frame and the ray is
/// expressed in polar form, giving `r² + b·r + c = 0` with
/// `b = -2(a·cos θ + b'·sin θ)` and `c = a² + b'² - radius²`, where
/// `θ = spin - π/2`. Targets whose center is farther than `range` are
/// never hit, whatever the heading.
pub fn ray_circle(
    origin: &Vector2<f32>,
    spin: f32,
    target: &Vector2<f32>,
    radius: f32,
    range: f32,
) -> Option<f32> {
    let a = target.x - origin.x;
    let b = target.y - origin.y;
    if a * a + b * b > range * range {
        return None;
    }
    let theta = spin - FRAC_PI_2;

    let qb = -(2.0 * a * theta.cos() + 2.0 * b * theta.sin());
    let qc = a * a + b * b - radius * radius;
    let discriminant = qb * qb - 4.0 * qc;
    if discriminant < 0.0 {
        return None;
    }

    let root = discriminant.sqrt();
    let near = (-root - qb) / 2.0;
    let far = (root - qb) / 2.0;
    let in_range = |r: f32| r > 0.0 && r < range;

    match (in_range(near), in_range(far)) {
        (true, true) => Some(near.min(far)),
        (true, false) => Some(near),
        (false, true) => Some(far),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_straight_ahead_hit() {
        // Spin 0 faces -y
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, -200.0), 25.0, 500.0);
        assert_relative_eq!(hit.unwrap(), 175.0, epsilon = 1e-2);
    }

    #[test]
    fn test_rotated_hit() {
        // Spin π/2 faces +x
        let hit = ray_circle(&Vector2::zeros(), PI / 2.0, &Vector2::new(300.0, 0.0), 25.0, 500.0);
        assert_relative_eq!(hit.unwrap(), 275.0, epsilon = 1e-2);
    }

    #[test]
    fn test_target_behind_is_missed() {
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, 200.0), 25.0, 500.0);
        assert!(hit.is_none());
    }

    #[test]
    fn test_off_axis_miss() {
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(100.0, -200.0), 25.0, 500.0);
        assert!(hit.is_none());
    }

    #[test]
    fn test_out_of_range_miss() {
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, -600.0), 25.0, 500.0);
        assert!(hit.is_none());
    }

    #[test]
    fn test_center_beyond_range_misses_even_if_rim_is_close() {
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, -510.0), 25.0, 500.0);
        assert!(hit.is_none());
    }

    #[test]
    fn test_inside_circle_uses_exit_root() {
        // Only the far root is positive
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, -10.0), 25.0, 500.0);
        assert_relative_eq!(hit.unwrap(), 35.0, epsilon = 1e-2);
    }

    #[test]
    fn test_far_root_beyond_range_keeps_near() {
        let hit = ray_circle(&Vector2::zeros(), 0.0, &Vector2::new(0.0, -490.0), 25.0, 500.0);
        assert_relative_eq!(hit.unwrap(), 465.0, epsilon = 1e-2);
    }
}
