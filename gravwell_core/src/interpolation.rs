//! Render-rate sampling of a ledger's fixed-rate history.
//!
//! Physics runs at 10 Hz, rendering at whatever the display manages. The
//! [`Interpolator`] bridges the two: between materialized samples it blends
//! linearly, past the newest one it extrapolates with the newest velocity
//! and spin rate. Extrapolation is always recomputed from the newest sample,
//! so a replay or correction that rewrites history resets it on the next
//! frame.

use crate::state::{SpinDirection, TrajectoryState};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

/// One materialized point of a ledger's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: u64,
    pub position: Vector2<f32>,
    pub velocity: Vector2<f32>,
    pub spin: f32,
    pub spin_direction: SpinDirection,
}

impl From<&TrajectoryState> for Sample {
    fn from(state: &TrajectoryState) -> Self {
        Self {
            time: state.time,
            position: state.position,
            velocity: state.velocity,
            spin: state.spin,
            spin_direction: state.spin_direction,
        }
    }
}

/// What a renderer draws for one entity on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSample {
    pub time: u64,
    pub position: Vector2<f32>,
    pub spin: f32,
}

impl From<&Sample> for RenderSample {
    fn from(sample: &Sample) -> Self {
        Self {
            time: sample.time,
            position: sample.position,
            spin: sample.spin,
        }
    }
}

/// Configuration for render-time sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    /// Extrapolation never runs further than this past the newest sample
    /// (default: 500 ms)
    pub max_extrapolation_ms: u64,

    /// Spin rate used when extrapolating heading (default: π rad/s)
    pub rotation_speed: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            max_extrapolation_ms: 500,
            rotation_speed: PI,
        }
    }
}

/// Derives smooth render samples from a sample history.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    config: InterpolationConfig,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Render sample at `query`.
    ///
    /// `samples` must be sorted by strictly increasing time. Queries before
    /// the oldest sample clamp to it; `None` only for an empty history.
    pub fn lerp(&self, samples: &VecDeque<Sample>, query: u64) -> Option<RenderSample> {
        let first = samples.front()?;
        let after = samples.partition_point(|s| s.time <= query);
        if after == 0 {
            return Some(RenderSample::from(first));
        }

        let prev = &samples[after - 1];
        if prev.time == query {
            return Some(RenderSample::from(prev));
        }

        match samples.get(after) {
            Some(next) => Some(Self::blend(prev, next, query)),
            None => Some(self.extrapolate(prev, query)),
        }
    }

    fn blend(prev: &Sample, next: &Sample, query: u64) -> RenderSample {
        let f = (query - prev.time) as f32 / (next.time - prev.time) as f32;
        let position = Vector2::new(
            prev.position.x + (next.position.x - prev.position.x) * f,
            prev.position.y + (next.position.y - prev.position.y) * f,
        );
        let arc = (next.spin - prev.spin + PI).rem_euclid(TAU) - PI;
        RenderSample {
            time: query,
            position,
            spin: (prev.spin + arc * f).rem_euclid(TAU),
        }
    }

    fn extrapolate(&self, last: &Sample, query: u64) -> RenderSample {
        let ahead = (query - last.time).min(self.config.max_extrapolation_ms);
        let dt = ahead as f32 / 1000.0;
        let spin = last.spin + last.spin_direction.signum() * self.config.rotation_speed * dt;
        RenderSample {
            time: query,
            position: Vector2::new(
                last.position.x + last.velocity.x * dt,
                last.position.y + last.velocity.y * dt,
            ),
            spin: spin.rem_euclid(TAU),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(time: u64, x: f32, vx: f32, spin: f32) -> Sample {
        Sample {
            time,
            position: Vector2::new(x, 0.0),
            velocity: Vector2::new(vx, 0.0),
            spin,
            spin_direction: SpinDirection::Stop,
        }
    }

    fn history() -> VecDeque<Sample> {
        VecDeque::from(vec![
            sample(100, 0.0, 10.0, 0.0),
            sample(200, 1.0, 10.0, 0.5),
            sample(300, 2.0, 10.0, 1.0),
        ])
    }

    #[test]
    fn test_exact_sample_is_returned_unchanged() {
        let samples = history();
        let rendered = Interpolator::default().lerp(&samples, 200).unwrap();
        assert_eq!(rendered, RenderSample::from(&samples[1]));
    }

    #[test]
    fn test_midpoint_blends() {
        let rendered = Interpolator::default().lerp(&history(), 250).unwrap();
        assert_relative_eq!(rendered.position.x, 1.5, epsilon = 1e-6);
        assert_relative_eq!(rendered.spin, 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_spin_blends_across_wrap() {
        let samples = VecDeque::from(vec![
            sample(0, 0.0, 0.0, TAU - 0.1),
            sample(100, 0.0, 0.0, 0.1),
        ]);
        let rendered = Interpolator::default().lerp(&samples, 50).unwrap();
        assert!(rendered.spin < 1e-4 || rendered.spin > TAU - 1e-4);
    }

    #[test]
    fn test_extrapolates_past_newest() {
        let rendered = Interpolator::default().lerp(&history(), 350).unwrap();
        assert_relative_eq!(rendered.position.x, 2.5, epsilon = 1e-5);
        assert_eq!(rendered.time, 350);
    }

    #[test]
    fn test_extrapolation_is_clamped() {
        let interpolator = Interpolator::new(InterpolationConfig {
            max_extrapolation_ms: 100,
            ..Default::default()
        });
        let rendered = interpolator.lerp(&history(), 10_000).unwrap();
        assert_relative_eq!(rendered.position.x, 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_extrapolated_spin_follows_direction() {
        let mut last = sample(0, 0.0, 0.0, 0.0);
        last.spin_direction = SpinDirection::Cw;
        let rendered = Interpolator::default()
            .lerp(&VecDeque::from(vec![last]), 500)
            .unwrap();
        assert_relative_eq!(rendered.spin, PI / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_query_before_history_clamps() {
        let rendered = Interpolator::default().lerp(&history(), 0).unwrap();
        assert_eq!(rendered.position.x, 0.0);
    }

    #[test]
    fn test_empty_history() {
        assert!(Interpolator::default().lerp(&VecDeque::new(), 10).is_none());
    }
}
