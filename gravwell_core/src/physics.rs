//! Fixed-step kinematic integrator.
//!
//! Every peer replays the same event history through this stepper, so the
//! order of floating point operations below is part of the contract:
//!
//! ```text
//! 1. dead entities do not step
//! 2. next = pos + vel·Δt
//!    |next| > R  → vel reflected about the radial normal at pos, ×restitution,
//!                  pos clamped onto the dome
//!    otherwise   → pos = next
//! 3. vel += Σ pull(pos) · Δt              (body order)
//! 4. spin = (spin + dir·ω·Δt) mod 2π
//! 5. propelling → vel += heading(spin) · thrust · Δt · boosters
//! 6. time += Δt
//! 7. overlapping a body → health = 0
//! ```
//!
//! All arithmetic is f32 and component-wise. Builds sharing one `libm`
//! agree bit-for-bit; across differing `sin`/`cos`/`sqrt` implementations
//! states agree to within 1e-3 world units per step.

use crate::state::TrajectoryState;
use crate::world::World;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// Tunable constants of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Fixed step length in milliseconds (default: 100, i.e. 10 Hz)
    pub timestep_ms: u64,

    /// Gravitational constant `G` (default: 2000)
    pub gravity_constant: f32,

    /// Thrust acceleration per booster (default: 200)
    pub thrust: f32,

    /// Rotation speed in rad/s (default: π)
    pub rotation_speed: f32,

    /// Fraction of speed kept after bouncing off the dome (default: 0.5)
    pub restitution: f32,

    /// Collision radius of an entity (default: 25)
    pub entity_radius: f32,

    /// Maximum hit-scan distance (default: 500)
    pub weapon_range: f32,

    /// Damage of one hit (default: 25)
    pub weapon_damage: u32,

    /// Health of a fresh entity and the clamp ceiling (default: 255)
    pub max_health: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            timestep_ms: 100,
            gravity_constant: 2000.0,
            thrust: 200.0,
            rotation_speed: PI,
            restitution: 0.5,
            entity_radius: 25.0,
            weapon_range: 500.0,
            weapon_damage: 25,
            max_health: 255,
        }
    }
}

impl PhysicsConfig {
    pub fn timestep_secs(&self) -> f32 {
        self.timestep_ms as f32 / 1000.0
    }
}

/// Unit vector the entity faces (and thrusts along) for a given spin.
///
/// Spin 0 faces `-y`; positive spin turns clockwise on a y-down screen.
pub fn heading(spin: f32) -> Vector2<f32> {
    Vector2::new(spin.sin(), -spin.cos())
}

/// Steps trajectory states through a fixed world.
#[derive(Debug, Clone)]
pub struct PhysicsIntegrator {
    world: World,
    config: PhysicsConfig,
}

impl PhysicsIntegrator {
    pub fn new(world: World, config: PhysicsConfig) -> Self {
        Self { world, config }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn timestep_ms(&self) -> u64 {
        self.config.timestep_ms
    }

    /// Advances `state` by exactly one fixed step.
    ///
    /// Returns false (and leaves the state untouched) for a dead entity.
    pub fn step(&self, state: &mut TrajectoryState) -> bool {
        if state.is_terminal() {
            return false;
        }
        let dt = self.config.timestep_secs();

        let next = Vector2::new(
            state.position.x + state.velocity.x * dt,
            state.position.y + state.velocity.y * dt,
        );
        if self.world.dome.contains(&next) {
            state.position = next;
        } else {
            state.velocity = self.bounce(state.velocity, &state.position, &next);
            state.position = self.world.dome.clamp(state.position);
        }

        let pull = self.world.pull_at(&state.position, self.config.gravity_constant);
        state.velocity.x += pull.x * dt;
        state.velocity.y += pull.y * dt;

        let turn = state.spin_direction.signum() * self.config.rotation_speed * dt;
        state.spin = (state.spin + turn).rem_euclid(TAU);

        if state.propelling {
            let magnitude = self.config.thrust * dt * state.boosters as f32;
            let facing = heading(state.spin);
            state.velocity.x += facing.x * magnitude;
            state.velocity.y += facing.y * magnitude;
        }

        state.time += self.config.timestep_ms;

        if self.world.collides(&state.position, self.config.entity_radius) {
            state.health = 0;
        }
        true
    }

    /// Number of whole steps between `from` and `to`.
    pub fn steps_between(&self, from: u64, to: u64) -> u64 {
        to.saturating_sub(from) / self.config.timestep_ms
    }

    fn bounce(&self, velocity: Vector2<f32>, pos: &Vector2<f32>, next: &Vector2<f32>) -> Vector2<f32> {
        // The radial normal is undefined at the origin; fall back to the
        // direction of travel.
        let radial = if pos.x == 0.0 && pos.y == 0.0 { next } else { pos };
        let len = (radial.x * radial.x + radial.y * radial.y).sqrt();
        let nx = radial.x / len;
        let ny = radial.y / len;

        let dot = velocity.x * nx + velocity.y * ny;
        Vector2::new(
            (velocity.x - 2.0 * dot * nx) * self.config.restitution,
            (velocity.y - 2.0 * dot * ny) * self.config.restitution,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::GravityBody;
    use approx::assert_relative_eq;

    fn empty_integrator() -> PhysicsIntegrator {
        PhysicsIntegrator::new(World::empty(6000.0), PhysicsConfig::default())
    }

    #[test]
    fn test_single_body_pulls_toward_it() {
        let world = World::new(vec![GravityBody::new(0, 1000.0, 0.0, 50.0)], 6000.0);
        let integrator = PhysicsIntegrator::new(world, PhysicsConfig::default());
        let mut state = TrajectoryState::spawned(Vector2::zeros(), 0, 255);

        assert!(integrator.step(&mut state));

        assert!(state.velocity.x > 0.0);
        assert_relative_eq!(state.velocity.y, 0.0);
        assert_eq!(state.time, 100);
    }

    #[test]
    fn test_coasting_moves_by_velocity() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::zeros(), 0, 255)
            .with_velocity(Vector2::new(10.0, -20.0));

        integrator.step(&mut state);

        assert_relative_eq!(state.position.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(state.position.y, -2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_boundary_reflection_halves_speed() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::new(6000.0, 0.0), 0, 255)
            .with_velocity(Vector2::new(100.0, 0.0));

        integrator.step(&mut state);

        assert_relative_eq!(state.velocity.norm(), 50.0, epsilon = 1e-4);
        assert!(state.velocity.x < 0.0);
        assert!(state.position.norm() <= 6000.0 + 1e-3);
    }

    #[test]
    fn test_position_outside_dome_is_clamped() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::new(0.0, 6100.0), 0, 255)
            .with_velocity(Vector2::new(0.0, 10.0));

        integrator.step(&mut state);

        assert!(state.position.norm() <= 6000.0 + 1e-2);
    }

    #[test]
    fn test_rotation_wraps() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::zeros(), 0, 255);
        state.apply(crate::state::Change::RotCcw, 255);

        integrator.step(&mut state);

        assert_relative_eq!(state.spin, TAU - PI / 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_thrust_follows_heading() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::zeros(), 0, 255);
        state.propelling = true;

        integrator.step(&mut state);

        // Spin 0 faces -y; 200 · 0.1 · 1 booster
        assert_relative_eq!(state.velocity.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(state.velocity.y, -20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_boosters_scale_thrust() {
        let integrator = empty_integrator();
        let mut state = TrajectoryState::spawned(Vector2::zeros(), 0, 255);
        state.propelling = true;
        state.boosters = 3;

        integrator.step(&mut state);

        assert_relative_eq!(state.velocity.y, -60.0, epsilon = 1e-3);
    }

    #[test]
    fn test_body_collision_kills() {
        let world = World::new(vec![GravityBody::new(0, 100.0, 0.0, 50.0)], 6000.0);
        let integrator = PhysicsIntegrator::new(world, PhysicsConfig::default());
        let mut state = TrajectoryState::spawned(Vector2::new(30.0, 0.0), 0, 255);

        assert!(integrator.step(&mut state));
        assert_eq!(state.health, 0);
        assert!(!integrator.step(&mut state));
        assert_eq!(state.time, 100);
    }

    #[test]
    fn test_heading_is_unit() {
        for spin in [0.0, 0.7, PI, 5.9] {
            assert_relative_eq!(heading(spin).norm(), 1.0, epsilon = 1e-6);
        }
    }
}
