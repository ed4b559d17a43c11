//! The static arena: gravity bodies inside a circular dome.
//!
//! Supplied once per session by the world provider and shared read-only by
//! every ledger through [`PhysicsIntegrator`](crate::physics::PhysicsIntegrator).

use nalgebra::Vector2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// A fixed point mass. Its radius doubles as the mass proxy (`r² · π`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GravityBody {
    pub id: u32,
    pub position: Vector2<f32>,
    pub radius: f32,
}

impl GravityBody {
    pub fn new(id: u32, x: f32, y: f32, radius: f32) -> Self {
        Self {
            id,
            position: Vector2::new(x, y),
            radius,
        }
    }

    pub fn mass(&self) -> f32 {
        self.radius * self.radius * PI
    }

    /// Gravitational acceleration this body exerts at `pos`.
    ///
    /// Zero at the body's exact center rather than NaN.
    pub fn pull(&self, pos: &Vector2<f32>, gravity_constant: f32) -> Vector2<f32> {
        let xdiff = self.position.x - pos.x;
        let ydiff = self.position.y - pos.y;
        let powsum = xdiff * xdiff + ydiff * ydiff;
        if powsum == 0.0 {
            return Vector2::zeros();
        }
        let mag = gravity_constant * self.mass() / powsum;
        let dist = powsum.sqrt();
        Vector2::new(mag * xdiff / dist, mag * ydiff / dist)
    }

    /// True when a circle of `entity_radius` at `pos` overlaps the body.
    pub fn collides(&self, pos: &Vector2<f32>, entity_radius: f32) -> bool {
        let reach = self.radius + entity_radius;
        let xdiff = pos.x - self.position.x;
        let ydiff = pos.y - self.position.y;
        reach * reach > xdiff * xdiff + ydiff * ydiff
    }
}

/// Circular boundary of the playable plane, centered on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomeBoundary {
    pub radius: f32,
}

impl DomeBoundary {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    pub fn contains(&self, pos: &Vector2<f32>) -> bool {
        pos.x * pos.x + pos.y * pos.y <= self.radius * self.radius
    }

    /// Projects `pos` onto the dome if it lies outside.
    pub fn clamp(&self, pos: Vector2<f32>) -> Vector2<f32> {
        if self.contains(&pos) {
            return pos;
        }
        let dist = (pos.x * pos.x + pos.y * pos.y).sqrt();
        Vector2::new(pos.x * self.radius / dist, pos.y * self.radius / dist)
    }
}

/// Bodies plus dome, immutable for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub bodies: Vec<GravityBody>,
    pub dome: DomeBoundary,
}

/// Radius of the standard arena.
pub const STANDARD_DOME_RADIUS: f32 = 6000.0;

const STANDARD_BODIES: [(f32, f32, f32); 25] = [
    (-2142.0, 1319.0, 82.0),
    (593.0, 1712.0, 85.0),
    (1630.0, 4858.0, 79.0),
    (1123.0, -4422.0, 142.0),
    (-4643.0, 2987.0, 132.0),
    (4568.0, 271.0, 93.0),
    (2702.0, -553.0, 116.0),
    (-479.0, 985.0, 129.0),
    (-1510.0, -2840.0, 119.0),
    (3043.0, 3680.0, 109.0),
    (-3052.0, 2069.0, 120.0),
    (4800.0, 4797.0, 132.0),
    (-2845.0, 1859.0, 118.0),
    (-1327.0, 4248.0, 147.0),
    (2427.0, 4087.0, 69.0),
    (4132.0, -3446.0, 103.0),
    (-1985.0, -1525.0, 118.0),
    (3460.0, -1882.0, 57.0),
    (1018.0, -1342.0, 134.0),
    (71.0, 2422.0, 145.0),
    (2966.0, 835.0, 77.0),
    (4558.0, -2721.0, 59.0),
    (-3210.0, 1010.0, 93.0),
    (256.0, 3800.0, 57.0),
    (1981.0, 3697.0, 108.0),
];

impl World {
    pub fn new(bodies: Vec<GravityBody>, dome_radius: f32) -> Self {
        Self {
            bodies,
            dome: DomeBoundary::new(dome_radius),
        }
    }

    /// An arena without bodies.
    pub fn empty(dome_radius: f32) -> Self {
        Self::new(Vec::new(), dome_radius)
    }

    /// The stock 25-body arena.
    pub fn standard() -> Self {
        let bodies = STANDARD_BODIES
            .iter()
            .enumerate()
            .map(|(id, &(x, y, radius))| GravityBody::new(id as u32, x, y, radius))
            .collect();
        Self::new(bodies, STANDARD_DOME_RADIUS)
    }

    /// Summed acceleration of every body at `pos`, in body order.
    pub fn pull_at(&self, pos: &Vector2<f32>, gravity_constant: f32) -> Vector2<f32> {
        let mut pull = Vector2::zeros();
        for body in &self.bodies {
            let body_pull = body.pull(pos, gravity_constant);
            pull.x += body_pull.x;
            pull.y += body_pull.y;
        }
        pull
    }

    pub fn collides(&self, pos: &Vector2<f32>, entity_radius: f32) -> bool {
        self.bodies.iter().any(|body| body.collides(pos, entity_radius))
    }

    /// Draws a spawn point: normally distributed around a quarter of the dome
    /// radius, rejecting points outside the dome, inside a body, or where the
    /// summed pull exceeds `max_pull`.
    ///
    /// Gives up after `attempts` draws and returns the origin.
    pub fn spawn_point<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        gravity_constant: f32,
        max_pull: f32,
        entity_radius: f32,
        attempts: usize,
    ) -> Vector2<f32> {
        let spread = self.dome.radius / 4.0;
        let normal = match Normal::new(spread, spread) {
            Ok(normal) => normal,
            Err(_) => return Vector2::zeros(),
        };

        for _ in 0..attempts {
            let pos = Vector2::new(normal.sample(rng), normal.sample(rng));
            let pull = self.pull_at(&pos, gravity_constant);
            if pull.norm_squared() < max_pull * max_pull
                && self.dome.contains(&pos)
                && !self.collides(&pos, entity_radius)
            {
                return pos;
            }
        }
        Vector2::zeros()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::standard()
    }
}
