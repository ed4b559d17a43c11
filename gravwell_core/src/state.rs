//! Materialized trajectory state and the closed set of changes that mutate it.

use crate::fingerprint::Fingerprint;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Rotation input of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpinDirection {
    Ccw,
    Stop,
    Cw,
}

impl SpinDirection {
    pub fn as_i8(self) -> i8 {
        match self {
            SpinDirection::Ccw => -1,
            SpinDirection::Stop => 0,
            SpinDirection::Cw => 1,
        }
    }

    pub fn signum(self) -> f32 {
        self.as_i8() as f32
    }
}

/// One discrete change to a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Change {
    RotCw,
    RotCcw,
    RotStop,
    PropOn,
    PropOff,
    Bullet { damage: u32 },
    Health { delta: i32 },
    AddBoost,
}

impl Change {
    /// Free changes a player may author for their own entity. Damage and
    /// healing only come from the authority; boosters are bought.
    pub fn is_player_input(&self) -> bool {
        matches!(
            self,
            Change::RotCw | Change::RotCcw | Change::RotStop | Change::PropOn | Change::PropOff
        )
    }
}

/// A change stamped with its authoring time and, when authored against a
/// known state, that state's fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change: Change,
    pub time: u64,
    pub predecessor: Option<Fingerprint>,
}

impl ChangeEvent {
    pub fn new(change: Change, time: u64, predecessor: Option<Fingerprint>) -> Self {
        Self {
            change,
            time,
            predecessor,
        }
    }
}

/// Kinematic snapshot of one entity at logical time `time` (ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryState {
    pub position: Vector2<f32>,
    pub velocity: Vector2<f32>,

    /// Heading in radians, kept in `[0, 2π)`.
    pub spin: f32,
    pub spin_direction: SpinDirection,
    pub propelling: bool,
    pub health: u32,

    /// Thrust multiplier; starts at 1, raised by speed-boost loot.
    pub boosters: u32,
    pub time: u64,
}

impl TrajectoryState {
    /// A fresh entity at rest.
    pub fn spawned(position: Vector2<f32>, time: u64, health: u32) -> Self {
        Self {
            position,
            velocity: Vector2::zeros(),
            spin: 0.0,
            spin_direction: SpinDirection::Stop,
            propelling: false,
            health,
            boosters: 1,
            time,
        }
    }

    pub fn with_velocity(mut self, velocity: Vector2<f32>) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_spin(mut self, spin: f32) -> Self {
        self.spin = spin;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.health == 0
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Applies `change` in place, clamping health into `[0, max_health]`.
    ///
    /// A terminal state is final: nothing applies to it any more.
    pub fn apply(&mut self, change: Change, max_health: u32) {
        if self.is_terminal() {
            return;
        }
        match change {
            Change::RotCw => self.spin_direction = SpinDirection::Cw,
            Change::RotCcw => self.spin_direction = SpinDirection::Ccw,
            Change::RotStop => self.spin_direction = SpinDirection::Stop,
            Change::PropOn => self.propelling = true,
            Change::PropOff => self.propelling = false,
            Change::Bullet { damage } => self.health = self.health.saturating_sub(damage),
            Change::Health { delta } => {
                let health = self.health as i64 + delta as i64;
                self.health = health.clamp(0, max_health as i64) as u32;
            }
            Change::AddBoost => self.boosters = self.boosters.saturating_add(1),
        }
    }
}
