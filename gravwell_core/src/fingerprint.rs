//! Compact state digests used as causal version tags.
//!
//! The digest is `xxh3_64` over a fixed little-endian byte layout of the
//! materialized state, so every peer computes the same value regardless of
//! platform endianness or the std hasher in use.

use crate::state::TrajectoryState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Bytes fed to the hash: flags, 5 floats, direction, boosters, health, time.
const LAYOUT_LEN: usize = 1 + 5 * 4 + 1 + 4 + 4 + 8;

/// Deterministic digest of a [`TrajectoryState`].
///
/// Serialized as a 16-digit hex string so JSON peers never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Digest of a materialized state.
    pub fn of(state: &TrajectoryState) -> Self {
        let mut bytes = [0u8; LAYOUT_LEN];
        let mut at = 0;
        let mut put = |chunk: &[u8]| {
            bytes[at..at + chunk.len()].copy_from_slice(chunk);
            at += chunk.len();
        };

        put(&[state.propelling as u8]);
        put(&state.position.x.to_bits().to_le_bytes());
        put(&state.position.y.to_bits().to_le_bytes());
        put(&state.velocity.x.to_bits().to_le_bytes());
        put(&state.velocity.y.to_bits().to_le_bytes());
        put(&state.spin.to_bits().to_le_bytes());
        put(&state.spin_direction.as_i8().to_le_bytes());
        put(&state.boosters.to_le_bytes());
        put(&state.health.to_le_bytes());
        put(&state.time.to_le_bytes());

        Fingerprint(xxh3_64(&bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Fingerprint)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn test_fingerprint_is_pure() {
        let state = TrajectoryState::spawned(Vector2::new(10.0, -4.0), 1_000, 255);
        assert_eq!(Fingerprint::of(&state), Fingerprint::of(&state.clone()));
    }

    #[test]
    fn test_fingerprint_sees_every_field() {
        let base = TrajectoryState::spawned(Vector2::new(10.0, -4.0), 1_000, 255);
        let digest = Fingerprint::of(&base);

        let mut moved = base.clone();
        moved.position.x += 0.001;
        assert_ne!(Fingerprint::of(&moved), digest);

        let mut later = base.clone();
        later.time += 100;
        assert_ne!(Fingerprint::of(&later), digest);

        let mut hurt = base.clone();
        hurt.health -= 1;
        assert_ne!(Fingerprint::of(&hurt), digest);

        let mut thrusting = base;
        thrusting.propelling = true;
        assert_ne!(Fingerprint::of(&thrusting), digest);
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fingerprint = Fingerprint(0x00ab_cdef_0123_4567);
        assert_eq!(fingerprint.to_string(), "00abcdef01234567");
        assert_eq!("00abcdef01234567".parse::<Fingerprint>().unwrap(), fingerprint);

        let json = serde_json::to_string(&fingerprint).unwrap();
        assert_eq!(json, "\"00abcdef01234567\"");
    }
}
