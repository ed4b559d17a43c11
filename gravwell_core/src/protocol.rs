//! Wire messages between peers and the authority.
//!
//! Messages are adjacently tagged JSON: `{"t": "<kind>", "c": <body>}`.
//! Fingerprints travel as 16-digit hex strings.

use crate::account::Account;
use crate::error::ProtocolError;
use crate::fingerprint::Fingerprint;
use crate::registry::EntityId;
use crate::state::{Change, TrajectoryState};
use nalgebra::Vector2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a loot object lying in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LootId(pub Uuid);

impl fmt::Display for LootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LootContent {
    Cash(u32),
    PistolAmmo(u32),
    Health(u32),
    SpeedBoost,
}

impl LootContent {
    /// The trajectory change that collecting this loot applies, if any.
    /// Cash and ammo only touch the collector's account.
    pub fn change(&self) -> Option<Change> {
        match *self {
            LootContent::Health(amount) => Some(Change::Health {
                delta: i32::try_from(amount).unwrap_or(i32::MAX),
            }),
            LootContent::SpeedBoost => Some(Change::AddBoost),
            LootContent::Cash(_) | LootContent::PistolAmmo(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootDrop {
    pub id: LootId,
    pub position: Vector2<f32>,
    pub content: LootContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: EntityId,
    pub trajectory: TrajectoryState,
}

/// The target a shooter claims to have hit, as the shooter saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Victim {
    pub id: EntityId,
    pub at: Fingerprint,
    pub time: u64,
}

/// A shot as declared by the shooter: its own state and, if it saw a hit,
/// the victim's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShootInfo {
    pub at: Fingerprint,
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victim: Option<Victim>,
}

/// A hit confirmed by the authority. `time` is where the damage lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub victim: EntityId,
    pub damage: u32,
    pub time: u64,
}

/// Authority → peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "c")]
pub enum ServerMessage {
    Pong {
        sent_at: u64,
        time: u64,
    },
    PlayerJoin(PlayerSnapshot),
    PlayerLeave(EntityId),
    GameState {
        players: Vec<PlayerSnapshot>,
        loot: Vec<LootDrop>,
        /// The requesting player's own balances
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<Account>,
    },
    TrajectoryUpdate {
        change: Change,
        at: Fingerprint,
        time: u64,
        from: EntityId,
    },
    Shoot {
        shooter: EntityId,
        info: ShootInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hit: Option<Hit>,
    },
    PlayerDeath {
        from: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loot: Option<LootDrop>,
    },
    LootCollected {
        loot_id: LootId,
        collector: EntityId,
        content: LootContent,
        time: u64,
    },
    Correct {
        id: EntityId,
        trajectory: TrajectoryState,
    },
    LootReject(LootId),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Pong { .. } => "Pong",
            ServerMessage::PlayerJoin(_) => "PlayerJoin",
            ServerMessage::PlayerLeave(_) => "PlayerLeave",
            ServerMessage::GameState { .. } => "GameState",
            ServerMessage::TrajectoryUpdate { .. } => "TrajectoryUpdate",
            ServerMessage::Shoot { .. } => "Shoot",
            ServerMessage::PlayerDeath { .. } => "PlayerDeath",
            ServerMessage::LootCollected { .. } => "LootCollected",
            ServerMessage::Correct { .. } => "Correct",
            ServerMessage::LootReject(_) => "LootReject",
        }
    }
}

/// Peer → authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "c")]
pub enum ClientMessage {
    Ping { sent_at: u64 },
    TrajectoryUpdate {
        change: Change,
        at: Fingerprint,
        time: u64,
    },
    Shoot(ShootInfo),
    /// Request the authoritative trajectory of an entity.
    Correct(EntityId),
    ClaimLoot { loot_id: LootId },
    StateQuery,
    Spawn,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Ping { .. } => "Ping",
            ClientMessage::TrajectoryUpdate { .. } => "TrajectoryUpdate",
            ClientMessage::Shoot(_) => "Shoot",
            ClientMessage::Correct(_) => "Correct",
            ClientMessage::ClaimLoot { .. } => "ClaimLoot",
            ClientMessage::StateQuery => "StateQuery",
            ClientMessage::Spawn => "Spawn",
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_tagging() {
        let ping = encode(&ClientMessage::Ping { sent_at: 5 }).unwrap();
        assert_eq!(String::from_utf8(ping).unwrap(), r#"{"t":"Ping","c":{"sent_at":5}}"#);

        let query = encode(&ClientMessage::StateQuery).unwrap();
        assert_eq!(String::from_utf8(query).unwrap(), r#"{"t":"StateQuery"}"#);
    }

    #[test]
    fn test_fingerprint_travels_as_hex() {
        let update = ClientMessage::TrajectoryUpdate {
            change: Change::PropOn,
            at: Fingerprint(0xff),
            time: 1_200,
        };
        let json = String::from_utf8(encode(&update).unwrap()).unwrap();

        assert!(json.contains(r#""at":"00000000000000ff""#), "{}", json);
        assert_eq!(decode::<ClientMessage>(json.as_bytes()).unwrap(), update);
    }

    #[test]
    fn test_correct_carries_full_trajectory() {
        let trajectory = TrajectoryState::spawned(Vector2::new(12.5, -3.25), 4_000, 180)
            .with_velocity(Vector2::new(1.5, 2.0))
            .with_spin(1.25);
        let message = ServerMessage::Correct {
            id: EntityId(42),
            trajectory: trajectory.clone(),
        };

        let decoded: ServerMessage = decode(&encode(&message).unwrap()).unwrap();

        match decoded {
            ServerMessage::Correct { id, trajectory: received } => {
                assert_eq!(id, EntityId(42));
                assert_eq!(received.fingerprint(), trajectory.fingerprint());
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_shot_without_victim_omits_field() {
        let info = ShootInfo {
            at: Fingerprint(1),
            time: 300,
            victim: None,
        };
        let json = String::from_utf8(encode(&ClientMessage::Shoot(info)).unwrap()).unwrap();
        assert!(!json.contains("victim"));
    }

    #[test]
    fn test_loot_content_changes() {
        assert_eq!(LootContent::Health(30).change(), Some(Change::Health { delta: 30 }));
        assert_eq!(LootContent::SpeedBoost.change(), Some(Change::AddBoost));
        assert_eq!(LootContent::Cash(10).change(), None);
        assert_eq!(LootContent::PistolAmmo(15).change(), None);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode::<ServerMessage>(b"{\"t\":\"Nope\"}");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
