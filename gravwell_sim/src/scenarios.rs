//! Chaos engineering scenarios for DST.

use crate::agent::BotProfile;
use crate::network::LinkProfile;
use crate::world::SimConfig;
use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// DST-001: Friendly link, casual bots
    Calm,

    /// DST-002: Heavy jitter, packets routinely overtake each other
    Reorder,

    /// DST-003: One packet in five never arrives
    PacketLoss,

    /// DST-004: Peers' local clocks are seconds off
    ClockSkew,

    /// DST-005: Trigger-happy bots, deaths, loot and respawns
    Dogfight,

    /// DST-006: One peer is cut off mid-run and comes back
    Partition,

    /// DST-007: Six times longer with mild loss, exercises history pruning
    LongHaul,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Calm,
            ScenarioId::Reorder,
            ScenarioId::PacketLoss,
            ScenarioId::ClockSkew,
            ScenarioId::Dogfight,
            ScenarioId::Partition,
            ScenarioId::LongHaul,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Calm => "calm",
            ScenarioId::Reorder => "reorder",
            ScenarioId::PacketLoss => "packet_loss",
            ScenarioId::ClockSkew => "clock_skew",
            ScenarioId::Dogfight => "dogfight",
            ScenarioId::Partition => "partition",
            ScenarioId::LongHaul => "long_haul",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Calm => "40ms links with 5ms jitter, casual bots",
            ScenarioId::Reorder => "80ms links with 60ms jitter, constant reordering",
            ScenarioId::PacketLoss => "20% packet loss, recovery through corrections and resync",
            ScenarioId::ClockSkew => "local clocks up to 5s ahead, authority time from ping/pong",
            ScenarioId::Dogfight => "aggressive bots: hits, deaths, loot drops and respawns",
            ScenarioId::Partition => "peer 0 offline for the middle third of the run",
            ScenarioId::LongHaul => "6x duration with 5% loss, history pruned many times over",
        }
    }

    /// Applies the scenario's link, clock and bot settings.
    pub fn configure(&self, config: SimConfig) -> SimConfig {
        match self {
            ScenarioId::Calm => config,
            ScenarioId::Reorder => SimConfig {
                link: LinkProfile::default().with_latency(80).with_jitter(60.0),
                ..config
            },
            ScenarioId::PacketLoss => SimConfig {
                link: LinkProfile::default().with_latency(60).with_jitter(20.0).with_loss(0.2),
                ..config
            },
            ScenarioId::ClockSkew => SimConfig {
                link: LinkProfile::default().with_latency(60).with_jitter(10.0),
                max_clock_skew_ms: 5_000,
                ..config
            },
            ScenarioId::Dogfight => SimConfig {
                bot: BotProfile::aggressive(),
                ..config
            },
            ScenarioId::Partition => config,
            ScenarioId::LongHaul => SimConfig {
                link: LinkProfile::default().with_latency(50).with_jitter(20.0).with_loss(0.05),
                ..config
            },
        }
    }

    /// How much longer than the requested duration the scenario runs.
    pub fn duration_factor(&self) -> f64 {
        match self {
            ScenarioId::LongHaul => 6.0,
            _ => 1.0,
        }
    }

    /// Fraction of the run during which peer 0 is cut off, if any.
    pub fn isolation_window(&self) -> Option<(f64, f64)> {
        match self {
            ScenarioId::Partition => Some((1.0 / 3.0, 2.0 / 3.0)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "calm" | "dst-001" => Ok(ScenarioId::Calm),
            "reorder" | "dst-002" => Ok(ScenarioId::Reorder),
            "packet_loss" | "packetloss" | "dst-003" => Ok(ScenarioId::PacketLoss),
            "clock_skew" | "clockskew" | "dst-004" => Ok(ScenarioId::ClockSkew),
            "dogfight" | "dst-005" => Ok(ScenarioId::Dogfight),
            "partition" | "dst-006" => Ok(ScenarioId::Partition),
            "long_haul" | "longhaul" | "dst-007" => Ok(ScenarioId::LongHaul),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("DST-005".parse::<ScenarioId>(), Ok(ScenarioId::Dogfight));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_configure_only_touches_its_knobs() {
        let base = SimConfig {
            seed: 9,
            num_peers: 7,
            ..SimConfig::default()
        };

        let skewed = ScenarioId::ClockSkew.configure(base.clone());
        assert_eq!(skewed.max_clock_skew_ms, 5_000);
        assert_eq!(skewed.seed, 9);
        assert_eq!(skewed.num_peers, 7);

        let lossy = ScenarioId::PacketLoss.configure(base);
        assert_eq!(lossy.link.loss_rate, 0.2);
    }
}
