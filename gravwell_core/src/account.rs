//! Per-player cash and ammunition.
//!
//! Balances live beside the trajectory, not in it: they never move the
//! entity and take no part in its fingerprint. The authority keeps the
//! binding copy; a peer mirrors its own and resyncs it from `GameState`.

use crate::protocol::LootContent;
use crate::state::Change;
use serde::{Deserialize, Serialize};

/// Starting balances and shop prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Cash of a new player (default: 20)
    pub starting_cash: u32,

    /// Pistol rounds of a new player (default: 50)
    pub starting_ammo: u32,

    /// Price of one extra booster (default: 5)
    pub boost_price: u32,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            starting_cash: 20,
            starting_ammo: 50,
            boost_price: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub cash: u32,
    pub ammo: u32,
}

impl Account {
    pub fn new(config: &EconomyConfig) -> Self {
        Self {
            cash: config.starting_cash,
            ammo: config.starting_ammo,
        }
    }

    /// What a player pays to author `change` for their own entity.
    ///
    /// `None` for changes only the authority may stamp.
    pub fn price(change: Change, config: &EconomyConfig) -> Option<u32> {
        match change {
            Change::AddBoost => Some(config.boost_price),
            change if change.is_player_input() => Some(0),
            _ => None,
        }
    }

    pub fn can_afford(&self, change: Change, config: &EconomyConfig) -> bool {
        Self::price(change, config).is_some_and(|price| price <= self.cash)
    }

    /// Pays for `change`. Leaves the balance alone and returns false when
    /// the change is not for sale or too expensive.
    pub fn charge(&mut self, change: Change, config: &EconomyConfig) -> bool {
        match Self::price(change, config) {
            Some(price) if price <= self.cash => {
                self.cash -= price;
                true
            }
            _ => false,
        }
    }

    /// Spends one round; false when the magazine is empty.
    pub fn take_round(&mut self) -> bool {
        if self.ammo == 0 {
            return false;
        }
        self.ammo -= 1;
        true
    }

    /// Books cash and ammo loot. Other loot changes the trajectory instead.
    pub fn credit(&mut self, content: &LootContent) {
        match *content {
            LootContent::Cash(amount) => self.cash = self.cash.saturating_add(amount),
            LootContent::PistolAmmo(amount) => self.ammo = self.ammo.saturating_add(amount),
            LootContent::Health(_) | LootContent::SpeedBoost => {}
        }
    }
}
