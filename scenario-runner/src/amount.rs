//! Amounts, actors and per-call options
//!
//! Plain value types shared by the collaborator traits, the scenario model and
//! the configuration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::error::{CallResult, ScenarioError};

/// Basis-point denominator (100% = 10_000 bps).
pub const MAX_BPS: u128 = 10_000;

// ============================================================================
// ASSET AMOUNT
// ============================================================================

/// Non-negative quantity of a fungible asset in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssetAmount(pub u128);

impl AssetAmount {
    pub const ZERO: AssetAmount = AssetAmount(0);

    /// Base-unit value
    pub fn raw(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: AssetAmount) -> AssetAmount {
        AssetAmount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: AssetAmount) -> AssetAmount {
        AssetAmount(self.0.saturating_sub(other.0))
    }

    /// Scales by `bps / 10_000`, rounding down.
    pub fn scale_bps(self, bps: u128) -> AssetAmount {
        AssetAmount(mul_div(self.0, bps, MAX_BPS))
    }

    /// Absolute difference
    pub fn abs_diff(self, other: AssetAmount) -> AssetAmount {
        AssetAmount(self.0.abs_diff(other.0))
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for AssetAmount {
    fn from(value: u128) -> Self {
        AssetAmount(value)
    }
}

impl From<u64> for AssetAmount {
    fn from(value: u64) -> Self {
        AssetAmount(u128::from(value))
    }
}

/// `a * b / c` without intermediate overflow for the magnitudes used in
/// token accounting (falls back to saturation beyond `u128`).
pub fn mul_div(a: u128, b: u128, c: u128) -> u128 {
    if c == 0 {
        return 0;
    }
    match a.checked_mul(b) {
        Some(product) => product / c,
        None => {
            // Split `a` to keep the product in range: a = q*c + r
            let q = a / c;
            let r = a % c;
            q.saturating_mul(b)
                .saturating_add(r.checked_mul(b).map(|v| v / c).unwrap_or(u128::MAX / c))
        }
    }
}

impl Serialize for AssetAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetAmount {
    /// Accepts a TOML/JSON integer or a decimal string (for values above `i64::MAX`).
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(AssetAmount(u128::from(v))),
            Raw::Str(s) => {
                let cleaned: String = s.chars().filter(|c| *c != '_').collect();
                cleaned
                    .parse::<u128>()
                    .map(AssetAmount)
                    .map_err(|e| serde::de::Error::custom(format!("invalid amount '{}': {}", s, e)))
            }
        }
    }
}

// ============================================================================
// ACTORS
// ============================================================================

/// Role an actor plays in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Vault depositor
    Depositor,
    /// Vault/strategy governance
    Governor,
    /// Strategy strategist
    Strategist,
    /// Harvest/tend keeper
    Keeper,
    /// Holder of a large want balance, used to airdrop profit
    Whale,
    /// Holder of a large pool LP balance, used to drain delta credit
    LpWhale,
    /// Owner of the bridge router (fee configuration)
    RouterOwner,
    /// The strategy contract itself, impersonated to simulate external loss
    StrategyAccount,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Depositor => "depositor",
            Role::Governor => "governor",
            Role::Strategist => "strategist",
            Role::Keeper => "keeper",
            Role::Whale => "whale",
            Role::LpWhale => "lp_whale",
            Role::RouterOwner => "router_owner",
            Role::StrategyAccount => "strategy_account",
        };
        f.write_str(name)
    }
}

/// A named capability to submit actions. Identity only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    pub role: Role,
    pub address: String,
}

impl Actor {
    pub fn new(role: Role, address: impl Into<String>) -> Self {
        Self {
            role,
            address: address.into().to_lowercase(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.role, self.address)
    }
}

/// Role-to-address mapping for one scenario run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorBook {
    actors: HashMap<Role, Actor>,
}

impl ActorBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, role: Role, address: impl Into<String>) -> Self {
        self.insert(role, address);
        self
    }

    pub fn insert(&mut self, role: Role, address: impl Into<String>) {
        self.actors.insert(role, Actor::new(role, address));
    }

    /// Looks up the actor for `role`; a missing role is a setup error.
    pub fn get(&self, role: Role) -> CallResult<&Actor> {
        self.actors
            .get(&role)
            .ok_or_else(|| ScenarioError::setup(format!("no actor configured for role {}", role)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }
}

/// Options attached to every state-mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOptions {
    /// Signing actor
    pub sender: Actor,
    /// Native value sent with the call
    pub value: AssetAmount,
}

impl TxOptions {
    /// Options for a call without native value.
    pub fn sent_by(sender: &Actor) -> Self {
        Self {
            sender: sender.clone(),
            value: AssetAmount::ZERO,
        }
    }

    pub fn with_value(mut self, value: AssetAmount) -> Self {
        self.value = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_bps_rounds_down() {
        assert_eq!(AssetAmount(1_000).scale_bps(300), AssetAmount(30));
        assert_eq!(AssetAmount(999).scale_bps(5_000), AssetAmount(499));
    }

    #[test]
    fn mul_div_survives_large_products() {
        let big = u128::MAX / 2;
        assert_eq!(mul_div(big, 10_000, 10_000), big);
    }

    #[test]
    fn deserializes_integer_and_string() {
        #[derive(Deserialize)]
        struct Holder {
            a: AssetAmount,
            b: AssetAmount,
        }
        let parsed: Holder = toml::from_str("a = 1000\nb = \"1_000_000_000_000_000_000_000\"").unwrap();
        assert_eq!(parsed.a, AssetAmount(1000));
        assert_eq!(parsed.b, AssetAmount(1_000_000_000_000_000_000_000));
    }
}
