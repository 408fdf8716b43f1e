//! Configuration Management Module
//!
//! Loads the runner configuration: the forked network to talk to, the
//! contracts and actors under test, scenario parameters, per-asset redeem
//! routes, and seed values for the simulated backend.

use chain_clients_evm::Impersonation;
use serde::Deserialize;

use crate::amount::{ActorBook, Role};
use crate::protocol::evm::KnownContracts;
use crate::protocol::sim::{default_sim_addresses, SimParams};
use crate::protocol::{ProtocolAddresses, RedeemRoute};
use crate::scenario::catalog::ScenarioParams;

/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "SCENARIO_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/scenarios.toml";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Forked network connection
    pub network: NetworkConfig,
    /// Contracts under test
    pub contracts: ContractsConfig,
    /// Accounts playing each role
    pub actors: ActorsConfig,
    /// Catalog parameters
    #[serde(default)]
    pub scenario: ScenarioParams,
    /// Per-asset settings (use [[asset]] in TOML)
    #[serde(rename = "asset", default)]
    pub assets: Vec<AssetProfile>,
    /// Seed values for `--backend sim`
    #[serde(default)]
    pub simulation: SimParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Human-readable name for the fork
    pub name: String,
    /// RPC endpoint of the dev node (e.g., "http://127.0.0.1:8545")
    pub rpc_url: String,
    /// Chain ID of the forked network
    pub chain_id: u64,
    /// Dev-node flavour used to impersonate actors
    #[serde(default = "default_impersonation")]
    pub impersonation: Impersonation,
    /// How long to wait for a transaction to be mined
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
}

fn default_impersonation() -> Impersonation {
    Impersonation::Anvil
}

fn default_receipt_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    pub vault: String,
    pub strategy: String,
    /// Underlying asset of the vault; selects the [[asset]] entry
    pub want: String,
    #[serde(default)]
    pub reward_token: Option<String>,
    #[serde(default)]
    pub trade_factory: Option<String>,
    /// Only used by the simulated backend; the EVM backend asks the strategy
    #[serde(default)]
    pub liquidity_pool: Option<String>,
    #[serde(default)]
    pub router: Option<String>,
    #[serde(default)]
    pub lp_staker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorsConfig {
    pub depositor: String,
    pub governor: String,
    pub strategist: String,
    pub keeper: String,
    /// Holder of a large want balance
    pub whale: String,
    /// Holder of a large LP balance
    pub lp_whale: String,
    /// Owner of the bridge router
    pub router_owner: String,
}

/// Asset-specific settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetProfile {
    /// Human-readable name (e.g., "USDC")
    pub name: String,
    /// Token address; matched against `contracts.want`
    pub want: String,
    pub decimals: u32,
    /// Destination used by cross-chain redemption
    #[serde(default)]
    pub redeem_route: Option<RedeemRoute>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// The path is `path` if given, else `SCENARIO_CONFIG_PATH`, else
    /// `config/scenarios.toml`. A missing file yields an error asking the user
    /// to copy the template.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to config file
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(anyhow::Error)` - File missing, unparsable, or invalid
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if !std::path::Path::new(&config_path).exists() {
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/scenarios.template.toml config/scenarios.toml\n\
                Then edit config/scenarios.toml with your actual values.",
                config_path
            ));
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", config_path, e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration in {}: {:#}", config_path, e))?;
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency.
    ///
    /// Checks:
    /// - Every contract and actor address is 20-byte hex
    /// - The deposit amount is positive and the tolerance non-negative
    /// - Asset entries have unique addresses
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.rpc_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Configuration error: network.rpc_url is empty"));
        }

        let contracts = [
            ("contracts.vault", Some(&self.contracts.vault)),
            ("contracts.strategy", Some(&self.contracts.strategy)),
            ("contracts.want", Some(&self.contracts.want)),
            ("contracts.reward_token", self.contracts.reward_token.as_ref()),
            ("contracts.trade_factory", self.contracts.trade_factory.as_ref()),
            ("contracts.liquidity_pool", self.contracts.liquidity_pool.as_ref()),
            ("contracts.router", self.contracts.router.as_ref()),
            ("contracts.lp_staker", self.contracts.lp_staker.as_ref()),
        ];
        for (field, address) in contracts {
            if let Some(address) = address {
                validate_evm_address(address).map_err(|e| anyhow::anyhow!("Configuration error: {}: {}", field, e))?;
            }
        }
        for actor in self.actor_book().iter() {
            validate_evm_address(&actor.address)
                .map_err(|e| anyhow::anyhow!("Configuration error: actors.{}: {}", actor.role, e))?;
        }

        if self.scenario.amount.is_zero() {
            return Err(anyhow::anyhow!("Configuration error: scenario.amount must be positive"));
        }
        let tolerance = self.scenario.relative_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(anyhow::anyhow!(
                "Configuration error: scenario.relative_tolerance must be non-negative, got {}",
                tolerance
            ));
        }

        for (i, asset) in self.assets.iter().enumerate() {
            validate_evm_address(&asset.want)
                .map_err(|e| anyhow::anyhow!("Configuration error: asset '{}': {}", asset.name, e))?;
            if self.assets[i + 1..]
                .iter()
                .any(|other| other.want.eq_ignore_ascii_case(&asset.want))
            {
                return Err(anyhow::anyhow!(
                    "Configuration error: asset {} is listed more than once",
                    asset.want
                ));
            }
        }

        Ok(())
    }

    /// Asset entry matching `contracts.want`, if any.
    pub fn asset_profile(&self) -> Option<&AssetProfile> {
        self.assets
            .iter()
            .find(|a| a.want.eq_ignore_ascii_case(&self.contracts.want))
    }

    /// Actor book with every configured role, plus the strategy itself.
    pub fn actor_book(&self) -> ActorBook {
        let a = &self.actors;
        ActorBook::new()
            .with(Role::Depositor, &a.depositor)
            .with(Role::Governor, &a.governor)
            .with(Role::Strategist, &a.strategist)
            .with(Role::Keeper, &a.keeper)
            .with(Role::Whale, &a.whale)
            .with(Role::LpWhale, &a.lp_whale)
            .with(Role::RouterOwner, &a.router_owner)
            .with(Role::StrategyAccount, &self.contracts.strategy)
    }

    /// Catalog parameters with the redeem route of the configured asset.
    /// The reward dust check is dropped when no reward token is configured.
    pub fn scenario_params(&self) -> ScenarioParams {
        let mut params = self.scenario.clone();
        params.redeem_route = self.asset_profile().and_then(|a| a.redeem_route);
        if self.contracts.reward_token.is_none() {
            params.reward_dust = None;
        }
        params
    }

    pub fn known_contracts(&self) -> KnownContracts {
        KnownContracts {
            vault: self.contracts.vault.clone(),
            strategy: self.contracts.strategy.clone(),
            want: self.contracts.want.clone(),
            reward_token: self.contracts.reward_token.clone(),
            trade_factory: self.contracts.trade_factory.clone(),
        }
    }

    /// Addresses for the simulated backend; unset pool contracts get placeholders.
    pub fn sim_addresses(&self) -> ProtocolAddresses {
        let defaults = default_sim_addresses();
        let c = &self.contracts;
        ProtocolAddresses {
            vault: c.vault.clone(),
            strategy: c.strategy.clone(),
            want: c.want.clone(),
            liquidity_pool: c.liquidity_pool.clone().unwrap_or(defaults.liquidity_pool),
            router: c.router.clone().unwrap_or(defaults.router),
            lp_staker: c.lp_staker.clone().unwrap_or(defaults.lp_staker),
            reward_token: c.reward_token.clone(),
            trade_factory: c.trade_factory.clone(),
        }
    }

    /// Simulation seed values, aligned with the asset's decimals and route.
    pub fn sim_params(&self) -> SimParams {
        let mut params = self.simulation.clone();
        if let Some(asset) = self.asset_profile() {
            params.decimals = asset.decimals;
            if let Some(route) = asset.redeem_route {
                if !params.routes.contains(&route) {
                    params.routes.push(route);
                }
            }
        }
        params
    }
}

/// Checks for a `0x`-prefixed 20-byte hex address.
fn validate_evm_address(address: &str) -> anyhow::Result<()> {
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("address '{}' must start with 0x", address))?;
    if hex_part.len() != 40 {
        return Err(anyhow::anyhow!(
            "address '{}' must have 40 hex characters, got {}",
            address,
            hex_part.len()
        ));
    }
    hex::decode(hex_part).map_err(|e| anyhow::anyhow!("address '{}' is not hex: {}", address, e))?;
    Ok(())
}
