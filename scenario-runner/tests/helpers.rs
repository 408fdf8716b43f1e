//! Shared test helpers for scenario runner tests
//!
//! This module provides constants and helper functions used by the scenario runner tests.

#![allow(dead_code)]

use scenario_runner::protocol::sim::default_sim_addresses;
use scenario_runner::{ActorBook, Config, RedeemRoute, Role, ScenarioParams, SimParams, SimulatedProtocol};

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- ACTORS --------------------------------

/// Dummy depositor address (EVM format, 40 hex characters)
pub const DUMMY_DEPOSITOR_ADDR: &str = "0x0000000000000000000000000000000000000d01";

/// Dummy governor address (EVM format, 40 hex characters)
pub const DUMMY_GOVERNOR_ADDR: &str = "0x0000000000000000000000000000000000000d02";

/// Dummy strategist address (EVM format, 40 hex characters)
pub const DUMMY_STRATEGIST_ADDR: &str = "0x0000000000000000000000000000000000000d03";

/// Dummy keeper address (EVM format, 40 hex characters)
pub const DUMMY_KEEPER_ADDR: &str = "0x0000000000000000000000000000000000000d04";

/// Dummy want whale address (EVM format, 40 hex characters)
pub const DUMMY_WHALE_ADDR: &str = "0x0000000000000000000000000000000000000d05";

/// Dummy LP whale address (EVM format, 40 hex characters)
pub const DUMMY_LP_WHALE_ADDR: &str = "0x0000000000000000000000000000000000000d06";

/// Dummy router owner address (EVM format, 40 hex characters)
pub const DUMMY_ROUTER_OWNER_ADDR: &str = "0x0000000000000000000000000000000000000d07";

// ------------------------------ CONTRACTS -------------------------------

/// Dummy vault address (EVM format, 40 hex characters)
pub const DUMMY_VAULT_ADDR: &str = "0x00000000000000000000000000000000000000a1";

/// Dummy strategy address (EVM format, 40 hex characters)
pub const DUMMY_STRATEGY_ADDR: &str = "0x00000000000000000000000000000000000000a2";

/// Dummy want token address (EVM format, 40 hex characters)
pub const DUMMY_WANT_ADDR: &str = "0x00000000000000000000000000000000000000a3";

/// Dummy liquidity pool address (EVM format, 40 hex characters)
pub const DUMMY_POOL_ADDR: &str = "0x00000000000000000000000000000000000000a4";

/// Dummy router address (EVM format, 40 hex characters)
pub const DUMMY_ROUTER_ADDR: &str = "0x00000000000000000000000000000000000000a5";

/// Dummy LP staker address (EVM format, 40 hex characters)
pub const DUMMY_STAKER_ADDR: &str = "0x00000000000000000000000000000000000000a6";

/// Dummy reward token address (EVM format, 40 hex characters)
pub const DUMMY_REWARD_ADDR: &str = "0x00000000000000000000000000000000000000a7";

/// Dummy trade factory address (EVM format, 40 hex characters)
pub const DUMMY_TRADE_FACTORY_ADDR: &str = "0x00000000000000000000000000000000000000a8";

// -------------------------------- OTHER ---------------------------------

/// Default deposit used by the catalog (1,000 units of a 6-decimal token)
pub const DUMMY_AMOUNT: u128 = 1_000_000_000;

/// Redeem route accepted by the default simulated pool
pub const DUMMY_ROUTE: RedeemRoute = RedeemRoute {
    dst_chain_id: 111,
    dst_pool_id: Some(1),
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Actor book with every role the catalog uses.
pub fn build_test_actor_book() -> ActorBook {
    ActorBook::new()
        .with(Role::Depositor, DUMMY_DEPOSITOR_ADDR)
        .with(Role::Governor, DUMMY_GOVERNOR_ADDR)
        .with(Role::Strategist, DUMMY_STRATEGIST_ADDR)
        .with(Role::Keeper, DUMMY_KEEPER_ADDR)
        .with(Role::Whale, DUMMY_WHALE_ADDR)
        .with(Role::LpWhale, DUMMY_LP_WHALE_ADDR)
        .with(Role::RouterOwner, DUMMY_ROUTER_OWNER_ADDR)
        .with(Role::StrategyAccount, DUMMY_STRATEGY_ADDR)
}

/// Simulated deployment with default seed values.
pub fn build_test_sim() -> SimulatedProtocol {
    build_test_sim_with(SimParams::default())
}

/// Simulated deployment with custom seed values.
/// This can be customized using Rust's struct update syntax:
/// ```
/// let sim = build_test_sim_with(SimParams {
///     strategy_activated: false,
///     ..SimParams::default()
/// });
/// ```
pub fn build_test_sim_with(params: SimParams) -> SimulatedProtocol {
    SimulatedProtocol::new(default_sim_addresses(), &build_test_actor_book(), params)
        .expect("simulated deployment")
}

/// Catalog parameters with the route the default simulated pool accepts.
pub fn build_test_scenario_params() -> ScenarioParams {
    ScenarioParams {
        redeem_route: Some(DUMMY_ROUTE),
        ..ScenarioParams::default()
    }
}

/// Minimal valid configuration file contents.
pub fn build_test_config_toml() -> String {
    format!(
        r#"
[network]
name = "Test fork"
rpc_url = "http://127.0.0.1:8545"
chain_id = 10

[contracts]
vault = "{vault}"
strategy = "{strategy}"
want = "{want}"
reward_token = "{reward}"
trade_factory = "{factory}"

[actors]
depositor = "{depositor}"
governor = "{governor}"
strategist = "{strategist}"
keeper = "{keeper}"
whale = "{whale}"
lp_whale = "{lp_whale}"
router_owner = "{router_owner}"

[[asset]]
name = "USDC"
want = "{want}"
decimals = 6
redeem_route = {{ dst_chain_id = 111, dst_pool_id = 1 }}

[[asset]]
name = "WETH"
want = "0x4200000000000000000000000000000000000006"
decimals = 18
redeem_route = {{ dst_chain_id = 111, dst_pool_id = 13 }}
"#,
        vault = DUMMY_VAULT_ADDR,
        strategy = DUMMY_STRATEGY_ADDR,
        want = DUMMY_WANT_ADDR,
        reward = DUMMY_REWARD_ADDR,
        factory = DUMMY_TRADE_FACTORY_ADDR,
        depositor = DUMMY_DEPOSITOR_ADDR,
        governor = DUMMY_GOVERNOR_ADDR,
        strategist = DUMMY_STRATEGIST_ADDR,
        keeper = DUMMY_KEEPER_ADDR,
        whale = DUMMY_WHALE_ADDR,
        lp_whale = DUMMY_LP_WHALE_ADDR,
        router_owner = DUMMY_ROUTER_OWNER_ADDR,
    )
}

/// Parsed and validated configuration from `build_test_config_toml`.
pub fn build_test_config() -> Config {
    Config::from_toml(&build_test_config_toml()).expect("test config")
}

/// Hex return data holding a single uint word.
pub fn uint_word(value: u128) -> String {
    format!("0x{:064x}", value)
}

/// Hex return data holding a single address word.
pub fn address_word(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}
