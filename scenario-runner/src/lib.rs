//! Scenario runner for vault strategy integration tests
//!
//! Drives multi-step, time-dependent scenarios against a vault, a strategy
//! and the cross-chain liquidity pool it invests in, either on a forked EVM
//! chain or on a simulated in-memory ledger.

pub mod amount;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scenario;

// Re-export public types for convenience
pub use amount::{Actor, ActorBook, AssetAmount, Role, TxOptions, MAX_BPS};
pub use config::Config;
pub use error::{CallResult, Collaborator, ScenarioError};
pub use protocol::evm::{EvmProtocol, KnownContracts};
pub use protocol::sim::{SimParams, SimulatedProtocol};
pub use protocol::{Protocol, ProtocolAddresses, ProtocolEvent, Receipt, RedeemRoute};
pub use scenario::catalog::{ScenarioParams, SCENARIO_NAMES};
pub use scenario::{RunReport, Scenario, ScenarioContext, SuiteReport};
