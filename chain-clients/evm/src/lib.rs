//! EVM chain client library
//!
//! JSON-RPC client for EVM development chains (anvil, hardhat) running as
//! forks of a live network, plus the minimal ABI helpers needed to build
//! calldata and decode return words, revert reasons and event logs.

pub mod abi;
pub mod client;

pub use client::{EvmClient, EvmLog, EvmReceipt, Impersonation, JsonRpcFailure, TxRequest};
