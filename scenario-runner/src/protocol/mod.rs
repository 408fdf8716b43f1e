//! Collaborator Interface Module
//!
//! The runner never touches contract state directly. Every interaction goes
//! through these traits, which are implemented by:
//! - `evm::EvmProtocol` - a forked EVM chain reached over JSON-RPC
//! - `sim::SimulatedProtocol` - a deterministic in-memory ledger
//!
//! Mutating calls take `TxOptions` (sender + native value) and return a
//! `Receipt` with the decoded events. Rejections surface as
//! `ScenarioError::CollaboratorRejected` carrying the revert reason verbatim.
//!
//! The traits use `async fn` and are consumed through generics only.
#![allow(async_fn_in_trait)]

pub mod evm;
pub mod sim;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::amount::{AssetAmount, TxOptions};
use crate::error::CallResult;

/// The zero address, used as a burn destination.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ============================================================================
// RECEIPTS AND EVENTS
// ============================================================================

/// Event emitted by a collaborator during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Vault accounting report for a strategy
    StrategyReported {
        gain: AssetAmount,
        loss: AssetAmount,
        debt_paid: AssetAmount,
        total_gain: AssetAmount,
        total_loss: AssetAmount,
        total_debt: AssetAmount,
        debt_added: AssetAmount,
        debt_ratio: u128,
    },
    /// Strategy-side harvest summary
    Harvested {
        profit: AssetAmount,
        loss: AssetAmount,
        debt_payment: AssetAmount,
        debt_outstanding: AssetAmount,
    },
}

/// Event kinds an expectation can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    StrategyReported,
    Harvested,
}

/// Numeric event fields an expectation can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventField {
    Gain,
    Profit,
    Loss,
    DebtPaid,
    DebtPayment,
    DebtOutstanding,
    TotalGain,
    TotalLoss,
    TotalDebt,
    DebtAdded,
}

impl ProtocolEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProtocolEvent::StrategyReported { .. } => EventKind::StrategyReported,
            ProtocolEvent::Harvested { .. } => EventKind::Harvested,
        }
    }

    /// Reads a numeric field; `None` when the event has no such field.
    pub fn field(&self, field: EventField) -> Option<AssetAmount> {
        match (self, field) {
            (ProtocolEvent::StrategyReported { gain, .. }, EventField::Gain) => Some(*gain),
            (ProtocolEvent::StrategyReported { loss, .. }, EventField::Loss) => Some(*loss),
            (ProtocolEvent::StrategyReported { debt_paid, .. }, EventField::DebtPaid) => Some(*debt_paid),
            (ProtocolEvent::StrategyReported { total_gain, .. }, EventField::TotalGain) => Some(*total_gain),
            (ProtocolEvent::StrategyReported { total_loss, .. }, EventField::TotalLoss) => Some(*total_loss),
            (ProtocolEvent::StrategyReported { total_debt, .. }, EventField::TotalDebt) => Some(*total_debt),
            (ProtocolEvent::StrategyReported { debt_added, .. }, EventField::DebtAdded) => Some(*debt_added),
            (ProtocolEvent::Harvested { profit, .. }, EventField::Profit) => Some(*profit),
            (ProtocolEvent::Harvested { loss, .. }, EventField::Loss) => Some(*loss),
            (ProtocolEvent::Harvested { debt_payment, .. }, EventField::DebtPayment) => Some(*debt_payment),
            (ProtocolEvent::Harvested { debt_outstanding, .. }, EventField::DebtOutstanding) => {
                Some(*debt_outstanding)
            }
            _ => None,
        }
    }
}

/// Result of a successful state-mutating call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction hash (synthetic for the simulated ledger)
    pub tx_hash: String,
    /// Decoded events in emission order
    pub events: Vec<ProtocolEvent>,
}

impl Receipt {
    /// First event of the given kind.
    pub fn event(&self, kind: EventKind) -> Option<&ProtocolEvent> {
        self.events.iter().find(|e| e.kind() == kind)
    }
}

// ============================================================================
// ADDRESSES AND PARAMETERS
// ============================================================================

/// Addresses of the contracts a scenario touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAddresses {
    pub vault: String,
    pub strategy: String,
    /// Token the vault accepts
    pub want: String,
    /// Bridge liquidity pool; also the LP token
    pub liquidity_pool: String,
    pub router: String,
    pub lp_staker: String,
    /// Emission token sold through the trade factory (if configured)
    pub reward_token: Option<String>,
    pub trade_factory: Option<String>,
}

/// Destination of a cross-chain `redeemLocal`.
///
/// Two deployed strategy variants exist: one takes only the destination chain,
/// the other also the destination pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRoute {
    /// Bridge-specific destination chain identifier
    pub dst_chain_id: u16,
    /// Destination pool identifier, when the strategy variant needs it
    #[serde(default)]
    pub dst_pool_id: Option<u64>,
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Simulated chain clock.
pub trait Ledger {
    /// Moves the clock forward. A zero duration is a no-op.
    async fn advance(&mut self, duration: Duration) -> CallResult<()>;
    /// Seals `blocks` blocks.
    async fn mine(&mut self, blocks: u64) -> CallResult<()>;
    /// Current timestamp in seconds.
    async fn timestamp(&self) -> CallResult<u64>;
    /// Captures the full ledger state; the returned id is passed to `revert_to`.
    async fn snapshot(&mut self) -> CallResult<String>;
    /// Restores a snapshot. Later snapshots are discarded.
    async fn revert_to(&mut self, snapshot_id: &str) -> CallResult<()>;
}

/// Standard fungible-asset semantics, plus native value transfers.
pub trait Token {
    async fn approve(
        &mut self,
        token: &str,
        spender: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt>;
    async fn transfer(
        &mut self,
        token: &str,
        to: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt>;
    async fn balance_of(&self, token: &str, holder: &str) -> CallResult<AssetAmount>;
    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> CallResult<AssetAmount>;
    /// Sends `opts.value` of the native asset to `to`.
    async fn transfer_native(&mut self, to: &str, opts: &TxOptions) -> CallResult<Receipt>;
    async fn native_balance(&self, holder: &str) -> CallResult<AssetAmount>;
}

pub trait Vault {
    async fn deposit(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt>;
    /// Redeems every share held by the sender.
    async fn withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
    async fn update_strategy_debt_ratio(&mut self, ratio_bps: u128, opts: &TxOptions) -> CallResult<Receipt>;
    async fn debt_outstanding(&self) -> CallResult<AssetAmount>;
    async fn price_per_share(&self) -> CallResult<AssetAmount>;
    /// `(total_gain, total_loss)` recorded for the strategy.
    async fn strategy_totals(&self) -> CallResult<(AssetAmount, AssetAmount)>;
}

pub trait Strategy {
    async fn harvest(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
    async fn tend(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
    async fn set_do_health_check(&mut self, enabled: bool, opts: &TxOptions) -> CallResult<Receipt>;
    async fn estimated_total_assets(&self) -> CallResult<AssetAmount>;
    async fn balance_of_staked_lp(&self) -> CallResult<AssetAmount>;
    async fn balance_of_unstaked_lp(&self) -> CallResult<AssetAmount>;
    async fn unstake_lp(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt>;
    /// Cross-chain redemption of unstaked LP; `opts.value` pays the messaging fee.
    async fn redeem_local(
        &mut self,
        route: &RedeemRoute,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt>;
    async fn sweep(&mut self, token: &str, opts: &TxOptions) -> CallResult<Receipt>;
    async fn harvest_trigger(&self, call_cost: AssetAmount) -> CallResult<bool>;
    async fn tend_trigger(&self, call_cost: AssetAmount) -> CallResult<bool>;
    async fn remove_trade_factory_permissions(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
    /// Trade factory the strategy currently uses; the zero address once removed.
    async fn trade_factory(&self) -> CallResult<String>;
    /// Calls `initialize` again on the deployed strategy. Always expected to revert.
    async fn initialize(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
}

pub trait LiquidityPool {
    /// Amount immediately redeemable without cross-chain settlement.
    async fn delta_credit(&self) -> CallResult<AssetAmount>;
    async fn pool_id(&self) -> CallResult<u64>;
}

pub trait Router {
    async fn instant_redeem_local(
        &mut self,
        pool_id: u64,
        amount: AssetAmount,
        recipient: &str,
        opts: &TxOptions,
    ) -> CallResult<Receipt>;
    /// Sets the mint fee charged when liquidity is added to `pool_id`.
    async fn set_fees(&mut self, pool_id: u64, mint_fee_bps: u128, opts: &TxOptions) -> CallResult<Receipt>;
}

pub trait LpStaker {
    /// Pulls the sender's staked LP back to the sender, forfeiting rewards.
    async fn emergency_withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt>;
}

/// The full set of collaborators a scenario runs against.
pub trait Protocol: Ledger + Token + Vault + Strategy + LiquidityPool + Router + LpStaker {
    fn addresses(&self) -> &ProtocolAddresses;

    /// Fails with `SetupError` if any collaborator is missing or uninitialized.
    async fn ensure_ready(&self) -> CallResult<()>;
}
