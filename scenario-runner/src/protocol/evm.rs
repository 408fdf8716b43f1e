//! EVM Protocol
//!
//! Collaborator implementation backed by a forked EVM chain (anvil or
//! hardhat). Transactions are sent unsigned via `eth_sendTransaction` from
//! impersonated accounts; views go through `eth_call`.
//!
//! Node errors are split in two: a `JsonRpcFailure` means the contract
//! refused the call and becomes `CollaboratorRejected`, anything else is a
//! `Transport` failure.

use chain_clients_evm::abi::{self, AbiArg};
use chain_clients_evm::{EvmClient, EvmLog, EvmReceipt, Impersonation, JsonRpcFailure, TxRequest};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::amount::{AssetAmount, TxOptions};
use crate::error::{CallResult, Collaborator, ScenarioError};
use crate::protocol::{
    Ledger, LiquidityPool, LpStaker, Protocol, ProtocolAddresses, ProtocolEvent, Receipt, RedeemRoute,
    Router, Strategy, Token, Vault, ZERO_ADDRESS,
};

/// Gas money given to impersonated accounts that hold no native balance.
const GAS_FUNDING_WEI: u128 = 10 * 1_000_000_000_000_000_000;

const STRATEGY_REPORTED_EVENT: &str =
    "StrategyReported(address,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256)";
const HARVESTED_EVENT: &str = "Harvested(uint256,uint256,uint256,uint256)";

/// Strategy initializer shared by the original deployment and its clones.
const INITIALIZE_SIGNATURE: &str = "initialize(address,address,address,address,address,uint16,address,address,string)";

/// Position of `totalGain` / `totalLoss` in the vault's `strategies(address)` tuple.
const STRATEGY_PARAMS_TOTAL_GAIN: usize = 7;
const STRATEGY_PARAMS_TOTAL_LOSS: usize = 8;

/// Addresses the runner needs up front; the rest is discovered from the strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownContracts {
    pub vault: String,
    pub strategy: String,
    pub want: String,
    pub reward_token: Option<String>,
    pub trade_factory: Option<String>,
}

/// Vault, strategy and bridge contracts on a forked chain.
#[derive(Debug, Clone)]
pub struct EvmProtocol {
    client: EvmClient,
    addresses: ProtocolAddresses,
    flavour: Impersonation,
    /// Accounts already unlocked on the node
    impersonated: HashSet<String>,
    reported_topic: String,
    harvested_topic: String,
}

fn transport(collaborator: Collaborator) -> impl FnOnce(anyhow::Error) -> ScenarioError {
    move |source| ScenarioError::Transport {
        collaborator,
        source,
        step: None,
    }
}

/// Revert (node-side failure) or transport failure.
fn classify(collaborator: Collaborator, err: anyhow::Error) -> ScenarioError {
    match err.downcast_ref::<JsonRpcFailure>() {
        Some(failure) => ScenarioError::rejected(collaborator, failure.revert_reason()),
        None => ScenarioError::Transport {
            collaborator,
            source: err,
            step: None,
        },
    }
}

fn calldata(signature: &str, args: &[AbiArg<'_>]) -> CallResult<String> {
    abi::encode_call(signature, args)
        .map_err(|e| ScenarioError::setup(format!("cannot encode {}: {:#}", signature, e)))
}

fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl EvmProtocol {
    /// Connects to the fork and resolves the bridge contracts from the strategy.
    ///
    /// # Arguments
    ///
    /// * `client` - Client for the forked node
    /// * `known` - Vault, strategy and token addresses from configuration
    /// * `flavour` - Dev-node flavour used for impersonation
    ///
    /// # Returns
    ///
    /// * `Ok(EvmProtocol)` - Pool, router and staker addresses resolved
    /// * `Err(ScenarioError)` - The strategy could not be queried
    pub async fn connect(client: EvmClient, known: KnownContracts, flavour: Impersonation) -> CallResult<Self> {
        let mut protocol = Self {
            client,
            addresses: ProtocolAddresses {
                vault: known.vault.to_lowercase(),
                strategy: known.strategy.to_lowercase(),
                want: known.want.to_lowercase(),
                liquidity_pool: String::new(),
                router: String::new(),
                lp_staker: String::new(),
                reward_token: known.reward_token.map(|a| a.to_lowercase()),
                trade_factory: known.trade_factory.map(|a| a.to_lowercase()),
            },
            flavour,
            impersonated: HashSet::new(),
            reported_topic: abi::event_topic(STRATEGY_REPORTED_EVENT),
            harvested_topic: abi::event_topic(HARVESTED_EVENT),
        };

        let strategy = protocol.addresses.strategy.clone();
        let pool = protocol
            .view_address(Collaborator::Strategy, &strategy, "liquidityPool()", &[])
            .await?;
        let staker = protocol
            .view_address(Collaborator::Strategy, &strategy, "lpStaker()", &[])
            .await?;
        let router = protocol
            .view_address(Collaborator::LiquidityPool, &pool, "router()", &[])
            .await?;
        if protocol.addresses.trade_factory.is_none() {
            match protocol
                .view_address(Collaborator::Strategy, &strategy, "tradeFactory()", &[])
                .await
            {
                Ok(factory) if factory != ZERO_ADDRESS => {
                    protocol.addresses.trade_factory = Some(factory)
                }
                Ok(_) => {}
                Err(e) => debug!("Strategy exposes no trade factory: {}", e),
            }
        }

        protocol.addresses.liquidity_pool = pool;
        protocol.addresses.lp_staker = staker;
        protocol.addresses.router = router;
        info!(
            "Resolved pool {} router {} staker {} for strategy {}",
            protocol.addresses.liquidity_pool, protocol.addresses.router, protocol.addresses.lp_staker, strategy
        );
        Ok(protocol)
    }

    pub fn client(&self) -> &EvmClient {
        &self.client
    }

    // ------------------------------------------------------------------------
    // views
    // ------------------------------------------------------------------------

    async fn view_raw(
        &self,
        collaborator: Collaborator,
        to: &str,
        signature: &str,
        args: &[AbiArg<'_>],
    ) -> CallResult<String> {
        let data = calldata(signature, args)?;
        self.client
            .call(to, &data)
            .await
            .map_err(|e| classify(collaborator, e))
    }

    /// Reads a `uint256` view. Values above 128 bits (unlimited allowances) clamp to `u128::MAX`.
    async fn view_uint(
        &self,
        collaborator: Collaborator,
        to: &str,
        signature: &str,
        args: &[AbiArg<'_>],
    ) -> CallResult<AssetAmount> {
        let out = self.view_raw(collaborator, to, signature, args).await?;
        abi::decode_uint_saturating(&out, 0)
            .map(AssetAmount)
            .map_err(transport(collaborator))
    }

    async fn view_bool(
        &self,
        collaborator: Collaborator,
        to: &str,
        signature: &str,
        args: &[AbiArg<'_>],
    ) -> CallResult<bool> {
        let out = self.view_raw(collaborator, to, signature, args).await?;
        abi::decode_bool(&out, 0).map_err(transport(collaborator))
    }

    async fn view_address(
        &self,
        collaborator: Collaborator,
        to: &str,
        signature: &str,
        args: &[AbiArg<'_>],
    ) -> CallResult<String> {
        let out = self.view_raw(collaborator, to, signature, args).await?;
        abi::decode_address(&out, 0).map_err(transport(collaborator))
    }

    async fn staking_pid(&self) -> CallResult<u128> {
        self.view_uint(
            Collaborator::Strategy,
            &self.addresses.strategy,
            "liquidityPoolIDInLPStaking()",
            &[],
        )
        .await
        .map(AssetAmount::raw)
    }

    // ------------------------------------------------------------------------
    // transactions
    // ------------------------------------------------------------------------

    /// Unlocks `address` on the node once, funding it for gas if it has no balance.
    async fn ensure_impersonated(&mut self, address: &str) -> CallResult<()> {
        if self.impersonated.contains(address) {
            return Ok(());
        }
        self.client
            .impersonate(address, self.flavour)
            .await
            .map_err(transport(Collaborator::Ledger))?;
        let balance = self
            .client
            .get_balance(address)
            .await
            .map_err(transport(Collaborator::Ledger))?;
        if balance == 0 {
            self.client
                .set_balance(address, GAS_FUNDING_WEI, self.flavour)
                .await
                .map_err(transport(Collaborator::Ledger))?;
        }
        self.impersonated.insert(address.to_string());
        Ok(())
    }

    /// Sends a transaction as `opts.sender` and decodes the resulting events.
    async fn transact(
        &mut self,
        collaborator: Collaborator,
        to: &str,
        data: String,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        let from = opts.sender.address.clone();
        self.ensure_impersonated(&from).await?;

        let tx = TxRequest {
            from,
            to: to.to_string(),
            data,
            value: opts.value.raw(),
        };
        let hash = self
            .client
            .send_transaction(&tx)
            .await
            .map_err(|e| classify(collaborator, e))?;
        let receipt = self
            .client
            .wait_for_receipt(&hash)
            .await
            .map_err(transport(collaborator))?;

        if !receipt.succeeded() {
            return Err(self.replay_failure(collaborator, &tx).await);
        }
        Ok(self.decode_receipt(&receipt))
    }

    /// Re-runs a mined-but-failed transaction as a call to recover its revert reason.
    async fn replay_failure(&self, collaborator: Collaborator, tx: &TxRequest) -> ScenarioError {
        match self.client.call_as(tx).await {
            Err(e) => classify(collaborator, e),
            Ok(_) => {
                warn!("Transaction from {} to {} failed but replays cleanly", tx.from, tx.to);
                ScenarioError::rejected(collaborator, "transaction reverted")
            }
        }
    }

    fn decode_receipt(&self, receipt: &EvmReceipt) -> Receipt {
        let events = receipt
            .logs
            .iter()
            .filter_map(|log| match self.decode_log(log) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping undecodable log from {}: {:#}", log.address, e);
                    None
                }
            })
            .collect();
        Receipt {
            tx_hash: receipt.transaction_hash.clone(),
            events,
        }
    }

    fn decode_log(&self, log: &EvmLog) -> anyhow::Result<Option<ProtocolEvent>> {
        let Some(topic) = log.topics.first() else {
            return Ok(None);
        };
        let word = |i| abi::decode_uint(&log.data, i).map(AssetAmount);

        if topic.eq_ignore_ascii_case(&self.reported_topic) && same_address(&log.address, &self.addresses.vault) {
            return Ok(Some(ProtocolEvent::StrategyReported {
                gain: word(0)?,
                loss: word(1)?,
                debt_paid: word(2)?,
                total_gain: word(3)?,
                total_loss: word(4)?,
                total_debt: word(5)?,
                debt_added: word(6)?,
                debt_ratio: word(7)?.raw(),
            }));
        }
        if topic.eq_ignore_ascii_case(&self.harvested_topic) && same_address(&log.address, &self.addresses.strategy) {
            return Ok(Some(ProtocolEvent::Harvested {
                profit: word(0)?,
                loss: word(1)?,
                debt_payment: word(2)?,
                debt_outstanding: word(3)?,
            }));
        }
        Ok(None)
    }
}

// ============================================================================
// TRAIT IMPLEMENTATIONS
// ============================================================================

impl Ledger for EvmProtocol {
    async fn advance(&mut self, duration: Duration) -> CallResult<()> {
        let seconds = duration.as_secs();
        if seconds == 0 {
            return Ok(());
        }
        self.client
            .increase_time(seconds)
            .await
            .map_err(transport(Collaborator::Ledger))?;
        // The new time only shows up once a block is sealed.
        self.client.mine(1).await.map_err(transport(Collaborator::Ledger))
    }

    async fn mine(&mut self, blocks: u64) -> CallResult<()> {
        self.client.mine(blocks).await.map_err(transport(Collaborator::Ledger))
    }

    async fn timestamp(&self) -> CallResult<u64> {
        self.client
            .get_block_timestamp()
            .await
            .map_err(transport(Collaborator::Ledger))
    }

    async fn snapshot(&mut self) -> CallResult<String> {
        self.client.snapshot().await.map_err(transport(Collaborator::Ledger))
    }

    async fn revert_to(&mut self, snapshot_id: &str) -> CallResult<()> {
        self.client
            .revert_to(snapshot_id)
            .await
            .map_err(transport(Collaborator::Ledger))
    }
}

impl Token for EvmProtocol {
    async fn approve(
        &mut self,
        token: &str,
        spender: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        let data = calldata(
            "approve(address,uint256)",
            &[AbiArg::Address(spender), AbiArg::Uint(amount.raw())],
        )?;
        self.transact(Collaborator::Token, token, data, opts).await
    }

    async fn transfer(
        &mut self,
        token: &str,
        to: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        let data = calldata(
            "transfer(address,uint256)",
            &[AbiArg::Address(to), AbiArg::Uint(amount.raw())],
        )?;
        self.transact(Collaborator::Token, token, data, opts).await
    }

    async fn balance_of(&self, token: &str, holder: &str) -> CallResult<AssetAmount> {
        self.view_uint(Collaborator::Token, token, "balanceOf(address)", &[AbiArg::Address(holder)])
            .await
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> CallResult<AssetAmount> {
        self.view_uint(
            Collaborator::Token,
            token,
            "allowance(address,address)",
            &[AbiArg::Address(owner), AbiArg::Address(spender)],
        )
        .await
    }

    async fn transfer_native(&mut self, to: &str, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(Collaborator::Ledger, to, "0x".to_string(), opts).await
    }

    async fn native_balance(&self, holder: &str) -> CallResult<AssetAmount> {
        self.client
            .get_balance(holder)
            .await
            .map(AssetAmount)
            .map_err(transport(Collaborator::Ledger))
    }
}

impl Vault for EvmProtocol {
    async fn deposit(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("deposit(uint256)", &[AbiArg::Uint(amount.raw())])?;
        let vault = self.addresses.vault.clone();
        self.transact(Collaborator::Vault, &vault, data, opts).await
    }

    async fn withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("withdraw()", &[])?;
        let vault = self.addresses.vault.clone();
        self.transact(Collaborator::Vault, &vault, data, opts).await
    }

    async fn update_strategy_debt_ratio(&mut self, ratio_bps: u128, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata(
            "updateStrategyDebtRatio(address,uint256)",
            &[AbiArg::Address(&self.addresses.strategy), AbiArg::Uint(ratio_bps)],
        )?;
        let vault = self.addresses.vault.clone();
        self.transact(Collaborator::Vault, &vault, data, opts).await
    }

    async fn debt_outstanding(&self) -> CallResult<AssetAmount> {
        self.view_uint(
            Collaborator::Vault,
            &self.addresses.vault,
            "debtOutstanding(address)",
            &[AbiArg::Address(&self.addresses.strategy)],
        )
        .await
    }

    async fn price_per_share(&self) -> CallResult<AssetAmount> {
        self.view_uint(Collaborator::Vault, &self.addresses.vault, "pricePerShare()", &[])
            .await
    }

    async fn strategy_totals(&self) -> CallResult<(AssetAmount, AssetAmount)> {
        let out = self
            .view_raw(
                Collaborator::Vault,
                &self.addresses.vault,
                "strategies(address)",
                &[AbiArg::Address(&self.addresses.strategy)],
            )
            .await?;
        let gain = abi::decode_uint(&out, STRATEGY_PARAMS_TOTAL_GAIN).map_err(transport(Collaborator::Vault))?;
        let loss = abi::decode_uint(&out, STRATEGY_PARAMS_TOTAL_LOSS).map_err(transport(Collaborator::Vault))?;
        Ok((AssetAmount(gain), AssetAmount(loss)))
    }
}

impl Strategy for EvmProtocol {
    async fn harvest(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("harvest()", &[])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn tend(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("tend()", &[])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn set_do_health_check(&mut self, enabled: bool, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("setDoHealthCheck(bool)", &[AbiArg::Bool(enabled)])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn estimated_total_assets(&self) -> CallResult<AssetAmount> {
        self.view_uint(Collaborator::Strategy, &self.addresses.strategy, "estimatedTotalAssets()", &[])
            .await
    }

    async fn balance_of_staked_lp(&self) -> CallResult<AssetAmount> {
        self.view_uint(Collaborator::Strategy, &self.addresses.strategy, "balanceOfStakedLPToken()", &[])
            .await
    }

    async fn balance_of_unstaked_lp(&self) -> CallResult<AssetAmount> {
        self.view_uint(
            Collaborator::Strategy,
            &self.addresses.strategy,
            "balanceOfUnstakedLPToken()",
            &[],
        )
        .await
    }

    async fn unstake_lp(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("unstakeLP(uint256)", &[AbiArg::Uint(amount.raw())])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn redeem_local(
        &mut self,
        route: &RedeemRoute,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        let chain = u128::from(route.dst_chain_id);
        let data = match route.dst_pool_id {
            Some(pool) => calldata(
                "redeemLocal(uint16,uint256,uint256)",
                &[
                    AbiArg::Uint(chain),
                    AbiArg::Uint(u128::from(pool)),
                    AbiArg::Uint(amount.raw()),
                ],
            )?,
            None => calldata(
                "redeemLocal(uint16,uint256)",
                &[AbiArg::Uint(chain), AbiArg::Uint(amount.raw())],
            )?,
        };
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn sweep(&mut self, token: &str, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("sweep(address)", &[AbiArg::Address(token)])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn harvest_trigger(&self, call_cost: AssetAmount) -> CallResult<bool> {
        self.view_bool(
            Collaborator::Strategy,
            &self.addresses.strategy,
            "harvestTrigger(uint256)",
            &[AbiArg::Uint(call_cost.raw())],
        )
        .await
    }

    async fn tend_trigger(&self, call_cost: AssetAmount) -> CallResult<bool> {
        self.view_bool(
            Collaborator::Strategy,
            &self.addresses.strategy,
            "tendTrigger(uint256)",
            &[AbiArg::Uint(call_cost.raw())],
        )
        .await
    }

    async fn remove_trade_factory_permissions(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata("removeTradeFactoryPermissions()", &[])?;
        let strategy = self.addresses.strategy.clone();
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }

    async fn trade_factory(&self) -> CallResult<String> {
        self.view_address(Collaborator::Strategy, &self.addresses.strategy, "tradeFactory()", &[])
            .await
    }

    async fn initialize(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let strategy = self.addresses.strategy.clone();
        let strategist = self
            .view_address(Collaborator::Strategy, &strategy, "strategist()", &[])
            .await?;
        let rewards = self
            .view_address(Collaborator::Strategy, &strategy, "rewards()", &[])
            .await?;
        let keeper = self
            .view_address(Collaborator::Strategy, &strategy, "keeper()", &[])
            .await?;
        let pid = self.staking_pid().await?;

        let data = calldata(
            INITIALIZE_SIGNATURE,
            &[
                AbiArg::Address(&self.addresses.vault),
                AbiArg::Address(&strategist),
                AbiArg::Address(&rewards),
                AbiArg::Address(&keeper),
                AbiArg::Address(&self.addresses.lp_staker),
                AbiArg::Uint(pid),
                AbiArg::Address(ZERO_ADDRESS),
                AbiArg::Address(ZERO_ADDRESS),
                AbiArg::String("ReinitializedStrategy"),
            ],
        )?;
        self.transact(Collaborator::Strategy, &strategy, data, opts).await
    }
}

impl LiquidityPool for EvmProtocol {
    async fn delta_credit(&self) -> CallResult<AssetAmount> {
        self.view_uint(Collaborator::LiquidityPool, &self.addresses.liquidity_pool, "deltaCredit()", &[])
            .await
    }

    async fn pool_id(&self) -> CallResult<u64> {
        let id = self
            .view_uint(Collaborator::LiquidityPool, &self.addresses.liquidity_pool, "poolId()", &[])
            .await?;
        u64::try_from(id.raw()).map_err(|_| {
            ScenarioError::Transport {
                collaborator: Collaborator::LiquidityPool,
                source: anyhow::anyhow!("pool id {} out of range", id),
                step: None,
            }
        })
    }
}

impl Router for EvmProtocol {
    async fn instant_redeem_local(
        &mut self,
        pool_id: u64,
        amount: AssetAmount,
        recipient: &str,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        let data = calldata(
            "instantRedeemLocal(uint16,uint256,address)",
            &[
                AbiArg::Uint(u128::from(pool_id)),
                AbiArg::Uint(amount.raw()),
                AbiArg::Address(recipient),
            ],
        )?;
        let router = self.addresses.router.clone();
        self.transact(Collaborator::Router, &router, data, opts).await
    }

    async fn set_fees(&mut self, pool_id: u64, mint_fee_bps: u128, opts: &TxOptions) -> CallResult<Receipt> {
        let data = calldata(
            "setFees(uint256,uint256)",
            &[AbiArg::Uint(u128::from(pool_id)), AbiArg::Uint(mint_fee_bps)],
        )?;
        let router = self.addresses.router.clone();
        self.transact(Collaborator::Router, &router, data, opts).await
    }
}

impl LpStaker for EvmProtocol {
    async fn emergency_withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        let pid = self.staking_pid().await?;
        let data = calldata("emergencyWithdraw(uint256)", &[AbiArg::Uint(pid)])?;
        let staker = self.addresses.lp_staker.clone();
        self.transact(Collaborator::LpStaker, &staker, data, opts).await
    }
}

impl Protocol for EvmProtocol {
    fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    async fn ensure_ready(&self) -> CallResult<()> {
        let contracts = [
            ("vault", &self.addresses.vault),
            ("strategy", &self.addresses.strategy),
            ("want", &self.addresses.want),
            ("liquidity pool", &self.addresses.liquidity_pool),
            ("router", &self.addresses.router),
            ("lp staker", &self.addresses.lp_staker),
        ];
        for (name, address) in contracts {
            let code = self
                .client
                .get_code(address)
                .await
                .map_err(transport(Collaborator::Ledger))?;
            if code.trim_start_matches("0x").is_empty() {
                return Err(ScenarioError::setup(format!(
                    "no {} contract deployed at {} on {}",
                    name,
                    address,
                    self.client.base_url()
                )));
            }
        }
        Ok(())
    }
}
