//! Simulated Protocol
//!
//! Deterministic in-memory ledger implementing every collaborator trait.
//! It models the vault/strategy accounting (debt, credit, locked profit,
//! loss-driven debt ratio reduction), the bridge pool delta credit and mint
//! fee, and the LP staker, closely enough for the catalog scenarios to
//! exercise the same properties they check on a fork.
//!
//! Each mutating call runs against a copy of the state which is only committed
//! when the call succeeds, so a rejected call leaves no partial effects.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::amount::{mul_div, ActorBook, AssetAmount, Role, TxOptions, MAX_BPS};
use crate::error::{CallResult, Collaborator, ScenarioError};
use crate::protocol::{
    Ledger, LiquidityPool, LpStaker, Protocol, ProtocolAddresses, ProtocolEvent, Receipt, RedeemRoute,
    Router, Strategy, Token, Vault, ZERO_ADDRESS,
};

/// Locked profit is released linearly over this window.
pub const LOCKED_PROFIT_DEGRADATION_SECS: u64 = 6 * 3600;
/// Harvest fails the health check when the reported loss exceeds this share of debt.
pub const HEALTH_CHECK_LOSS_LIMIT_BPS: u128 = 1;
/// Harvest fails the health check when the reported profit exceeds this share of debt.
pub const HEALTH_CHECK_PROFIT_LIMIT_BPS: u128 = 10_000;
/// `harvest_trigger` fires once this long has passed since the last report.
pub const MAX_REPORT_DELAY_SECS: u64 = 30 * 24 * 3600;
/// Maximum loss a depositor accepts on withdrawal.
pub const WITHDRAW_MAX_LOSS_BPS: u128 = 1;

// ============================================================================
// PARAMETERS
// ============================================================================

/// Seed values for a simulated deployment.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimParams {
    /// Want decimals (drives `price_per_share` scaling)
    pub decimals: u32,
    /// Bridge pool identifier
    pub pool_id: u64,
    /// Want balance of the depositor
    pub depositor_balance: AssetAmount,
    /// Want balance of the whale
    pub whale_balance: AssetAmount,
    /// LP balance of the LP whale (backed by the same amount of pool liquidity)
    pub lp_whale_balance: AssetAmount,
    /// Delta credit before any strategy activity
    pub initial_delta_credit: AssetAmount,
    /// Native balance of every configured actor
    pub native_balance: AssetAmount,
    /// Reward tokens held by the strategy
    pub reward_balance: AssetAmount,
    /// Destinations accepted by `redeem_local`
    pub routes: Vec<RedeemRoute>,
    /// When false, `ensure_ready` reports the strategy as not activated
    pub strategy_activated: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        let unit = 10u128.pow(6);
        Self {
            decimals: 6,
            pool_id: 1,
            depositor_balance: AssetAmount(10_000 * unit),
            whale_balance: AssetAmount(1_000_000 * unit),
            lp_whale_balance: AssetAmount(1_000_000 * unit),
            initial_delta_credit: AssetAmount(100_000 * unit),
            native_balance: AssetAmount(10 * 10u128.pow(18)),
            reward_balance: AssetAmount::ZERO,
            routes: vec![RedeemRoute {
                dst_chain_id: 111,
                dst_pool_id: Some(1),
            }],
            strategy_activated: true,
        }
    }
}

/// Addresses the simulated deployment uses when the configuration leaves them out.
pub fn default_sim_addresses() -> ProtocolAddresses {
    ProtocolAddresses {
        vault: "0x00000000000000000000000000000000000000a1".to_string(),
        strategy: "0x00000000000000000000000000000000000000a2".to_string(),
        want: "0x00000000000000000000000000000000000000a3".to_string(),
        liquidity_pool: "0x00000000000000000000000000000000000000a4".to_string(),
        router: "0x00000000000000000000000000000000000000a5".to_string(),
        lp_staker: "0x00000000000000000000000000000000000000a6".to_string(),
        reward_token: Some("0x00000000000000000000000000000000000000a7".to_string()),
        trade_factory: Some("0x00000000000000000000000000000000000000a8".to_string()),
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone)]
struct Roles {
    governor: String,
    strategist: String,
    keeper: String,
    router_owner: String,
}

#[derive(Debug, Clone, Default)]
struct VaultBook {
    share_supply: u128,
    debt_ratio: u128,
    total_debt: u128,
    total_gain: u128,
    total_loss: u128,
    last_report: u64,
    locked_profit: u128,
}

#[derive(Debug, Clone)]
struct PoolBook {
    delta_credit: u128,
    mint_fee_bps: HashMap<u64, u128>,
    /// `(route, want amount)` of redemptions awaiting cross-chain settlement
    pending_redemptions: Vec<(RedeemRoute, u128)>,
}

#[derive(Debug, Clone)]
struct SimState {
    addr: ProtocolAddresses,
    roles: Roles,
    params: SimParams,
    now: u64,
    block: u64,
    tx_count: u64,
    /// token -> holder -> balance
    balances: HashMap<String, HashMap<String, u128>>,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(String, String, String), u128>,
    native: HashMap<String, u128>,
    /// LP staked per depositor in the staker
    staked: HashMap<String, u128>,
    vault: VaultBook,
    pool: PoolBook,
    do_health_check: bool,
    trade_factory: Option<String>,
}

fn norm(address: &str) -> String {
    address.to_lowercase()
}

fn ensure(cond: bool, collaborator: Collaborator, reason: &str) -> CallResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ScenarioError::rejected(collaborator, reason))
    }
}

impl SimState {
    // ------------------------------------------------------------------------
    // balances
    // ------------------------------------------------------------------------

    fn balance(&self, token: &str, holder: &str) -> u128 {
        self.balances
            .get(&norm(token))
            .and_then(|holders| holders.get(&norm(holder)))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&mut self, token: &str, holder: &str, amount: u128) {
        let entry = self
            .balances
            .entry(norm(token))
            .or_default()
            .entry(norm(holder))
            .or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    fn debit(&mut self, token: &str, holder: &str, amount: u128, collaborator: Collaborator) -> CallResult<()> {
        let balance = self.balance(token, holder);
        ensure(balance >= amount, collaborator, "ERC20: transfer amount exceeds balance")?;
        self.balances
            .entry(norm(token))
            .or_default()
            .insert(norm(holder), balance - amount);
        Ok(())
    }

    fn move_tokens(
        &mut self,
        token: &str,
        from: &str,
        to: &str,
        amount: u128,
        collaborator: Collaborator,
    ) -> CallResult<()> {
        self.debit(token, from, amount, collaborator)?;
        self.credit(token, to, amount);
        Ok(())
    }

    fn allowance(&self, token: &str, owner: &str, spender: &str) -> u128 {
        self.allowances
            .get(&(norm(token), norm(owner), norm(spender)))
            .copied()
            .unwrap_or(0)
    }

    fn set_allowance(&mut self, token: &str, owner: &str, spender: &str, amount: u128) {
        self.allowances
            .insert((norm(token), norm(owner), norm(spender)), amount);
    }

    fn spend_allowance(&mut self, token: &str, owner: &str, spender: &str, amount: u128) -> CallResult<()> {
        let current = self.allowance(token, owner, spender);
        ensure(current >= amount, Collaborator::Token, "ERC20: insufficient allowance")?;
        if current != u128::MAX {
            self.set_allowance(token, owner, spender, current - amount);
        }
        Ok(())
    }

    fn native_of(&self, holder: &str) -> u128 {
        self.native.get(&norm(holder)).copied().unwrap_or(0)
    }

    fn pay_native(&mut self, from: &str, to: &str, amount: u128) -> CallResult<()> {
        let balance = self.native_of(from);
        ensure(balance >= amount, Collaborator::Ledger, "insufficient funds for gas * price + value")?;
        self.native.insert(norm(from), balance - amount);
        *self.native.entry(norm(to)).or_insert(0) += amount;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // permissions
    // ------------------------------------------------------------------------

    fn is_governor(&self, who: &str) -> bool {
        norm(who) == self.roles.governor
    }

    fn is_authorized(&self, who: &str) -> bool {
        self.is_governor(who) || norm(who) == self.roles.strategist
    }

    fn is_keeper(&self, who: &str) -> bool {
        self.is_authorized(who) || norm(who) == self.roles.keeper
    }

    // ------------------------------------------------------------------------
    // vault
    // ------------------------------------------------------------------------

    fn idle(&self) -> u128 {
        self.balance(&self.addr.want, &self.addr.vault)
    }

    fn vault_total_assets(&self) -> u128 {
        self.idle() + self.vault.total_debt
    }

    fn locked_profit_now(&self) -> u128 {
        let elapsed = self.now.saturating_sub(self.vault.last_report);
        if elapsed >= LOCKED_PROFIT_DEGRADATION_SECS {
            return 0;
        }
        let remaining = u128::from(LOCKED_PROFIT_DEGRADATION_SECS - elapsed);
        mul_div(
            self.vault.locked_profit,
            remaining,
            u128::from(LOCKED_PROFIT_DEGRADATION_SECS),
        )
    }

    fn free_funds(&self) -> u128 {
        self.vault_total_assets().saturating_sub(self.locked_profit_now())
    }

    fn share_value(&self, shares: u128) -> u128 {
        if self.vault.share_supply == 0 {
            return shares;
        }
        mul_div(shares, self.free_funds(), self.vault.share_supply)
    }

    fn shares_for_amount(&self, amount: u128) -> u128 {
        let free = self.free_funds();
        if self.vault.share_supply == 0 || free == 0 {
            return amount;
        }
        mul_div(amount, self.vault.share_supply, free)
    }

    fn debt_limit(&self) -> u128 {
        mul_div(self.vault.debt_ratio, self.vault_total_assets(), MAX_BPS)
    }

    fn debt_outstanding(&self) -> u128 {
        self.vault.total_debt.saturating_sub(self.debt_limit())
    }

    fn credit_available(&self) -> u128 {
        self.debt_limit()
            .saturating_sub(self.vault.total_debt)
            .min(self.idle())
    }

    fn price_per_share(&self) -> u128 {
        let unit = 10u128.pow(self.params.decimals);
        if self.vault.share_supply == 0 {
            return unit;
        }
        mul_div(unit, self.free_funds(), self.vault.share_supply)
    }

    fn deposit(&mut self, amount: u128, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(amount > 0, Collaborator::Vault, "!amount")?;
        let (want, vault) = (self.addr.want.clone(), self.addr.vault.clone());
        let shares = self.shares_for_amount(amount);
        self.spend_allowance(&want, sender, &vault, amount)?;
        self.move_tokens(&want, sender, &vault, amount, Collaborator::Token)?;
        self.credit(&vault, sender, shares);
        self.vault.share_supply += shares;
        Ok(Vec::new())
    }

    fn withdraw(&mut self, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        let (want, vault) = (self.addr.want.clone(), self.addr.vault.clone());
        let mut shares = self.balance(&vault, sender);
        ensure(shares > 0, Collaborator::Vault, "!shares")?;

        let mut value = self.share_value(shares);
        let mut loss = 0u128;
        if value > self.idle() {
            let needed = value - self.idle();
            let (freed, strategy_loss) = self.strategy_withdraw(needed)?;
            self.vault.total_debt = self.vault.total_debt.saturating_sub(freed + strategy_loss);
            self.vault.total_loss += strategy_loss;
            loss = strategy_loss;
            value = value.saturating_sub(loss);
            if value > self.idle() {
                value = self.idle();
                shares = shares.min(self.shares_for_amount(value + loss));
            }
        }
        ensure(
            loss <= mul_div(WITHDRAW_MAX_LOSS_BPS, value + loss, MAX_BPS),
            Collaborator::Vault,
            "!maxLoss",
        )?;

        self.debit(&vault, sender, shares, Collaborator::Vault)?;
        self.vault.share_supply -= shares;
        self.move_tokens(&want, &vault, sender, value, Collaborator::Vault)?;
        Ok(Vec::new())
    }

    fn update_debt_ratio(&mut self, ratio: u128, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(self.is_governor(sender), Collaborator::Vault, "!authorized")?;
        ensure(ratio <= MAX_BPS, Collaborator::Vault, "!ratio")?;
        self.vault.debt_ratio = ratio;
        Ok(Vec::new())
    }

    /// Vault side of a harvest; returns the report event and the debt still outstanding.
    fn report(&mut self, gain: u128, loss: u128, debt_payment: u128) -> CallResult<(ProtocolEvent, u128)> {
        let (want, vault, strategy) = (
            self.addr.want.clone(),
            self.addr.vault.clone(),
            self.addr.strategy.clone(),
        );
        ensure(
            self.balance(&want, &strategy) >= gain + debt_payment,
            Collaborator::Vault,
            "!balance",
        )?;

        if loss > 0 {
            ensure(loss <= self.vault.total_debt, Collaborator::Vault, "!loss")?;
            let ratio_change = mul_div(loss, self.vault.debt_ratio, self.vault.total_debt).min(self.vault.debt_ratio);
            self.vault.debt_ratio -= ratio_change;
            self.vault.total_debt -= loss;
            self.vault.total_loss += loss;
        }
        self.vault.total_gain += gain;

        let credit = self.credit_available();
        let debt_paid = debt_payment.min(self.debt_outstanding());
        self.vault.total_debt -= debt_paid;
        self.vault.total_debt += credit;

        let available = gain + debt_paid;
        if available < credit {
            self.move_tokens(&want, &vault, &strategy, credit - available, Collaborator::Vault)?;
        } else if available > credit {
            self.move_tokens(&want, &strategy, &vault, available - credit, Collaborator::Vault)?;
        }

        let locked = self.locked_profit_now() + gain;
        self.vault.locked_profit = locked.saturating_sub(loss);
        self.vault.last_report = self.now;

        let event = ProtocolEvent::StrategyReported {
            gain: AssetAmount(gain),
            loss: AssetAmount(loss),
            debt_paid: AssetAmount(debt_paid),
            total_gain: AssetAmount(self.vault.total_gain),
            total_loss: AssetAmount(self.vault.total_loss),
            total_debt: AssetAmount(self.vault.total_debt),
            debt_added: AssetAmount(credit),
            debt_ratio: self.vault.debt_ratio,
        };
        Ok((event, self.debt_outstanding()))
    }

    // ------------------------------------------------------------------------
    // strategy
    // ------------------------------------------------------------------------

    fn staked_of(&self, holder: &str) -> u128 {
        self.staked.get(&norm(holder)).copied().unwrap_or(0)
    }

    fn unstaked_lp(&self) -> u128 {
        self.balance(&self.addr.liquidity_pool, &self.addr.strategy)
    }

    /// Want on hand plus LP valued one-to-one.
    fn estimated_total_assets(&self) -> u128 {
        self.balance(&self.addr.want, &self.addr.strategy)
            + self.unstaked_lp()
            + self.staked_of(&self.addr.strategy)
    }

    fn stake(&mut self, holder: &str, amount: u128) -> CallResult<()> {
        let (lp, staker) = (self.addr.liquidity_pool.clone(), self.addr.lp_staker.clone());
        self.move_tokens(&lp, holder, &staker, amount, Collaborator::LpStaker)?;
        *self.staked.entry(norm(holder)).or_insert(0) += amount;
        Ok(())
    }

    fn unstake(&mut self, holder: &str, amount: u128) -> CallResult<()> {
        let staked = self.staked_of(holder);
        ensure(staked >= amount, Collaborator::LpStaker, "withdraw: _amount is too large")?;
        let (lp, staker) = (self.addr.liquidity_pool.clone(), self.addr.lp_staker.clone());
        self.move_tokens(&lp, &staker, holder, amount, Collaborator::LpStaker)?;
        self.staked.insert(norm(holder), staked - amount);
        Ok(())
    }

    /// Frees up to `needed` want in the strategy; returns the want now available (capped at `needed`).
    fn liquidate(&mut self, needed: u128) -> CallResult<u128> {
        let strategy = self.addr.strategy.clone();
        let want_balance = self.balance(&self.addr.want, &strategy);
        if want_balance >= needed {
            return Ok(needed);
        }
        let short = needed - want_balance;
        let unstaked = self.unstaked_lp();
        if unstaked < short {
            let to_unstake = (short - unstaked).min(self.staked_of(&strategy));
            if to_unstake > 0 {
                self.unstake(&strategy, to_unstake)?;
            }
        }
        let redeemable = short.min(self.unstaked_lp()).min(self.pool.delta_credit);
        if redeemable > 0 {
            self.instant_redeem(&strategy, redeemable, &strategy)?;
        }
        Ok(self.balance(&self.addr.want, &strategy).min(needed))
    }

    /// Vault-initiated withdrawal from the strategy: `(freed, loss)`.
    fn strategy_withdraw(&mut self, needed: u128) -> CallResult<(u128, u128)> {
        let assets_before = self.estimated_total_assets();
        let freed = self.liquidate(needed)?;
        let loss = (needed - freed).min(self.vault.total_debt.saturating_sub(assets_before));
        let (want, vault, strategy) = (
            self.addr.want.clone(),
            self.addr.vault.clone(),
            self.addr.strategy.clone(),
        );
        self.move_tokens(&want, &strategy, &vault, freed, Collaborator::Strategy)?;
        Ok((freed, loss))
    }

    /// `(profit, loss, debt_payment)` for a report.
    fn prepare_return(&mut self, debt_outstanding: u128) -> CallResult<(u128, u128, u128)> {
        let debt = self.vault.total_debt;
        let assets = self.estimated_total_assets();
        let (mut profit, loss) = if assets >= debt {
            (assets - debt, 0)
        } else {
            (0, debt - assets)
        };

        let to_free = profit + debt_outstanding;
        let freed = self.liquidate(to_free)?;
        let debt_payment = if freed >= to_free {
            debt_outstanding
        } else if freed > profit {
            freed - profit
        } else {
            profit = freed;
            0
        };
        Ok((profit, loss, debt_payment))
    }

    fn adjust_position(&mut self, debt_outstanding: u128) -> CallResult<()> {
        let strategy = self.addr.strategy.clone();
        let want_balance = self.balance(&self.addr.want, &strategy);
        if want_balance > debt_outstanding {
            self.add_liquidity(&strategy, want_balance - debt_outstanding)?;
        }
        let unstaked = self.unstaked_lp();
        if unstaked > 0 {
            self.stake(&strategy, unstaked)?;
        }
        Ok(())
    }

    fn health_check(&self, profit: u128, loss: u128, debt: u128) -> CallResult<()> {
        let profit_ok = profit <= mul_div(debt, HEALTH_CHECK_PROFIT_LIMIT_BPS, MAX_BPS);
        let loss_ok = loss <= mul_div(debt, HEALTH_CHECK_LOSS_LIMIT_BPS, MAX_BPS);
        ensure(profit_ok && loss_ok, Collaborator::Strategy, "!healthcheck")
    }

    fn harvest(&mut self, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(self.is_keeper(sender), Collaborator::Strategy, "!authorized")?;
        let debt_before = self.vault.total_debt;
        let debt_outstanding = self.debt_outstanding();
        let (profit, loss, debt_payment) = self.prepare_return(debt_outstanding)?;

        let (reported, debt_outstanding) = self.report(profit, loss, debt_payment)?;
        self.adjust_position(debt_outstanding)?;

        if self.do_health_check {
            self.health_check(profit, loss, debt_before)?;
        } else {
            self.do_health_check = true;
        }

        Ok(vec![
            reported,
            ProtocolEvent::Harvested {
                profit: AssetAmount(profit),
                loss: AssetAmount(loss),
                debt_payment: AssetAmount(debt_payment),
                debt_outstanding: AssetAmount(debt_outstanding),
            },
        ])
    }

    fn tend(&mut self, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(self.is_keeper(sender), Collaborator::Strategy, "!authorized")?;
        let outstanding = self.debt_outstanding();
        self.adjust_position(outstanding)?;
        Ok(Vec::new())
    }

    fn sweep(&mut self, token: &str, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(self.is_governor(sender), Collaborator::Strategy, "!authorized")?;
        let token = norm(token);
        ensure(token != norm(&self.addr.want), Collaborator::Strategy, "!want")?;
        ensure(token != norm(&self.addr.vault), Collaborator::Strategy, "!shares")?;
        ensure(token != norm(&self.addr.liquidity_pool), Collaborator::Strategy, "!protected")?;
        let strategy = self.addr.strategy.clone();
        let amount = self.balance(&token, &strategy);
        let governor = self.roles.governor.clone();
        self.move_tokens(&token, &strategy, &governor, amount, Collaborator::Strategy)?;
        Ok(Vec::new())
    }

    fn redeem_local(
        &mut self,
        route: &RedeemRoute,
        amount: u128,
        opts: &TxOptions,
    ) -> CallResult<Vec<ProtocolEvent>> {
        let sender = &opts.sender.address;
        ensure(self.is_authorized(sender), Collaborator::Strategy, "!authorized")?;
        ensure(
            !opts.value.is_zero(),
            Collaborator::Router,
            "LayerZero: not enough native for fees",
        )?;
        ensure(
            self.params.routes.contains(route),
            Collaborator::Router,
            "Stargate: local chainPath does not exist",
        )?;
        ensure(
            amount <= self.unstaked_lp(),
            Collaborator::LiquidityPool,
            "Stargate: not enough lp to redeem",
        )?;

        let (lp, strategy, router) = (
            self.addr.liquidity_pool.clone(),
            self.addr.strategy.clone(),
            self.addr.router.clone(),
        );
        self.pay_native(sender, &router, opts.value.raw())?;
        self.debit(&lp, &strategy, amount, Collaborator::LiquidityPool)?;
        self.pool.pending_redemptions.push((*route, amount));
        Ok(Vec::new())
    }

    fn remove_trade_factory(&mut self, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(self.is_authorized(sender), Collaborator::Strategy, "!authorized")?;
        if let (Some(reward), Some(factory)) = (self.addr.reward_token.clone(), self.trade_factory.take()) {
            let strategy = self.addr.strategy.clone();
            self.set_allowance(&reward, &strategy, &factory, 0);
        }
        Ok(Vec::new())
    }

    fn harvest_trigger(&self) -> bool {
        let since_report = self.now.saturating_sub(self.vault.last_report);
        since_report > MAX_REPORT_DELAY_SECS || self.credit_available() > 0
    }

    // ------------------------------------------------------------------------
    // pool, router, staker
    // ------------------------------------------------------------------------

    fn add_liquidity(&mut self, from: &str, amount: u128) -> CallResult<u128> {
        let (want, lp, pool, router) = (
            self.addr.want.clone(),
            self.addr.liquidity_pool.clone(),
            self.addr.liquidity_pool.clone(),
            self.addr.router.clone(),
        );
        let fee_bps = self
            .pool
            .mint_fee_bps
            .get(&self.params.pool_id)
            .copied()
            .unwrap_or(0);
        let fee = mul_div(amount, fee_bps, MAX_BPS);
        let minted = amount - fee;
        self.move_tokens(&want, from, &pool, minted, Collaborator::LiquidityPool)?;
        self.move_tokens(&want, from, &router, fee, Collaborator::LiquidityPool)?;
        self.credit(&lp, from, minted);
        self.pool.delta_credit += minted;
        Ok(minted)
    }

    /// Redeems at most the delta credit; returns the want paid out.
    fn instant_redeem(&mut self, from: &str, lp_amount: u128, to: &str) -> CallResult<u128> {
        let (want, lp) = (self.addr.want.clone(), self.addr.liquidity_pool.clone());
        let amount = lp_amount.min(self.pool.delta_credit);
        self.debit(&lp, from, amount, Collaborator::LiquidityPool)?;
        self.move_tokens(&want, &lp, to, amount, Collaborator::LiquidityPool)?;
        self.pool.delta_credit -= amount;
        Ok(amount)
    }

    fn router_instant_redeem(
        &mut self,
        pool_id: u64,
        amount: u128,
        recipient: &str,
        sender: &str,
    ) -> CallResult<Vec<ProtocolEvent>> {
        ensure(pool_id == self.params.pool_id, Collaborator::Router, "Stargate: Pool does not exist")?;
        ensure(
            self.balance(&self.addr.liquidity_pool, sender) >= amount,
            Collaborator::Router,
            "Stargate: not enough lp to redeem",
        )?;
        self.instant_redeem(sender, amount, recipient)?;
        Ok(Vec::new())
    }

    fn set_fees(&mut self, pool_id: u64, fee_bps: u128, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        ensure(
            norm(sender) == self.roles.router_owner,
            Collaborator::Router,
            "Ownable: caller is not the owner",
        )?;
        ensure(fee_bps <= MAX_BPS, Collaborator::Router, "Stargate: fee too large")?;
        self.pool.mint_fee_bps.insert(pool_id, fee_bps);
        Ok(Vec::new())
    }

    fn emergency_withdraw(&mut self, sender: &str) -> CallResult<Vec<ProtocolEvent>> {
        let staked = self.staked_of(sender);
        self.unstake(sender, staked)?;
        Ok(Vec::new())
    }
}

// ============================================================================
// SIMULATED PROTOCOL
// ============================================================================

/// In-memory deployment of vault, strategy, pool, router and staker.
#[derive(Debug, Clone)]
pub struct SimulatedProtocol {
    state: SimState,
    snapshots: Vec<SimState>,
}

impl SimulatedProtocol {
    /// Builds a fresh deployment seeded from `params`.
    ///
    /// # Arguments
    ///
    /// * `addresses` - Contract addresses to use for the simulated contracts
    /// * `actors` - Must contain governor, strategist, keeper and router owner
    /// * `params` - Seed balances and pool parameters
    ///
    /// # Returns
    ///
    /// * `Ok(SimulatedProtocol)` - Vault with the strategy activated at 100% debt ratio
    /// * `Err(ScenarioError::SetupError)` - A required role is missing
    pub fn new(addresses: ProtocolAddresses, actors: &ActorBook, params: SimParams) -> CallResult<Self> {
        let roles = Roles {
            governor: actors.get(Role::Governor)?.address.clone(),
            strategist: actors.get(Role::Strategist)?.address.clone(),
            keeper: actors.get(Role::Keeper)?.address.clone(),
            router_owner: actors.get(Role::RouterOwner)?.address.clone(),
        };
        let addr = ProtocolAddresses {
            vault: norm(&addresses.vault),
            strategy: norm(&addresses.strategy),
            want: norm(&addresses.want),
            liquidity_pool: norm(&addresses.liquidity_pool),
            router: norm(&addresses.router),
            lp_staker: norm(&addresses.lp_staker),
            reward_token: addresses.reward_token.as_deref().map(norm),
            trade_factory: addresses.trade_factory.as_deref().map(norm),
        };

        let mut state = SimState {
            addr: addr.clone(),
            roles,
            params: params.clone(),
            now: 1_700_000_000,
            block: 1,
            tx_count: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            native: HashMap::new(),
            staked: HashMap::new(),
            vault: VaultBook {
                debt_ratio: MAX_BPS,
                last_report: 1_700_000_000,
                ..VaultBook::default()
            },
            pool: PoolBook {
                delta_credit: params.initial_delta_credit.raw(),
                mint_fee_bps: HashMap::new(),
                pending_redemptions: Vec::new(),
            },
            do_health_check: true,
            trade_factory: addr.trade_factory.clone(),
        };

        for actor in actors.iter() {
            state.native.insert(actor.address.clone(), params.native_balance.raw());
            match actor.role {
                Role::Depositor => state.credit(&addr.want, &actor.address, params.depositor_balance.raw()),
                Role::Whale => state.credit(&addr.want, &actor.address, params.whale_balance.raw()),
                Role::LpWhale => {
                    let lp = params.lp_whale_balance.raw();
                    state.credit(&addr.liquidity_pool, &actor.address, lp);
                    state.credit(&addr.want, &addr.liquidity_pool, lp);
                }
                _ => {}
            }
        }
        // Delta credit is backed by pool liquidity.
        state.credit(&addr.want, &addr.liquidity_pool, params.initial_delta_credit.raw());

        if let Some(reward) = &addr.reward_token {
            state.credit(reward, &addr.strategy, params.reward_balance.raw());
            if let Some(factory) = &addr.trade_factory {
                state.set_allowance(reward, &addr.strategy, factory, u128::MAX);
            }
        }

        Ok(Self {
            state,
            snapshots: Vec::new(),
        })
    }

    /// Redemptions sent cross-chain and not yet settled.
    pub fn pending_redemptions(&self) -> Vec<(RedeemRoute, AssetAmount)> {
        self.state
            .pool
            .pending_redemptions
            .iter()
            .map(|(route, amount)| (*route, AssetAmount(*amount)))
            .collect()
    }

    fn transact(
        &mut self,
        op: impl FnOnce(&mut SimState) -> CallResult<Vec<ProtocolEvent>>,
    ) -> CallResult<Receipt> {
        let mut next = self.state.clone();
        let events = op(&mut next)?;
        next.tx_count += 1;
        next.block += 1;
        let receipt = Receipt {
            tx_hash: format!("0x{:064x}", next.tx_count),
            events,
        };
        self.state = next;
        Ok(receipt)
    }
}

// ============================================================================
// TRAIT IMPLEMENTATIONS
// ============================================================================

impl Ledger for SimulatedProtocol {
    async fn advance(&mut self, duration: Duration) -> CallResult<()> {
        self.state.now = self.state.now.saturating_add(duration.as_secs());
        Ok(())
    }

    async fn mine(&mut self, blocks: u64) -> CallResult<()> {
        self.state.block = self.state.block.saturating_add(blocks);
        Ok(())
    }

    async fn timestamp(&self) -> CallResult<u64> {
        Ok(self.state.now)
    }

    async fn snapshot(&mut self) -> CallResult<String> {
        self.snapshots.push(self.state.clone());
        Ok(format!("0x{:x}", self.snapshots.len() - 1))
    }

    async fn revert_to(&mut self, snapshot_id: &str) -> CallResult<()> {
        let index = usize::from_str_radix(snapshot_id.trim_start_matches("0x"), 16)
            .map_err(|_| ScenarioError::setup(format!("invalid snapshot id {}", snapshot_id)))?;
        if index >= self.snapshots.len() {
            return Err(ScenarioError::setup(format!("unknown snapshot {}", snapshot_id)));
        }
        self.snapshots.truncate(index + 1);
        if let Some(state) = self.snapshots.pop() {
            self.state = state;
        }
        Ok(())
    }
}

impl Token for SimulatedProtocol {
    async fn approve(
        &mut self,
        token: &str,
        spender: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        self.transact(|s| {
            s.set_allowance(token, &opts.sender.address, spender, amount.raw());
            Ok(Vec::new())
        })
    }

    async fn transfer(
        &mut self,
        token: &str,
        to: &str,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        self.transact(|s| {
            s.move_tokens(token, &opts.sender.address, to, amount.raw(), Collaborator::Token)?;
            Ok(Vec::new())
        })
    }

    async fn balance_of(&self, token: &str, holder: &str) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.balance(token, holder)))
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.allowance(token, owner, spender)))
    }

    async fn transfer_native(&mut self, to: &str, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| {
            s.pay_native(&opts.sender.address, to, opts.value.raw())?;
            Ok(Vec::new())
        })
    }

    async fn native_balance(&self, holder: &str) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.native_of(holder)))
    }
}

impl Vault for SimulatedProtocol {
    async fn deposit(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.deposit(amount.raw(), &opts.sender.address))
    }

    async fn withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.withdraw(&opts.sender.address))
    }

    async fn update_strategy_debt_ratio(&mut self, ratio_bps: u128, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.update_debt_ratio(ratio_bps, &opts.sender.address))
    }

    async fn debt_outstanding(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.debt_outstanding()))
    }

    async fn price_per_share(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.price_per_share()))
    }

    async fn strategy_totals(&self) -> CallResult<(AssetAmount, AssetAmount)> {
        Ok((
            AssetAmount(self.state.vault.total_gain),
            AssetAmount(self.state.vault.total_loss),
        ))
    }
}

impl Strategy for SimulatedProtocol {
    async fn harvest(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.harvest(&opts.sender.address))
    }

    async fn tend(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.tend(&opts.sender.address))
    }

    async fn set_do_health_check(&mut self, enabled: bool, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| {
            ensure(s.is_authorized(&opts.sender.address), Collaborator::Strategy, "!authorized")?;
            s.do_health_check = enabled;
            Ok(Vec::new())
        })
    }

    async fn estimated_total_assets(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.estimated_total_assets()))
    }

    async fn balance_of_staked_lp(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.staked_of(&self.state.addr.strategy)))
    }

    async fn balance_of_unstaked_lp(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.unstaked_lp()))
    }

    async fn unstake_lp(&mut self, amount: AssetAmount, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| {
            ensure(s.is_authorized(&opts.sender.address), Collaborator::Strategy, "!authorized")?;
            let strategy = s.addr.strategy.clone();
            s.unstake(&strategy, amount.raw())?;
            Ok(Vec::new())
        })
    }

    async fn redeem_local(
        &mut self,
        route: &RedeemRoute,
        amount: AssetAmount,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        self.transact(|s| s.redeem_local(route, amount.raw(), opts))
    }

    async fn sweep(&mut self, token: &str, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.sweep(token, &opts.sender.address))
    }

    async fn harvest_trigger(&self, _call_cost: AssetAmount) -> CallResult<bool> {
        Ok(self.state.harvest_trigger())
    }

    async fn tend_trigger(&self, _call_cost: AssetAmount) -> CallResult<bool> {
        Ok(false)
    }

    async fn remove_trade_factory_permissions(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.remove_trade_factory(&opts.sender.address))
    }

    async fn trade_factory(&self) -> CallResult<String> {
        Ok(self
            .state
            .trade_factory
            .clone()
            .unwrap_or_else(|| ZERO_ADDRESS.to_string()))
    }

    async fn initialize(&mut self, _opts: &TxOptions) -> CallResult<Receipt> {
        // The simulated strategy is initialized when the deployment is built.
        self.transact(|_| Err(ScenarioError::rejected(Collaborator::Strategy, "Strategy already initialized")))
    }
}

impl LiquidityPool for SimulatedProtocol {
    async fn delta_credit(&self) -> CallResult<AssetAmount> {
        Ok(AssetAmount(self.state.pool.delta_credit))
    }

    async fn pool_id(&self) -> CallResult<u64> {
        Ok(self.state.params.pool_id)
    }
}

impl Router for SimulatedProtocol {
    async fn instant_redeem_local(
        &mut self,
        pool_id: u64,
        amount: AssetAmount,
        recipient: &str,
        opts: &TxOptions,
    ) -> CallResult<Receipt> {
        self.transact(|s| s.router_instant_redeem(pool_id, amount.raw(), recipient, &opts.sender.address))
    }

    async fn set_fees(&mut self, pool_id: u64, mint_fee_bps: u128, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.set_fees(pool_id, mint_fee_bps, &opts.sender.address))
    }
}

impl LpStaker for SimulatedProtocol {
    async fn emergency_withdraw(&mut self, opts: &TxOptions) -> CallResult<Receipt> {
        self.transact(|s| s.emergency_withdraw(&opts.sender.address))
    }
}

impl Protocol for SimulatedProtocol {
    fn addresses(&self) -> &ProtocolAddresses {
        &self.state.addr
    }

    async fn ensure_ready(&self) -> CallResult<()> {
        if !self.state.params.strategy_activated {
            return Err(ScenarioError::setup(format!(
                "strategy {} is not activated in vault {}",
                self.state.addr.strategy, self.state.addr.vault
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Actor;

    fn actors() -> ActorBook {
        ActorBook::new()
            .with(Role::Depositor, "0x0000000000000000000000000000000000000d01")
            .with(Role::Governor, "0x0000000000000000000000000000000000000d02")
            .with(Role::Strategist, "0x0000000000000000000000000000000000000d03")
            .with(Role::Keeper, "0x0000000000000000000000000000000000000d04")
            .with(Role::RouterOwner, "0x0000000000000000000000000000000000000d05")
    }

    fn depositor() -> Actor {
        Actor::new(Role::Depositor, "0x0000000000000000000000000000000000000d01")
    }

    #[tokio::test]
    async fn rejected_call_leaves_state_untouched() {
        let mut sim = SimulatedProtocol::new(default_sim_addresses(), &actors(), SimParams::default()).unwrap();
        let opts = TxOptions::sent_by(&depositor());
        let want = sim.addresses().want.clone();
        let before = sim.balance_of(&want, &opts.sender.address).await.unwrap();

        // No allowance granted: the transfer inside deposit must not stick.
        let err = sim.deposit(AssetAmount(1_000), &opts).await.unwrap_err();
        assert_eq!(err.rejection_reason(), Some("ERC20: insufficient allowance"));
        assert_eq!(sim.balance_of(&want, &opts.sender.address).await.unwrap(), before);
    }

    #[test]
    fn locked_profit_decays_linearly() {
        let mut sim = SimulatedProtocol::new(default_sim_addresses(), &actors(), SimParams::default()).unwrap();
        sim.state.vault.locked_profit = 600;
        sim.state.now = sim.state.vault.last_report + LOCKED_PROFIT_DEGRADATION_SECS / 2;
        assert_eq!(sim.state.locked_profit_now(), 300);
        sim.state.now = sim.state.vault.last_report + LOCKED_PROFIT_DEGRADATION_SECS;
        assert_eq!(sim.state.locked_profit_now(), 0);
    }

    #[tokio::test]
    async fn advance_saturates_the_clock() {
        let mut sim = SimulatedProtocol::new(default_sim_addresses(), &actors(), SimParams::default()).unwrap();
        sim.advance(Duration::from_secs(u64::MAX)).await.unwrap();
        assert_eq!(sim.timestamp().await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn initialize_is_rejected_and_factory_cleared_on_removal() {
        let mut sim = SimulatedProtocol::new(default_sim_addresses(), &actors(), SimParams::default()).unwrap();
        let governor = TxOptions::sent_by(&Actor::new(Role::Governor, "0x0000000000000000000000000000000000000d02"));

        let err = sim.initialize(&governor).await.unwrap_err();
        assert_eq!(err.rejection_reason(), Some("Strategy already initialized"));

        assert_eq!(sim.trade_factory().await.unwrap(), "0x00000000000000000000000000000000000000a8");
        sim.remove_trade_factory_permissions(&governor).await.unwrap();
        assert_eq!(sim.trade_factory().await.unwrap(), ZERO_ADDRESS);
    }

    #[test]
    fn mint_fee_reduces_minted_lp() {
        let mut sim = SimulatedProtocol::new(default_sim_addresses(), &actors(), SimParams::default()).unwrap();
        let depositor = depositor().address;
        sim.state.pool.mint_fee_bps.insert(1, 300);
        let minted = sim.state.add_liquidity(&depositor, 1_000).unwrap();
        assert_eq!(minted, 970);
    }
}
