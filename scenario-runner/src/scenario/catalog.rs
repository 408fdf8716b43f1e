//! Scenario Catalog
//!
//! The strategy's integration scenarios, parameterized by deposit amount,
//! tolerance and the asset-specific redeem route.

use serde::Deserialize;
use std::time::Duration;

use crate::amount::{AssetAmount, Role};
use crate::error::{CallResult, ScenarioError};
use crate::protocol::{EventField, EventKind, RedeemRoute};
use crate::scenario::step::{Action, Expectation, Observable, Scenario, TargetRef, TokenRef, ValueExpr};

/// Names accepted by `build`, in catalog order.
pub const SCENARIO_NAMES: [&str; 11] = [
    "operation",
    "change_debt",
    "sweep",
    "triggers",
    "losses",
    "redeem_local",
    "limited_delta_credit_profit",
    "mint_fee",
    "profitable_harvest",
    "remove_trade_factory",
    "double_init",
];

/// Time for locked profit to fully unlock in the vault.
const PROFIT_UNLOCK: Duration = Duration::from_secs(6 * 3600);
const ONE_SECOND: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenarioParams {
    /// Amount deposited by the depositor
    pub amount: AssetAmount,
    /// Default relative tolerance for approximate expectations
    pub relative_tolerance: f64,
    /// Destination used by `redeem_local`; filled from the asset profile
    #[serde(skip)]
    pub redeem_route: Option<RedeemRoute>,
    /// Native value attached to `redeem_local`
    pub redeem_fee: AssetAmount,
    /// Native value the whale sends the governor before redeeming
    pub gas_top_up: AssetAmount,
    /// Pools whose mint fee is raised in `mint_fee`
    pub mint_fee_pool_ids: Vec<u64>,
    pub mint_fee_bps: u64,
    /// Simulated gain, as a share of `amount`
    pub profit_bps: u64,
    /// Reward tokens the strategy may keep after a profitable harvest;
    /// `None` skips the check (no reward token configured)
    pub reward_dust: Option<AssetAmount>,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            amount: AssetAmount(1_000 * 10u128.pow(6)),
            relative_tolerance: 1e-3,
            redeem_route: None,
            redeem_fee: AssetAmount(100_000_000_000_000_000),
            gas_top_up: AssetAmount(1_000_000_000_000_000_000),
            mint_fee_pool_ids: vec![1, 2, 13],
            mint_fee_bps: 300,
            profit_bps: 100,
            reward_dust: Some(AssetAmount(10u128.pow(18))),
        }
    }
}

/// Builds the named scenario.
///
/// # Returns
///
/// * `Ok(Scenario)` - Ready to run
/// * `Err(ScenarioError::SetupError)` - Unknown name, or a parameter the scenario needs is missing
pub fn build(name: &str, params: &ScenarioParams) -> CallResult<Scenario> {
    let scenario = match name {
        "operation" => operation(params),
        "change_debt" => change_debt(params),
        "sweep" => sweep(params),
        "triggers" => triggers(params),
        "losses" => losses(params),
        "redeem_local" => redeem_local(params)?,
        "limited_delta_credit_profit" => limited_delta_credit_profit(params),
        "mint_fee" => mint_fee(params),
        "profitable_harvest" => profitable_harvest(params),
        "remove_trade_factory" => remove_trade_factory(params),
        "double_init" => double_init(params),
        other => {
            return Err(ScenarioError::setup(format!(
                "unknown scenario '{}' (known: {})",
                other,
                SCENARIO_NAMES.join(", ")
            )))
        }
    };
    Ok(scenario.tolerance(params.relative_tolerance))
}

// ============================================================================
// SHARED FRAGMENTS
// ============================================================================

fn balance(token: TokenRef, holder: TargetRef) -> ValueExpr {
    ValueExpr::observe(Observable::Balance { token, holder })
}

fn want_of(holder: TargetRef) -> ValueExpr {
    balance(TokenRef::Want, holder)
}

fn eta() -> ValueExpr {
    ValueExpr::observe(Observable::EstimatedTotalAssets)
}

fn amount(params: &ScenarioParams) -> ValueExpr {
    ValueExpr::constant(params.amount)
}

/// Approve, deposit, and check the vault received exactly the deposit.
fn deposit(scenario: Scenario, params: &ScenarioParams) -> Scenario {
    scenario
        .call(
            Role::Depositor,
            Action::Approve {
                token: TokenRef::Want,
                spender: TargetRef::Vault,
                amount: amount(params),
            },
        )
        .call(Role::Depositor, Action::Deposit { amount: amount(params) })
        .expect(Expectation::exact(
            "vault holds the deposit",
            want_of(TargetRef::Vault),
            amount(params),
        ))
}

/// Wait a second, harvest as governor, and check the strategy holds about `expected`.
fn harvest_expecting(scenario: Scenario, expected: ValueExpr) -> Scenario {
    scenario
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .expect(Expectation::approx("strategy assets after harvest", eta(), expected))
}

fn set_debt_ratio(scenario: Scenario, ratio_bps: u128) -> Scenario {
    scenario.call(Role::Governor, Action::UpdateDebtRatio { ratio_bps })
}

fn disable_health_check(scenario: Scenario) -> Scenario {
    scenario.call(Role::Governor, Action::SetDoHealthCheck { enabled: false })
}

// ============================================================================
// SCENARIOS
// ============================================================================

fn operation(params: &ScenarioParams) -> Scenario {
    let s = Scenario::new("operation", "deposit, harvest, tend and withdraw without loss")
        .record("depositor_before", want_of(TargetRef::Actor(Role::Depositor)));
    let s = deposit(s, params);
    let s = harvest_expecting(s, amount(params));
    s.call(Role::Keeper, Action::Tend)
        .call(Role::Depositor, Action::Withdraw)
        .expect(Expectation::approx(
            "depositor got the deposit back",
            want_of(TargetRef::Actor(Role::Depositor)),
            ValueExpr::var("depositor_before"),
        ))
}

fn change_debt(params: &ScenarioParams) -> Scenario {
    let s = deposit(Scenario::new("change_debt", "debt follows the debt ratio both ways"), params);

    let s = set_debt_ratio(s, 5_000);
    let s = harvest_expecting(s, amount(params).bps(5_000));
    let s = set_debt_ratio(s, 10_000);
    let s = harvest_expecting(s, amount(params));
    let s = set_debt_ratio(s, 5_000);
    harvest_expecting(s, amount(params).bps(5_000))
}

fn sweep(params: &ScenarioParams) -> Scenario {
    Scenario::new("sweep", "protected tokens cannot be swept")
        .call(
            Role::Depositor,
            Action::Transfer {
                token: TokenRef::Want,
                to: TargetRef::Strategy,
                amount: amount(params),
            },
        )
        .expect(Expectation::greater_than(
            "strategy holds want",
            want_of(TargetRef::Strategy),
            AssetAmount::ZERO,
        ))
        .expect_revert(Role::Governor, Action::Sweep { token: TokenRef::Want }, "!want")
        .expect_revert(Role::Governor, Action::Sweep { token: TokenRef::VaultShares }, "!shares")
}

fn triggers(params: &ScenarioParams) -> Scenario {
    let s = deposit(Scenario::new("triggers", "trigger views answer after a harvest"), params);
    set_debt_ratio(s, 5_000)
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .record("harvest_trigger", Observable::HarvestTrigger)
        .record("tend_trigger", Observable::TendTrigger)
}

fn losses(params: &ScenarioParams) -> Scenario {
    let s = Scenario::new("losses", "a lost LP position is reported and passed on to depositors")
        .record("depositor_before", want_of(TargetRef::Actor(Role::Depositor)));
    let s = deposit(s, params);
    let s = harvest_expecting(s, amount(params));

    disable_health_check(
        s.call(Role::Keeper, Action::Tend)
            .call(Role::StrategyAccount, Action::StakerEmergencyWithdraw)
            .call(
                Role::StrategyAccount,
                Action::Transfer {
                    token: TokenRef::LpToken,
                    to: TargetRef::Zero,
                    amount: balance(TokenRef::LpToken, TargetRef::Strategy),
                },
            )
            .advance(ONE_SECOND),
    )
    .call(Role::Governor, Action::Harvest)
    .expect(Expectation::approx(
        "reported loss equals the deposit",
        Observable::LastEvent {
            kind: EventKind::StrategyReported,
            field: EventField::Loss,
        },
        amount(params),
    ))
    .call(Role::Depositor, Action::Withdraw)
    .expect(Expectation::approx(
        "depositor bears the loss",
        want_of(TargetRef::Actor(Role::Depositor)),
        ValueExpr::var("depositor_before").minus(amount(params)),
    ))
}

fn redeem_local(params: &ScenarioParams) -> CallResult<Scenario> {
    let route = params
        .redeem_route
        .ok_or_else(|| ScenarioError::setup("redeem_local needs a redeem route for the configured asset"))?;

    let s = deposit(Scenario::new("redeem_local", "unstaked LP is redeemed cross-chain"), params);
    let s = harvest_expecting(disable_health_check(s), amount(params));

    Ok(s
        .call(
            Role::LpWhale,
            Action::InstantRedeemLocal {
                amount: ValueExpr::observe(Observable::DeltaCredit),
                recipient: TargetRef::Actor(Role::Strategist),
            },
        )
        .expect(Expectation::less_than(
            "delta credit drained",
            Observable::DeltaCredit,
            amount(params),
        ))
        .expect(Expectation::greater_than("LP is staked", Observable::StakedLp, AssetAmount::ZERO))
        .call(
            Role::Governor,
            Action::UnstakeLp {
                amount: ValueExpr::observe(Observable::StakedLp),
            },
        )
        .expect(Expectation::greater_than("LP is unstaked", Observable::UnstakedLp, AssetAmount::ZERO))
        .expect(Expectation::exact("nothing left staked", Observable::StakedLp, AssetAmount::ZERO))
        .call(
            Role::Whale,
            Action::TransferNative {
                to: TargetRef::Actor(Role::Governor),
                amount: ValueExpr::constant(params.gas_top_up),
            },
        )
        .call(
            Role::Governor,
            Action::RedeemLocal {
                route,
                amount: ValueExpr::observe(Observable::UnstakedLp),
                fee: ValueExpr::constant(params.redeem_fee),
            },
        )
        .expect(Expectation::exact(
            "all unstaked LP redeemed",
            Observable::UnstakedLp,
            AssetAmount::ZERO,
        )))
}

fn limited_delta_credit_profit(params: &ScenarioParams) -> Scenario {
    let s = deposit(
        Scenario::new(
            "limited_delta_credit_profit",
            "profit that cannot be redeemed stays as outstanding debt",
        ),
        params,
    );
    let s = harvest_expecting(disable_health_check(s), amount(params));

    s.advance(ONE_SECOND)
        .call(
            Role::LpWhale,
            Action::Transfer {
                token: TokenRef::LpToken,
                to: TargetRef::Strategy,
                amount: amount(params),
            },
        )
        .call(
            Role::LpWhale,
            Action::InstantRedeemLocal {
                amount: ValueExpr::observe(Observable::DeltaCredit)
                    .min_with(balance(TokenRef::LpToken, TargetRef::Actor(Role::LpWhale))),
                recipient: TargetRef::Actor(Role::Strategist),
            },
        )
        .expect(Expectation::less_than(
            "delta credit drained",
            Observable::DeltaCredit,
            amount(params),
        ))
        .call(Role::Governor, Action::UpdateDebtRatio { ratio_bps: 0 })
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .expect(Expectation::greater_than(
            "debt remains outstanding",
            Observable::DebtOutstanding,
            AssetAmount::ZERO,
        ))
}

fn mint_fee(params: &ScenarioParams) -> Scenario {
    let mut s = Scenario::new("mint_fee", "router mint fee is reported as a loss on exit");
    for pool_id in &params.mint_fee_pool_ids {
        s = s.call(
            Role::RouterOwner,
            Action::SetMintFee {
                pool_id: *pool_id,
                fee_bps: u128::from(params.mint_fee_bps),
            },
        );
    }
    let s = disable_health_check(deposit(s, params))
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .call(
            Role::Whale,
            Action::Transfer {
                token: TokenRef::Want,
                to: TargetRef::Strategy,
                amount: amount(params).bps(u128::from(params.profit_bps)),
            },
        );
    let expected_loss = params.mint_fee_bps.saturating_sub(params.profit_bps);

    disable_health_check(set_debt_ratio(s, 0))
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .expect(Expectation::approx(
            "loss is the mint fee net of the gain",
            Observable::LastEvent {
                kind: EventKind::StrategyReported,
                field: EventField::Loss,
            },
            amount(params).bps(u128::from(expected_loss)),
        ))
}

/// The trade factory's swap of reward tokens into want is not replayed: the
/// swap output is airdropped as want by the whale.
fn profitable_harvest(params: &ScenarioParams) -> Scenario {
    let s = deposit(
        Scenario::new("profitable_harvest", "harvested profit raises the share price once unlocked"),
        params,
    );
    let s = harvest_expecting(s, amount(params));

    let s = s
        .call(
            Role::Whale,
            Action::Transfer {
                token: TokenRef::Want,
                to: TargetRef::Strategy,
                amount: amount(params).bps(u128::from(params.profit_bps)),
            },
        )
        .call(Role::Strategist, Action::Harvest)
        .expect(Expectation::greater_than(
            "harvest reports profit",
            Observable::LastEvent {
                kind: EventKind::Harvested,
                field: EventField::Profit,
            },
            AssetAmount::ZERO,
        ))
        .record("pps_before", Observable::PricePerShare)
        .advance(ONE_SECOND)
        .call(Role::Governor, Action::Harvest)
        .advance(PROFIT_UNLOCK)
        .mine(1)
        .expect(Expectation::greater_than(
            "strategy and vault hold more than the deposit",
            eta().plus(want_of(TargetRef::Vault)),
            amount(params),
        ))
        .expect(Expectation::greater_than(
            "share price increased",
            Observable::PricePerShare,
            ValueExpr::var("pps_before"),
        ));

    match params.reward_dust {
        Some(dust) => s.expect(Expectation::less_than(
            "only reward dust left in the strategy",
            balance(TokenRef::Reward, TargetRef::Strategy),
            dust,
        )),
        None => s,
    }
}

fn remove_trade_factory(_params: &ScenarioParams) -> Scenario {
    let reward_allowance = || Observable::Allowance {
        token: TokenRef::Reward,
        owner: TargetRef::Strategy,
        spender: TargetRef::TradeFactory,
    };

    Scenario::new("remove_trade_factory", "removing the trade factory revokes its allowance")
        .expect(Expectation::exact(
            "strategy uses the configured trade factory",
            Observable::TradeFactoryIsConfigured,
            AssetAmount(1),
        ))
        .expect(Expectation::greater_than(
            "trade factory may pull rewards",
            reward_allowance(),
            AssetAmount::ZERO,
        ))
        .call(Role::Governor, Action::RemoveTradeFactory)
        .expect(Expectation::exact(
            "trade factory replaced",
            Observable::TradeFactoryIsConfigured,
            AssetAmount::ZERO,
        ))
        .expect(Expectation::exact(
            "allowance revoked",
            reward_allowance(),
            AssetAmount::ZERO,
        ))
}

fn double_init(params: &ScenarioParams) -> Scenario {
    let s = deposit(
        Scenario::new("double_init", "an initialized strategy cannot be initialized again"),
        params,
    );
    let s = harvest_expecting(s, amount(params));

    s.expect_any_revert(Role::Governor, Action::Initialize)
        .expect_any_revert(Role::Strategist, Action::Initialize)
        .expect(Expectation::approx(
            "strategy position untouched",
            eta(),
            amount(params),
        ))
}
