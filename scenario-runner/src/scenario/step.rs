//! Scenario model
//!
//! A `Scenario` is an ordered list of `ScenarioStep`s. Values used by calls and
//! expectations are `ValueExpr`s, evaluated against the live collaborators
//! right before the step that uses them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::amount::{AssetAmount, Role};
use crate::error::{CallResult, ScenarioError};
use crate::protocol::{EventField, EventKind, RedeemRoute};

// ============================================================================
// REFERENCES
// ============================================================================

/// Token a step refers to, resolved to an address at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenRef {
    /// The vault's underlying asset
    Want,
    /// The bridge pool's LP token
    LpToken,
    /// Vault shares
    VaultShares,
    /// Emission token handled by the trade factory
    Reward,
    Address(String),
}

/// Account or contract a step refers to, resolved to an address at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Actor(Role),
    Vault,
    Strategy,
    LiquidityPool,
    Router,
    LpStaker,
    TradeFactory,
    /// The zero address (burn)
    Zero,
    Address(String),
}

// ============================================================================
// VALUES
// ============================================================================

/// Collaborator value read at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Observable {
    Balance { token: TokenRef, holder: TargetRef },
    Allowance { token: TokenRef, owner: TargetRef, spender: TargetRef },
    NativeBalance { holder: TargetRef },
    EstimatedTotalAssets,
    StakedLp,
    UnstakedLp,
    DeltaCredit,
    DebtOutstanding,
    PricePerShare,
    StrategyTotalGain,
    StrategyTotalLoss,
    /// `harvest_trigger(0)` as 0 or 1
    HarvestTrigger,
    /// `tend_trigger(0)` as 0 or 1
    TendTrigger,
    /// 1 while the strategy still uses the configured trade factory, else 0
    TradeFactoryIsConfigured,
    /// Field of an event emitted by the most recent call
    LastEvent { kind: EventKind, field: EventField },
    /// Ledger timestamp in seconds
    Timestamp,
}

/// Amount computed from constants, observations and recorded variables.
///
/// Arithmetic saturates at zero and `u128::MAX`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Const(AssetAmount),
    Observe(Observable),
    Var(String),
    Add(Box<ValueExpr>, Box<ValueExpr>),
    Sub(Box<ValueExpr>, Box<ValueExpr>),
    Min(Box<ValueExpr>, Box<ValueExpr>),
    /// Scales by basis points (`5_000` = half)
    Bps(Box<ValueExpr>, u128),
}

impl ValueExpr {
    pub fn constant(value: impl Into<AssetAmount>) -> Self {
        ValueExpr::Const(value.into())
    }

    pub fn observe(observable: Observable) -> Self {
        ValueExpr::Observe(observable)
    }

    pub fn var(name: &str) -> Self {
        ValueExpr::Var(name.to_string())
    }

    pub fn plus(self, other: ValueExpr) -> Self {
        ValueExpr::Add(Box::new(self), Box::new(other))
    }

    pub fn minus(self, other: ValueExpr) -> Self {
        ValueExpr::Sub(Box::new(self), Box::new(other))
    }

    pub fn min_with(self, other: ValueExpr) -> Self {
        ValueExpr::Min(Box::new(self), Box::new(other))
    }

    pub fn bps(self, bps: u128) -> Self {
        ValueExpr::Bps(Box::new(self), bps)
    }

    /// Collects every observable the expression reads.
    pub fn observables(&self, out: &mut Vec<Observable>) {
        match self {
            ValueExpr::Observe(observable) => {
                if !out.contains(observable) {
                    out.push(observable.clone());
                }
            }
            ValueExpr::Add(a, b) | ValueExpr::Sub(a, b) | ValueExpr::Min(a, b) => {
                a.observables(out);
                b.observables(out);
            }
            ValueExpr::Bps(inner, _) => inner.observables(out),
            ValueExpr::Const(_) | ValueExpr::Var(_) => {}
        }
    }

    /// Computes the value from pre-fetched observations.
    ///
    /// # Arguments
    ///
    /// * `observed` - Values for every observable returned by `observables`
    /// * `vars` - Variables recorded by earlier steps
    ///
    /// # Returns
    ///
    /// * `Ok(AssetAmount)` - The computed amount
    /// * `Err(ScenarioError::SetupError)` - Unknown variable or missing observation
    pub fn eval(
        &self,
        observed: &HashMap<Observable, AssetAmount>,
        vars: &HashMap<String, AssetAmount>,
    ) -> CallResult<AssetAmount> {
        Ok(match self {
            ValueExpr::Const(value) => *value,
            ValueExpr::Observe(observable) => *observed
                .get(observable)
                .ok_or_else(|| ScenarioError::setup(format!("{:?} was not observed", observable)))?,
            ValueExpr::Var(name) => *vars
                .get(name)
                .ok_or_else(|| ScenarioError::setup(format!("variable '{}' used before it was recorded", name)))?,
            ValueExpr::Add(a, b) => a.eval(observed, vars)?.saturating_add(b.eval(observed, vars)?),
            ValueExpr::Sub(a, b) => a.eval(observed, vars)?.saturating_sub(b.eval(observed, vars)?),
            ValueExpr::Min(a, b) => a.eval(observed, vars)?.min(b.eval(observed, vars)?),
            ValueExpr::Bps(inner, bps) => inner.eval(observed, vars)?.scale_bps(*bps),
        })
    }
}

impl From<AssetAmount> for ValueExpr {
    fn from(value: AssetAmount) -> Self {
        ValueExpr::Const(value)
    }
}

impl From<Observable> for ValueExpr {
    fn from(observable: Observable) -> Self {
        ValueExpr::Observe(observable)
    }
}

// ============================================================================
// EXPECTATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    /// Relative-tolerance equality; `None` uses the scenario default
    Approx { tolerance: Option<f64> },
    Exact,
    GreaterThan,
    LessThan,
}

/// Post-condition checked by an `Assert` step.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub description: String,
    pub actual: ValueExpr,
    pub comparison: Comparison,
    pub expected: ValueExpr,
}

impl Expectation {
    fn new(description: &str, actual: ValueExpr, comparison: Comparison, expected: ValueExpr) -> Self {
        Self {
            description: description.to_string(),
            actual,
            comparison,
            expected,
        }
    }

    pub fn approx(description: &str, actual: impl Into<ValueExpr>, expected: impl Into<ValueExpr>) -> Self {
        Self::new(description, actual.into(), Comparison::Approx { tolerance: None }, expected.into())
    }

    pub fn exact(description: &str, actual: impl Into<ValueExpr>, expected: impl Into<ValueExpr>) -> Self {
        Self::new(description, actual.into(), Comparison::Exact, expected.into())
    }

    pub fn greater_than(description: &str, actual: impl Into<ValueExpr>, bound: impl Into<ValueExpr>) -> Self {
        Self::new(description, actual.into(), Comparison::GreaterThan, bound.into())
    }

    pub fn less_than(description: &str, actual: impl Into<ValueExpr>, bound: impl Into<ValueExpr>) -> Self {
        Self::new(description, actual.into(), Comparison::LessThan, bound.into())
    }

    /// Overrides the scenario tolerance for an approximate comparison.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        if let Comparison::Approx { .. } = self.comparison {
            self.comparison = Comparison::Approx {
                tolerance: Some(tolerance),
            };
        }
        self
    }
}

// ============================================================================
// ACTIONS AND STEPS
// ============================================================================

/// State-mutating call on a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Approve { token: TokenRef, spender: TargetRef, amount: ValueExpr },
    Transfer { token: TokenRef, to: TargetRef, amount: ValueExpr },
    TransferNative { to: TargetRef, amount: ValueExpr },
    Deposit { amount: ValueExpr },
    /// Redeems all of the sender's shares
    Withdraw,
    UpdateDebtRatio { ratio_bps: u128 },
    Harvest,
    Tend,
    SetDoHealthCheck { enabled: bool },
    UnstakeLp { amount: ValueExpr },
    /// Cross-chain redemption; `fee` is sent as native value
    RedeemLocal { route: RedeemRoute, amount: ValueExpr, fee: ValueExpr },
    /// Redemption through the router, capped by the pool's delta credit
    InstantRedeemLocal { amount: ValueExpr, recipient: TargetRef },
    Sweep { token: TokenRef },
    SetMintFee { pool_id: u64, fee_bps: u128 },
    StakerEmergencyWithdraw,
    RemoveTradeFactory,
    /// Re-runs the strategy initializer
    Initialize,
}

impl Action {
    /// Value expressions the action reads.
    pub fn amounts(&self) -> Vec<&ValueExpr> {
        match self {
            Action::Approve { amount, .. }
            | Action::Transfer { amount, .. }
            | Action::TransferNative { amount, .. }
            | Action::Deposit { amount }
            | Action::UnstakeLp { amount }
            | Action::InstantRedeemLocal { amount, .. } => vec![amount],
            Action::RedeemLocal { amount, fee, .. } => vec![amount, fee],
            _ => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Approve { .. } => "approve",
            Action::Transfer { .. } => "transfer",
            Action::TransferNative { .. } => "transfer_native",
            Action::Deposit { .. } => "deposit",
            Action::Withdraw => "withdraw",
            Action::UpdateDebtRatio { .. } => "update_debt_ratio",
            Action::Harvest => "harvest",
            Action::Tend => "tend",
            Action::SetDoHealthCheck { .. } => "set_do_health_check",
            Action::UnstakeLp { .. } => "unstake_lp",
            Action::RedeemLocal { .. } => "redeem_local",
            Action::InstantRedeemLocal { .. } => "instant_redeem_local",
            Action::Sweep { .. } => "sweep",
            Action::SetMintFee { .. } => "set_mint_fee",
            Action::StakerEmergencyWithdraw => "staker_emergency_withdraw",
            Action::RemoveTradeFactory => "remove_trade_factory",
            Action::Initialize => "initialize",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioStep {
    Call { sender: Role, action: Action },
    AdvanceTime(Duration),
    Mine(u64),
    /// Evaluates `value` and stores it under `name`
    Record { name: String, value: ValueExpr },
    Assert(Expectation),
    /// The call must be rejected; with exactly `reason` when one is given
    ExpectRevert {
        sender: Role,
        action: Action,
        reason: Option<String>,
    },
}

impl fmt::Display for ScenarioStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStep::Call { sender, action } => write!(f, "{} by {}", action.name(), sender),
            ScenarioStep::AdvanceTime(d) => write!(f, "advance time {}s", d.as_secs()),
            ScenarioStep::Mine(blocks) => write!(f, "mine {} block(s)", blocks),
            ScenarioStep::Record { name, .. } => write!(f, "record {}", name),
            ScenarioStep::Assert(expectation) => write!(f, "assert {}", expectation.description),
            ScenarioStep::ExpectRevert {
                sender,
                action,
                reason: Some(reason),
            } => write!(f, "{} by {} reverts with '{}'", action.name(), sender, reason),
            ScenarioStep::ExpectRevert {
                sender,
                action,
                reason: None,
            } => write!(f, "{} by {} reverts", action.name(), sender),
        }
    }
}

// ============================================================================
// SCENARIO
// ============================================================================

/// Named, ordered list of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    /// Default relative tolerance for approximate expectations
    pub relative_tolerance: f64,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            relative_tolerance: 1e-5,
            steps: Vec::new(),
        }
    }

    pub fn tolerance(mut self, relative_tolerance: f64) -> Self {
        self.relative_tolerance = relative_tolerance;
        self
    }

    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn call(self, sender: Role, action: Action) -> Self {
        self.step(ScenarioStep::Call { sender, action })
    }

    pub fn advance(self, duration: Duration) -> Self {
        self.step(ScenarioStep::AdvanceTime(duration))
    }

    pub fn mine(self, blocks: u64) -> Self {
        self.step(ScenarioStep::Mine(blocks))
    }

    pub fn record(self, name: &str, value: impl Into<ValueExpr>) -> Self {
        self.step(ScenarioStep::Record {
            name: name.to_string(),
            value: value.into(),
        })
    }

    pub fn expect(self, expectation: Expectation) -> Self {
        self.step(ScenarioStep::Assert(expectation))
    }

    pub fn expect_revert(self, sender: Role, action: Action, reason: &str) -> Self {
        self.step(ScenarioStep::ExpectRevert {
            sender,
            action,
            reason: Some(reason.to_string()),
        })
    }

    /// The call must be rejected, for whatever reason.
    pub fn expect_any_revert(self, sender: Role, action: Action) -> Self {
        self.step(ScenarioStep::ExpectRevert {
            sender,
            action,
            reason: None,
        })
    }

    /// Every role that signs a call in this scenario or is referenced anywhere
    /// as a target, including inside the values steps read.
    pub fn required_roles(&self) -> HashSet<Role> {
        fn target_role(target: &TargetRef, roles: &mut HashSet<Role>) {
            if let TargetRef::Actor(role) = target {
                roles.insert(*role);
            }
        }

        let mut roles = HashSet::new();
        let mut observables = Vec::new();
        for step in &self.steps {
            match step {
                ScenarioStep::Call { sender, action } | ScenarioStep::ExpectRevert { sender, action, .. } => {
                    roles.insert(*sender);
                    match action {
                        Action::Approve { spender, .. } => target_role(spender, &mut roles),
                        Action::Transfer { to, .. } | Action::TransferNative { to, .. } => {
                            target_role(to, &mut roles)
                        }
                        Action::InstantRedeemLocal { recipient, .. } => target_role(recipient, &mut roles),
                        _ => {}
                    }
                    for expr in action.amounts() {
                        expr.observables(&mut observables);
                    }
                }
                ScenarioStep::Record { value, .. } => value.observables(&mut observables),
                ScenarioStep::Assert(expectation) => {
                    expectation.actual.observables(&mut observables);
                    expectation.expected.observables(&mut observables);
                }
                ScenarioStep::AdvanceTime(_) | ScenarioStep::Mine(_) => {}
            }
        }

        for observable in &observables {
            match observable {
                Observable::Balance { holder, .. } | Observable::NativeBalance { holder } => {
                    target_role(holder, &mut roles)
                }
                Observable::Allowance { owner, spender, .. } => {
                    target_role(owner, &mut roles);
                    target_role(spender, &mut roles);
                }
                _ => {}
            }
        }
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_saturates_and_scales() {
        let observed = HashMap::new();
        let mut vars = HashMap::new();
        vars.insert("before".to_string(), AssetAmount(1_000));

        let expr = ValueExpr::var("before")
            .minus(ValueExpr::constant(AssetAmount(1_500)))
            .plus(ValueExpr::constant(AssetAmount(10)));
        assert_eq!(expr.eval(&observed, &vars).unwrap(), AssetAmount(10));

        let half = ValueExpr::var("before").bps(5_000);
        assert_eq!(half.eval(&observed, &vars).unwrap(), AssetAmount(500));
    }

    #[test]
    fn eval_unknown_variable_is_setup_error() {
        let err = ValueExpr::var("missing")
            .eval(&HashMap::new(), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ScenarioError::SetupError { .. }));
    }

    #[test]
    fn required_roles_include_observed_holders() {
        let scenario = Scenario::new("roles", "")
            .call(Role::Depositor, Action::Deposit {
                amount: ValueExpr::observe(Observable::Balance {
                    token: TokenRef::Want,
                    holder: TargetRef::Actor(Role::Depositor),
                }),
            })
            .record(
                "whale",
                Observable::Balance {
                    token: TokenRef::Want,
                    holder: TargetRef::Actor(Role::Whale),
                },
            )
            .expect(Expectation::exact(
                "allowance",
                Observable::Allowance {
                    token: TokenRef::Want,
                    owner: TargetRef::Actor(Role::LpWhale),
                    spender: TargetRef::Vault,
                },
                ValueExpr::var("whale"),
            ));

        let roles = scenario.required_roles();
        assert_eq!(roles.len(), 3);
        assert!(roles.contains(&Role::Depositor));
        assert!(roles.contains(&Role::Whale));
        assert!(roles.contains(&Role::LpWhale));
    }

    #[test]
    fn observables_are_deduplicated() {
        let expr = ValueExpr::observe(Observable::DeltaCredit)
            .min_with(ValueExpr::observe(Observable::DeltaCredit))
            .plus(ValueExpr::observe(Observable::StakedLp));
        let mut out = Vec::new();
        expr.observables(&mut out);
        assert_eq!(out, vec![Observable::DeltaCredit, Observable::StakedLp]);
    }
}
