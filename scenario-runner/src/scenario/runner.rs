//! Scenario Runner
//!
//! Executes the steps of a `Scenario` strictly in order against a `Protocol`.
//! The first failing step aborts the run: there is no reordering, no retry and
//! no partial continuation.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::amount::{ActorBook, AssetAmount, Role, TxOptions};
use crate::error::{CallResult, ScenarioError};
use crate::protocol::{Protocol, Receipt, ZERO_ADDRESS};
use crate::scenario::assert::{assert_approx, assert_exact};
use crate::scenario::step::{Action, Comparison, Expectation, Observable, Scenario, ScenarioStep, TargetRef, TokenRef, ValueExpr};

/// Summary of a run in which every step succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub scenario: String,
    pub steps_executed: usize,
    /// Ledger time advanced by `AdvanceTime` steps
    pub time_advanced: Duration,
    /// Calls that were accepted by a collaborator
    pub transactions: usize,
}

/// Ledger state and bookkeeping for one scenario run.
///
/// Owns the protocol; every step reads and mutates state through it.
pub struct ScenarioContext<P> {
    protocol: P,
    actors: ActorBook,
    vars: HashMap<String, AssetAmount>,
    last_receipt: Option<Receipt>,
    time_advanced: Duration,
    transactions: usize,
}

impl<P: Protocol> ScenarioContext<P> {
    pub fn new(protocol: P, actors: ActorBook) -> Self {
        Self {
            protocol,
            actors,
            vars: HashMap::new(),
            last_receipt: None,
            time_advanced: Duration::ZERO,
            transactions: 0,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    pub fn into_protocol(self) -> P {
        self.protocol
    }

    /// Variables recorded so far.
    pub fn vars(&self) -> &HashMap<String, AssetAmount> {
        &self.vars
    }

    pub fn last_receipt(&self) -> Option<&Receipt> {
        self.last_receipt.as_ref()
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Runs every step of `scenario` in order.
    ///
    /// # Arguments
    ///
    /// * `scenario` - Steps to execute
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - All steps executed and every expectation held
    /// * `Err(ScenarioError::SetupError)` - Collaborators not ready or a required actor missing
    /// * `Err(ScenarioError)` - First failing step, annotated with its index
    pub async fn run(&mut self, scenario: &Scenario) -> CallResult<RunReport> {
        info!("Running scenario '{}' ({} steps)", scenario.name, scenario.steps.len());

        self.protocol.ensure_ready().await?;
        for role in scenario.required_roles() {
            self.actors.get(role)?;
        }
        if !scenario.relative_tolerance.is_finite() || scenario.relative_tolerance < 0.0 {
            return Err(ScenarioError::setup(format!(
                "scenario '{}' has invalid relative tolerance {}",
                scenario.name, scenario.relative_tolerance
            )));
        }

        let time_before = self.time_advanced;
        let transactions_before = self.transactions;
        for (index, step) in scenario.steps.iter().enumerate() {
            debug!("[{}] step {}: {}", scenario.name, index, step);
            if let Err(e) = self.execute_step(index, step, scenario.relative_tolerance).await {
                warn!("[{}] step {} ({}) failed: {}", scenario.name, index, step, e);
                return Err(e.at_step(index));
            }
        }

        let report = RunReport {
            scenario: scenario.name.clone(),
            steps_executed: scenario.steps.len(),
            time_advanced: self.time_advanced - time_before,
            transactions: self.transactions - transactions_before,
        };
        info!(
            "Scenario '{}' passed: {} steps, {} transactions, {}s advanced",
            report.scenario,
            report.steps_executed,
            report.transactions,
            report.time_advanced.as_secs()
        );
        Ok(report)
    }

    async fn execute_step(&mut self, index: usize, step: &ScenarioStep, default_tolerance: f64) -> CallResult<()> {
        match step {
            ScenarioStep::Call { sender, action } => {
                let receipt = self.execute(*sender, action).await?;
                self.last_receipt = Some(receipt);
                Ok(())
            }
            ScenarioStep::AdvanceTime(duration) => self.advance_time(*duration).await,
            ScenarioStep::Mine(blocks) => self.protocol.mine(*blocks).await,
            ScenarioStep::Record { name, value } => {
                let value = self.evaluate(value).await?;
                debug!("Recorded {} = {}", name, value);
                self.vars.insert(name.clone(), value);
                Ok(())
            }
            ScenarioStep::Assert(expectation) => self.check(index, expectation, default_tolerance).await,
            ScenarioStep::ExpectRevert { sender, action, reason } => {
                self.expect_revert(index, *sender, action, reason.as_deref()).await
            }
        }
    }

    /// Moves the ledger clock forward by whole seconds. A duration under one
    /// second touches nothing.
    pub async fn advance_time(&mut self, duration: Duration) -> CallResult<()> {
        let duration = Duration::from_secs(duration.as_secs());
        if duration.is_zero() {
            return Ok(());
        }
        self.protocol.advance(duration).await?;
        self.time_advanced = self.time_advanced.saturating_add(duration);
        Ok(())
    }

    async fn expect_revert(
        &mut self,
        index: usize,
        sender: Role,
        action: &Action,
        expected_reason: Option<&str>,
    ) -> CallResult<()> {
        let expected = match expected_reason {
            Some(reason) => format!("revert '{}'", reason),
            None => "revert".to_string(),
        };
        match self.execute(sender, action).await {
            Ok(_) => Err(ScenarioError::AssertionFailure {
                step: index,
                description: format!("{} is rejected", action.name()),
                expected,
                actual: "call succeeded".to_string(),
                detail: "collaborator accepted a call that must fail".to_string(),
            }),
            Err(ScenarioError::CollaboratorRejected { reason, .. })
                if expected_reason.map_or(true, |expected| reason == expected) =>
            {
                debug!("{} rejected as expected: {}", action.name(), reason);
                Ok(())
            }
            Err(ScenarioError::CollaboratorRejected { collaborator, reason, .. }) => {
                Err(ScenarioError::AssertionFailure {
                    step: index,
                    description: format!("{} is rejected", action.name()),
                    expected,
                    actual: format!("revert '{}'", reason),
                    detail: format!("{} gave a different reason", collaborator),
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn check(&self, index: usize, expectation: &Expectation, default_tolerance: f64) -> CallResult<()> {
        let actual = self.evaluate(&expectation.actual).await?;
        let expected = self.evaluate(&expectation.expected).await?;

        let outcome = match expectation.comparison {
            Comparison::Approx { tolerance } => {
                assert_approx(actual, expected, tolerance.unwrap_or(default_tolerance))
            }
            Comparison::Exact => assert_exact(actual, expected),
            Comparison::GreaterThan => {
                if actual > expected {
                    Ok(())
                } else {
                    return Err(failure(index, expectation, format!("> {}", expected), actual, "not strictly greater"));
                }
            }
            Comparison::LessThan => {
                if actual < expected {
                    Ok(())
                } else {
                    return Err(failure(index, expectation, format!("< {}", expected), actual, "not strictly less"));
                }
            }
        };

        match outcome {
            Ok(()) => {
                debug!("{}: {} holds", expectation.description, actual);
                Ok(())
            }
            Err(e @ ScenarioError::ToleranceExceeded { .. }) | Err(e @ ScenarioError::ValueMismatch { .. }) => {
                Err(failure(index, expectation, expected.to_string(), actual, &e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // VALUES
    // ========================================================================

    /// Evaluates an expression against the current collaborator state.
    pub async fn evaluate(&self, expr: &ValueExpr) -> CallResult<AssetAmount> {
        let mut needed = Vec::new();
        expr.observables(&mut needed);
        let mut observed = HashMap::with_capacity(needed.len());
        for observable in needed {
            let value = self.observe(&observable).await?;
            observed.insert(observable, value);
        }
        expr.eval(&observed, &self.vars)
    }

    async fn observe(&self, observable: &Observable) -> CallResult<AssetAmount> {
        let p = &self.protocol;
        match observable {
            Observable::Balance { token, holder } => {
                p.balance_of(&self.token_address(token)?, &self.target_address(holder)?)
                    .await
            }
            Observable::Allowance { token, owner, spender } => {
                p.allowance(
                    &self.token_address(token)?,
                    &self.target_address(owner)?,
                    &self.target_address(spender)?,
                )
                .await
            }
            Observable::NativeBalance { holder } => p.native_balance(&self.target_address(holder)?).await,
            Observable::EstimatedTotalAssets => p.estimated_total_assets().await,
            Observable::StakedLp => p.balance_of_staked_lp().await,
            Observable::UnstakedLp => p.balance_of_unstaked_lp().await,
            Observable::DeltaCredit => p.delta_credit().await,
            Observable::DebtOutstanding => p.debt_outstanding().await,
            Observable::PricePerShare => p.price_per_share().await,
            Observable::StrategyTotalGain => Ok(p.strategy_totals().await?.0),
            Observable::StrategyTotalLoss => Ok(p.strategy_totals().await?.1),
            Observable::HarvestTrigger => Ok(flag(p.harvest_trigger(AssetAmount::ZERO).await?)),
            Observable::TendTrigger => Ok(flag(p.tend_trigger(AssetAmount::ZERO).await?)),
            Observable::TradeFactoryIsConfigured => {
                let configured = self.target_address(&TargetRef::TradeFactory)?;
                Ok(flag(p.trade_factory().await?.eq_ignore_ascii_case(&configured)))
            }
            Observable::LastEvent { kind, field } => {
                let receipt = self
                    .last_receipt
                    .as_ref()
                    .ok_or_else(|| ScenarioError::setup(format!("no call has been made before reading {:?}", kind)))?;
                let event = receipt.event(*kind).ok_or_else(|| {
                    ScenarioError::setup(format!("transaction {} emitted no {:?} event", receipt.tx_hash, kind))
                })?;
                event
                    .field(*field)
                    .ok_or_else(|| ScenarioError::setup(format!("{:?} has no field {:?}", kind, field)))
            }
            Observable::Timestamp => Ok(AssetAmount::from(p.timestamp().await?)),
        }
    }

    fn token_address(&self, token: &TokenRef) -> CallResult<String> {
        let addresses = self.protocol.addresses();
        Ok(match token {
            TokenRef::Want => addresses.want.clone(),
            TokenRef::LpToken => addresses.liquidity_pool.clone(),
            TokenRef::VaultShares => addresses.vault.clone(),
            TokenRef::Reward => addresses
                .reward_token
                .clone()
                .ok_or_else(|| ScenarioError::setup("no reward token configured"))?,
            TokenRef::Address(address) => address.clone(),
        })
    }

    fn target_address(&self, target: &TargetRef) -> CallResult<String> {
        let addresses = self.protocol.addresses();
        Ok(match target {
            TargetRef::Actor(role) => self.actors.get(*role)?.address.clone(),
            TargetRef::Vault => addresses.vault.clone(),
            TargetRef::Strategy => addresses.strategy.clone(),
            TargetRef::LiquidityPool => addresses.liquidity_pool.clone(),
            TargetRef::Router => addresses.router.clone(),
            TargetRef::LpStaker => addresses.lp_staker.clone(),
            TargetRef::TradeFactory => addresses
                .trade_factory
                .clone()
                .ok_or_else(|| ScenarioError::setup("no trade factory configured"))?,
            TargetRef::Zero => ZERO_ADDRESS.to_string(),
            TargetRef::Address(address) => address.clone(),
        })
    }

    // ========================================================================
    // CALLS
    // ========================================================================

    async fn execute(&mut self, sender: Role, action: &Action) -> CallResult<Receipt> {
        let opts = TxOptions::sent_by(self.actors.get(sender)?);

        let mut amounts = Vec::new();
        for expr in action.amounts() {
            amounts.push(self.evaluate(expr).await?);
        }
        let amount = amounts.first().copied().unwrap_or(AssetAmount::ZERO);

        let receipt = match action {
            Action::Approve { token, spender, .. } => {
                let (token, spender) = (self.token_address(token)?, self.target_address(spender)?);
                self.protocol.approve(&token, &spender, amount, &opts).await?
            }
            Action::Transfer { token, to, .. } => {
                let (token, to) = (self.token_address(token)?, self.target_address(to)?);
                self.protocol.transfer(&token, &to, amount, &opts).await?
            }
            Action::TransferNative { to, .. } => {
                let to = self.target_address(to)?;
                self.protocol.transfer_native(&to, &opts.clone().with_value(amount)).await?
            }
            Action::Deposit { .. } => self.protocol.deposit(amount, &opts).await?,
            Action::Withdraw => self.protocol.withdraw(&opts).await?,
            Action::UpdateDebtRatio { ratio_bps } => {
                self.protocol.update_strategy_debt_ratio(*ratio_bps, &opts).await?
            }
            Action::Harvest => self.protocol.harvest(&opts).await?,
            Action::Tend => self.protocol.tend(&opts).await?,
            Action::SetDoHealthCheck { enabled } => self.protocol.set_do_health_check(*enabled, &opts).await?,
            Action::UnstakeLp { .. } => self.protocol.unstake_lp(amount, &opts).await?,
            Action::RedeemLocal { route, .. } => {
                let fee = amounts.get(1).copied().unwrap_or(AssetAmount::ZERO);
                self.protocol
                    .redeem_local(route, amount, &opts.clone().with_value(fee))
                    .await?
            }
            Action::InstantRedeemLocal { recipient, .. } => {
                let recipient = self.target_address(recipient)?;
                let pool_id = self.protocol.pool_id().await?;
                self.protocol
                    .instant_redeem_local(pool_id, amount, &recipient, &opts)
                    .await?
            }
            Action::Sweep { token } => {
                let token = self.token_address(token)?;
                self.protocol.sweep(&token, &opts).await?
            }
            Action::SetMintFee { pool_id, fee_bps } => self.protocol.set_fees(*pool_id, *fee_bps, &opts).await?,
            Action::StakerEmergencyWithdraw => self.protocol.emergency_withdraw(&opts).await?,
            Action::RemoveTradeFactory => self.protocol.remove_trade_factory_permissions(&opts).await?,
            Action::Initialize => self.protocol.initialize(&opts).await?,
        };

        self.transactions += 1;
        debug!(
            "{} by {} mined as {} with {} event(s)",
            action.name(),
            opts.sender,
            receipt.tx_hash,
            receipt.events.len()
        );
        Ok(receipt)
    }
}

fn flag(value: bool) -> AssetAmount {
    AssetAmount(u128::from(value))
}

fn failure(index: usize, expectation: &Expectation, expected: String, actual: AssetAmount, detail: &str) -> ScenarioError {
    ScenarioError::AssertionFailure {
        step: index,
        description: expectation.description.clone(),
        expected,
        actual: actual.to_string(),
        detail: detail.to_string(),
    }
}

// ============================================================================
// SUITES
// ============================================================================

/// Outcome of running several scenarios on one protocol.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub passed: Vec<RunReport>,
    pub failed: Vec<(String, ScenarioError)>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs `scenario` against `protocol`, restoring the ledger snapshot afterwards
/// whether or not the scenario passed.
///
/// # Returns
///
/// The protocol (for the next run) and the scenario outcome. A failed restore
/// is reported only when the scenario itself passed.
pub async fn run_isolated<P: Protocol>(
    mut protocol: P,
    actors: ActorBook,
    scenario: &Scenario,
) -> (P, CallResult<RunReport>) {
    let snapshot = match protocol.snapshot().await {
        Ok(id) => id,
        Err(e) => return (protocol, Err(e)),
    };

    let mut context = ScenarioContext::new(protocol, actors);
    let outcome = context.run(scenario).await;
    let mut protocol = context.into_protocol();

    match protocol.revert_to(&snapshot).await {
        Ok(()) => (protocol, outcome),
        Err(e) => {
            warn!("Failed to restore snapshot {} after '{}': {}", snapshot, scenario.name, e);
            let outcome = match outcome {
                Ok(_) => Err(e),
                failed => failed,
            };
            (protocol, outcome)
        }
    }
}

/// Runs every scenario in order, each on a fresh ledger snapshot.
pub async fn run_suite<P: Protocol>(mut protocol: P, actors: &ActorBook, scenarios: &[Scenario]) -> (P, SuiteReport) {
    let mut report = SuiteReport::default();
    for scenario in scenarios {
        let (returned, outcome) = run_isolated(protocol, actors.clone(), scenario).await;
        protocol = returned;
        match outcome {
            Ok(run) => report.passed.push(run),
            Err(e) => report.failed.push((scenario.name.clone(), e)),
        }
    }
    (protocol, report)
}
