//! Tests for the scenario catalog against the simulated protocol

use scenario_runner::protocol::{LiquidityPool, Strategy, Token, Vault};
use scenario_runner::scenario::{catalog, run_suite, ScenarioContext};
use scenario_runner::{AssetAmount, Protocol, ScenarioError, ScenarioParams, SCENARIO_NAMES};

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    build_test_actor_book, build_test_scenario_params, build_test_sim, DUMMY_AMOUNT, DUMMY_DEPOSITOR_ADDR,
    DUMMY_ROUTE, DUMMY_TRADE_FACTORY_ADDR,
};

// ============================================================================
// CATALOG CONSTRUCTION
// ============================================================================

/// What is tested: every catalog name builds, and names are unique
/// Why: The CLI lists and runs scenarios by these names
#[test]
fn test_every_name_builds() {
    let params = build_test_scenario_params();
    for name in SCENARIO_NAMES {
        let scenario = catalog::build(name, &params).unwrap();
        assert_eq!(scenario.name, name);
        assert!(!scenario.steps.is_empty());
        assert_eq!(scenario.relative_tolerance, params.relative_tolerance);
    }
    let mut names = SCENARIO_NAMES.to_vec();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), SCENARIO_NAMES.len());
}

/// What is tested: an unknown scenario name is a setup error
/// Why: A typo on the command line must not silently run nothing
#[test]
fn test_unknown_name_is_setup_error() {
    let err = catalog::build("not_a_scenario", &ScenarioParams::default()).unwrap_err();
    assert!(matches!(err, ScenarioError::SetupError { .. }));
}

/// What is tested: redeem_local without a route for the asset is a setup error
/// Why: Cross-chain redemption needs an asset-specific destination
#[test]
fn test_redeem_local_requires_route() {
    let err = catalog::build("redeem_local", &ScenarioParams::default()).unwrap_err();
    assert!(matches!(err, ScenarioError::SetupError { .. }));
}

// ============================================================================
// CATALOG RUNS
// ============================================================================

/// What is tested: the whole catalog passes on the simulated protocol, each run isolated
/// Why: The simulated backend must reproduce the behaviours the catalog checks on a fork
#[tokio::test]
async fn test_catalog_passes_on_simulation() {
    let _ = tracing_subscriber::fmt::try_init();
    let params = build_test_scenario_params();
    let scenarios: Vec<_> = SCENARIO_NAMES
        .iter()
        .map(|name| catalog::build(name, &params).unwrap())
        .collect();

    let sim = build_test_sim();
    let want = sim.addresses().want.clone();
    let before = sim.balance_of(&want, DUMMY_DEPOSITOR_ADDR).await.unwrap();

    let (sim, report) = run_suite(sim, &build_test_actor_book(), &scenarios).await;
    for (name, err) in &report.failed {
        eprintln!("{} failed: {}", name, err);
    }
    assert!(report.all_passed());
    assert_eq!(report.passed.len(), SCENARIO_NAMES.len());

    // Every scenario ran on a restored snapshot.
    assert_eq!(sim.balance_of(&want, DUMMY_DEPOSITOR_ADDR).await.unwrap(), before);
}

/// What is tested: depositing then harvesting invests the whole deposit, and withdrawing returns it
/// Why: A lossless round trip is the baseline property of the strategy
#[tokio::test]
async fn test_operation_round_trip() {
    let scenario = catalog::build("operation", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    let report = context.run(&scenario).await.unwrap();
    // approve, deposit, harvest, tend, withdraw
    assert_eq!(report.transactions, 5);

    let sim = context.into_protocol();
    assert_eq!(sim.estimated_total_assets().await.unwrap(), AssetAmount::ZERO);
    let want = sim.addresses().want.clone();
    assert_eq!(
        sim.balance_of(&want, DUMMY_DEPOSITOR_ADDR).await.unwrap(),
        scenario_runner::SimParams::default().depositor_balance
    );
}

/// What is tested: a destroyed LP position is recorded as a strategy loss of the full deposit
/// Why: Losses must be reported to the vault and passed to depositors
#[tokio::test]
async fn test_losses_are_reported() {
    let scenario = catalog::build("losses", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let (gain, loss) = context.protocol().strategy_totals().await.unwrap();
    assert_eq!(gain, AssetAmount::ZERO);
    assert_eq!(loss, AssetAmount(DUMMY_AMOUNT));
}

/// What is tested: redeem_local sends every unstaked LP token across the configured route
/// Why: Cross-chain redemption is the exit path when delta credit is drained
#[tokio::test]
async fn test_redeem_local_queues_redemption() {
    let scenario = catalog::build("redeem_local", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let sim = context.into_protocol();
    assert_eq!(sim.delta_credit().await.unwrap(), AssetAmount::ZERO);
    assert_eq!(sim.pending_redemptions(), vec![(DUMMY_ROUTE, AssetAmount(DUMMY_AMOUNT))]);
}

/// What is tested: after a profitable harvest and the unlock period the share price is above par
/// Why: Profit must reach depositors once locked profit has fully released
#[tokio::test]
async fn test_profitable_harvest_raises_share_price() {
    let scenario = catalog::build("profitable_harvest", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let pps = context.protocol().price_per_share().await.unwrap();
    assert!(pps > AssetAmount(1_000_000));
    let (gain, _) = context.protocol().strategy_totals().await.unwrap();
    assert!(gain > AssetAmount::ZERO);
}

/// What is tested: change_debt halves, restores, then halves the strategy's debt again
/// Why: Debt must follow the debt ratio in both directions, starting from a partial allocation
#[tokio::test]
async fn test_change_debt_follows_ratio() {
    let scenario = catalog::build("change_debt", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let eta = context.protocol().estimated_total_assets().await.unwrap();
    assert!(eta.0.abs_diff(DUMMY_AMOUNT / 2) <= DUMMY_AMOUNT / 1_000);
}

/// What is tested: remove_trade_factory leaves the strategy pointing away from the old factory
/// Why: A removed factory must lose both its slot and its reward allowance
#[tokio::test]
async fn test_remove_trade_factory_clears_factory() {
    let scenario = catalog::build("remove_trade_factory", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let factory = context.protocol().trade_factory().await.unwrap();
    assert_ne!(factory, DUMMY_TRADE_FACTORY_ADDR);
    assert_eq!(factory, "0x0000000000000000000000000000000000000000");
}

/// What is tested: double_init rejects a second initialize from governor and strategist
/// Why: Re-initializing a live strategy would hand its roles to new accounts
#[tokio::test]
async fn test_double_init_is_rejected() {
    let scenario = catalog::build("double_init", &build_test_scenario_params()).unwrap();
    let mut context = ScenarioContext::new(build_test_sim(), build_test_actor_book());
    context.run(&scenario).await.unwrap();

    let eta = context.protocol().estimated_total_assets().await.unwrap();
    assert!(eta.0.abs_diff(DUMMY_AMOUNT) <= DUMMY_AMOUNT / 1_000);
}

/// What is tested: profitable_harvest checks reward dust only when a dust bound is set
/// Why: Deployments without a reward token cannot observe reward balances
#[test]
fn test_profitable_harvest_reward_dust_is_optional() {
    let with_dust = catalog::build("profitable_harvest", &build_test_scenario_params()).unwrap();
    let without_dust = catalog::build(
        "profitable_harvest",
        &ScenarioParams {
            reward_dust: None,
            ..build_test_scenario_params()
        },
    )
    .unwrap();
    assert_eq!(with_dust.steps.len(), without_dust.steps.len() + 1);
}

/// What is tested: a suite keeps going after a failing scenario and reports it by name
/// Why: One broken scenario must not hide the results of the others
#[tokio::test]
async fn test_suite_reports_failures_by_name() {
    let params = build_test_scenario_params();
    let broken = catalog::build("operation", &params)
        .unwrap()
        .tolerance(-1.0);
    let scenarios = vec![broken, catalog::build("sweep", &params).unwrap()];

    let (_, report) = run_suite(build_test_sim(), &build_test_actor_book(), &scenarios).await;
    assert_eq!(report.passed.len(), 1);
    assert_eq!(report.passed[0].scenario, "sweep");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "operation");
    assert!(matches!(report.failed[0].1, ScenarioError::SetupError { .. }));
}
