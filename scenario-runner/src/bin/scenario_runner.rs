//! Scenario Runner
//!
//! Runs catalog scenarios against a forked chain or the simulated ledger.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin scenario-runner -- --config config/scenarios.toml --scenario operation
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! SCENARIO_CONFIG_PATH=config/scenarios.toml cargo run --bin scenario-runner -- --backend sim
//! ```

use anyhow::{Context, Result};
use chain_clients_evm::EvmClient;
use clap::{Parser, ValueEnum};
use scenario_runner::config::{Config, CONFIG_PATH_ENV};
use scenario_runner::scenario::{catalog, run_suite, Scenario, SuiteReport};
use scenario_runner::{EvmProtocol, SimulatedProtocol};
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scenario-runner")]
#[command(about = "Runs vault strategy scenarios on a forked chain or a simulated ledger")]
struct Args {
    /// Path to configuration file (default: config/scenarios.toml or SCENARIO_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Where the collaborators live
    #[arg(long, value_enum, default_value_t = Backend::Evm)]
    backend: Backend,

    /// Scenario to run; repeat to run several (default: all)
    #[arg(short, long = "scenario")]
    scenarios: Vec<String>,

    /// Print the scenario catalog and exit
    #[arg(long)]
    list: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Forked EVM node over JSON-RPC
    Evm,
    /// Deterministic in-memory ledger
    Sim,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    if args.list {
        for name in catalog::SCENARIO_NAMES {
            println!("{}", name);
        }
        return Ok(());
    }

    // Priority: CLI arg > env var > default
    match (&args.config, std::env::var(CONFIG_PATH_ENV)) {
        (Some(path), _) => info!("Loading configuration from: {}", path),
        (None, Ok(path)) => info!("Loading configuration from {}: {}", CONFIG_PATH_ENV, path),
        (None, Err(_)) => info!("Loading configuration from default location"),
    }
    let config = Config::load_from_path(args.config.as_deref())?;
    info!(
        "Network: {} (chain ID: {}), vault {}, strategy {}",
        config.network.name, config.network.chain_id, config.contracts.vault, config.contracts.strategy
    );
    match config.asset_profile() {
        Some(asset) => info!("Asset profile: {}", asset.name),
        None => info!("No [[asset]] entry for want {}", config.contracts.want),
    }

    let params = config.scenario_params();
    let names: Vec<String> = if args.scenarios.is_empty() {
        catalog::SCENARIO_NAMES.iter().map(|n| n.to_string()).collect()
    } else {
        args.scenarios.clone()
    };

    let mut scenarios: Vec<Scenario> = Vec::new();
    let mut build_failures = 0;
    for name in &names {
        match catalog::build(name, &params) {
            Ok(scenario) => scenarios.push(scenario),
            Err(e) => {
                error!("Cannot build scenario '{}': {}", name, e);
                build_failures += 1;
            }
        }
    }

    let actors = config.actor_book();
    let report = match args.backend {
        Backend::Evm => {
            let client = EvmClient::new(&config.network.rpc_url)?
                .with_receipt_timeout(Duration::from_millis(config.network.receipt_timeout_ms));
            let protocol = EvmProtocol::connect(client, config.known_contracts(), config.network.impersonation)
                .await
                .context("Failed to resolve strategy contracts on the fork")?;
            run_suite(protocol, &actors, &scenarios).await.1
        }
        Backend::Sim => {
            let protocol = SimulatedProtocol::new(config.sim_addresses(), &actors, config.sim_params())
                .context("Failed to build simulated deployment")?;
            run_suite(protocol, &actors, &scenarios).await.1
        }
    };

    summarize(&report);
    let failures = report.failed.len() + build_failures;
    if failures > 0 {
        anyhow::bail!("{} of {} scenario(s) failed", failures, names.len());
    }
    Ok(())
}

fn summarize(report: &SuiteReport) {
    for run in &report.passed {
        info!(
            "PASS {} ({} steps, {} transactions)",
            run.scenario, run.steps_executed, run.transactions
        );
    }
    for (name, e) in &report.failed {
        error!("FAIL {}: {}", name, e);
    }
    info!("{} passed, {} failed", report.passed.len(), report.failed.len());
}
