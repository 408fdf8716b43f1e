//! Scenario model, assertions, runner and catalog.

pub mod assert;
pub mod catalog;
pub mod runner;
pub mod step;

pub use assert::{assert_approx, assert_exact};
pub use runner::{run_isolated, run_suite, RunReport, ScenarioContext, SuiteReport};
pub use step::{Action, Comparison, Expectation, Observable, Scenario, ScenarioStep, TargetRef, TokenRef, ValueExpr};
