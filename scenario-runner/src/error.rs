//! Error types
//!
//! Every variant is terminal to the scenario that produced it.

use std::fmt;
use thiserror::Error;

use crate::amount::AssetAmount;

/// External contract (or the ledger itself) a call was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Ledger,
    Token,
    Vault,
    Strategy,
    LiquidityPool,
    Router,
    LpStaker,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Ledger => "ledger",
            Collaborator::Token => "token",
            Collaborator::Vault => "vault",
            Collaborator::Strategy => "strategy",
            Collaborator::LiquidityPool => "liquidity pool",
            Collaborator::Router => "router",
            Collaborator::LpStaker => "lp staker",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ScenarioError {
    /// An external call was refused; the reason string is passed through verbatim.
    #[error("{collaborator} rejected call{}: {reason}", step_suffix(.step))]
    CollaboratorRejected {
        collaborator: Collaborator,
        reason: String,
        /// Filled in by the runner once the failing step is known
        step: Option<usize>,
    },

    /// A post-condition did not hold.
    #[error("step {step} ({description}) failed: expected {expected}, got {actual}: {detail}")]
    AssertionFailure {
        step: usize,
        description: String,
        expected: String,
        actual: String,
        detail: String,
    },

    #[error("{actual} is not within relative tolerance {tolerance} of {expected}")]
    ToleranceExceeded {
        actual: AssetAmount,
        expected: AssetAmount,
        tolerance: f64,
    },

    #[error("expected exactly {expected}, got {actual}")]
    ValueMismatch {
        actual: AssetAmount,
        expected: AssetAmount,
    },

    /// Collaborators were not initialized, or the scenario itself is malformed.
    #[error("setup error{}: {message}", step_suffix(.step))]
    SetupError { message: String, step: Option<usize> },

    /// The collaborator could not be reached or answered with garbage.
    #[error("{collaborator} unreachable{}: {source:#}", step_suffix(.step))]
    Transport {
        collaborator: Collaborator,
        #[source]
        source: anyhow::Error,
        step: Option<usize>,
    },
}

fn step_suffix(step: &Option<usize>) -> String {
    step.map(|s| format!(" at step {}", s)).unwrap_or_default()
}

impl ScenarioError {
    pub fn rejected(collaborator: Collaborator, reason: impl Into<String>) -> Self {
        ScenarioError::CollaboratorRejected {
            collaborator,
            reason: reason.into(),
            step: None,
        }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        ScenarioError::SetupError {
            message: message.into(),
            step: None,
        }
    }

    /// Attaches the index of the step that was executing, unless one is already set.
    pub fn at_step(mut self, index: usize) -> Self {
        match &mut self {
            ScenarioError::CollaboratorRejected { step, .. }
            | ScenarioError::SetupError { step, .. }
            | ScenarioError::Transport { step, .. } => {
                if step.is_none() {
                    *step = Some(index);
                }
            }
            _ => {}
        }
        self
    }

    /// Index of the failing step, when the error came from inside a run.
    pub fn step(&self) -> Option<usize> {
        match self {
            ScenarioError::CollaboratorRejected { step, .. }
            | ScenarioError::SetupError { step, .. }
            | ScenarioError::Transport { step, .. } => *step,
            ScenarioError::AssertionFailure { step, .. } => Some(*step),
            ScenarioError::ToleranceExceeded { .. } | ScenarioError::ValueMismatch { .. } => None,
        }
    }

    /// Revert reason, if this is a rejected call.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ScenarioError::CollaboratorRejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type CallResult<T> = Result<T, ScenarioError>;
