//! Typed rejection reasons for ledger and state-machine violations.
//!
//! Validation and conflict rejections carry enough detail for the caller to
//! surface the specific reason. Operational failures (I/O, SQL) stay on the
//! `anyhow` path; these variants convert into `anyhow::Error` at the boundary
//! and can be recovered with `downcast_ref` where the caller needs to branch.

use crate::models::Currency;
use crate::rounds::{BetStatus, RoundStatus};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Amount is zero, negative, or not finite.
    InvalidAmount { amount: f64 },
    /// A debit would drive the balance negative. No effect was applied.
    InsufficientFunds {
        currency: Currency,
        requested: f64,
        available: f64,
    },
    /// Bet placement/edit/cancel attempted outside the round's open window.
    RoundNotOpen {
        round_id: String,
        status: RoundStatus,
    },
    /// Settlement attempted on a round that is not sitting in `locked`.
    RoundNotLocked {
        round_id: String,
        status: RoundStatus,
    },
    /// The round already reached a terminal status; re-running settlement
    /// or cancellation is a conflict, not a retry.
    AlreadySettled { round_id: String },
    /// The bet is not in a state that allows the attempted mutation.
    BetNotEditable { bet_id: String, status: BetStatus },
    /// The designated winner does not belong to the round.
    WinnerNotInRound {
        round_id: String,
        variable_id: String,
    },
    NotFound { entity: &'static str, id: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidAmount { amount } => {
                write!(f, "invalid amount: {amount}")
            }
            EngineError::InsufficientFunds {
                currency,
                requested,
                available,
            } => write!(
                f,
                "insufficient {} balance: requested {requested}, available {available}",
                currency.as_str()
            ),
            EngineError::RoundNotOpen { round_id, status } => {
                write!(f, "round {round_id} is not open (status: {})", status.as_str())
            }
            EngineError::RoundNotLocked { round_id, status } => {
                write!(f, "round {round_id} is not locked (status: {})", status.as_str())
            }
            EngineError::AlreadySettled { round_id } => {
                write!(f, "round {round_id} already reached a terminal status")
            }
            EngineError::BetNotEditable { bet_id, status } => {
                write!(f, "bet {bet_id} cannot be changed (status: {})", status.as_str())
            }
            EngineError::WinnerNotInRound { round_id, variable_id } => {
                write!(f, "variable {variable_id} does not belong to round {round_id}")
            }
            EngineError::NotFound { entity, id } => write!(f, "{entity} {id} not found"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Pull the typed rejection out of an `anyhow` chain, if there is one.
pub fn as_engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.downcast_ref::<EngineError>()
}
