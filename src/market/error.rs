//! Market error taxonomy
//!
//! Hard rejects only — idempotent no-ops (claiming an already-paid
//! prediction, claiming before resolution) are `Ok(None)` at the call
//! sites, never errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    /// Malformed or out-of-window input; no state change
    #[error("invalid input: {0}")]
    Input(String),

    /// Caller is not entitled to the operation
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Operation conflicts with the current lifecycle state
    #[error("invalid state: {0}")]
    State(String),

    /// Claim against a prediction that was never made
    #[error("no prediction for epoch {epoch} by {predictor}")]
    UnknownPrediction { epoch: i64, predictor: String },

    /// External staking ledger cannot cover the debit; whole call aborts
    #[error("insufficient funds for {account}: need {needed}, have {available}")]
    InsufficientFunds {
        account: String,
        needed: u64,
        available: u64,
    },

    /// Persistence failure from the write-through store
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl MarketError {
    pub fn input(msg: impl Into<String>) -> Self {
        MarketError::Input(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        MarketError::Auth(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        MarketError::State(msg.into())
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
