//! Market module
//!
//! Epoch clock, prediction ledger, resolution state machine, payout
//! engine and revenue reclamation, with SQLite write-through.

pub mod clock;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod store;

pub use clock::EpochClock;
pub use engine::PredictionMarket;
pub use error::{MarketError, MarketResult};
pub use ledger::{InMemoryStakeLedger, StakeLedger, CUSTODY_ACCOUNT};
pub use store::MarketDb;
