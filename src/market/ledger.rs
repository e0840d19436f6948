//! External staking ledger seam
//!
//! The market never mints value. Stakes are pulled from an external
//! fungible-balance ledger into a custody account and pushed back out on
//! payout, refund or sweep. The trait keeps that ledger swappable; the
//! in-memory implementation backs the demo binary and the tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::market::error::{MarketError, MarketResult};

/// Account holding every stake and subscription payment until settlement
pub const CUSTODY_ACCOUNT: &str = "market.custody";

/// Fungible balance ledger used for stakes and subscription payments.
///
/// `debit` must fail atomically on insufficient balance — the market
/// aborts the whole operation and leaves no partial state behind.
#[async_trait]
pub trait StakeLedger: Send + Sync {
    async fn debit(&self, account: &str, amount: u64) -> MarketResult<()>;
    async fn credit(&self, account: &str, amount: u64) -> MarketResult<()>;
    async fn balance(&self, account: &str) -> u64;

    async fn transfer(&self, from: &str, to: &str, amount: u64) -> MarketResult<()> {
        self.debit(from, amount).await?;
        self.credit(to, amount).await
    }
}

/// HashMap-backed ledger for the demo server and tests
#[derive(Default)]
pub struct InMemoryStakeLedger {
    balances: RwLock<HashMap<String, u64>>,
}

impl InMemoryStakeLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StakeLedger for InMemoryStakeLedger {
    async fn debit(&self, account: &str, amount: u64) -> MarketResult<()> {
        let mut balances = self.balances.write();
        let available = balances.get(account).copied().unwrap_or(0);
        if available < amount {
            return Err(MarketError::InsufficientFunds {
                account: account.to_string(),
                needed: amount,
                available,
            });
        }
        balances.insert(account.to_string(), available - amount);
        Ok(())
    }

    async fn credit(&self, account: &str, amount: u64) -> MarketResult<()> {
        let mut balances = self.balances.write();
        *balances.entry(account.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn balance(&self, account: &str) -> u64 {
        self.balances.read().get(account).copied().unwrap_or(0)
    }
}
