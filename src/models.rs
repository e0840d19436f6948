use serde::{Deserialize, Serialize};

/// Lifecycle of an epoch's settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStatus {
    Pending,
    Paying,
    Canceled,
}

impl EpochStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EpochStatus::Pending => "pending",
            EpochStatus::Paying => "paying",
            EpochStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EpochStatus::Pending),
            "paying" => Some(EpochStatus::Paying),
            "canceled" => Some(EpochStatus::Canceled),
            _ => None,
        }
    }
}

/// Per-epoch accounting. Created lazily on first touch, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    /// Aligned start timestamp (integer multiple of the epoch duration)
    pub start: i64,
    pub status: EpochStatus,
    pub trueval: Option<bool>,
    /// Total stake pooled for this epoch across both directions
    pub total_stake: u64,
    /// Subtotal staked on the `true` direction
    pub true_stake: u64,
    /// Stake value still held for this epoch (unpaid stakes + rounding dust)
    pub custody: u64,
    /// Subscription revenue attributed to this epoch at purchase time
    pub revenue: u64,
}

impl Epoch {
    pub fn new(start: i64) -> Self {
        Self {
            start,
            status: EpochStatus::Pending,
            trueval: None,
            total_stake: 0,
            true_stake: 0,
            custody: 0,
            revenue: 0,
        }
    }

    pub fn false_stake(&self) -> u64 {
        self.total_stake - self.true_stake
    }

    pub fn winning_stake(&self, truth: bool) -> u64 {
        if truth {
            self.true_stake
        } else {
            self.false_stake()
        }
    }
}

/// A predictor's position for one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub epoch: i64,
    pub predictor: String,
    pub direction: bool,
    pub stake: u64,
    pub paid: bool,
}

/// Time-boxed entitlement to read aggregated results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub consumer: String,
    pub expires: i64,
}

/// Runtime-tunable market parameters, persisted as a singleton row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketParams {
    pub paused: bool,
    pub subscription_duration: i64,
    pub trueval_timeout: i64,
}

/// Settlement record kinds, kept as an append-only audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Submitted,
    Resolved,
    Payout,
    Sweep,
    Revenue,
}

impl SettlementKind {
    pub fn as_str(&self) -> &str {
        match self {
            SettlementKind::Submitted => "submitted",
            SettlementKind::Resolved => "resolved",
            SettlementKind::Payout => "payout",
            SettlementKind::Sweep => "sweep",
            SettlementKind::Revenue => "revenue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(SettlementKind::Submitted),
            "resolved" => Some(SettlementKind::Resolved),
            "payout" => Some(SettlementKind::Payout),
            "sweep" => Some(SettlementKind::Sweep),
            "revenue" => Some(SettlementKind::Revenue),
            _ => None,
        }
    }
}

/// One row of the settlement audit trail (not authoritative state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: String,
    pub ts: i64,
    pub kind: SettlementKind,
    pub epoch: i64,
    pub account: Option<String>,
    pub stake: Option<u64>,
    pub payout: Option<u64>,
    pub status: EpochStatus,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Epoch duration D in seconds
    pub epoch_duration: i64,
    pub subscription_duration: i64,
    pub trueval_timeout: i64,
    /// Identity trusted to publish ground truth
    pub resolver: String,
    /// Identity receiving slashed pools and reclaimed revenue
    pub fee_collector: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./predpool.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let epoch_duration = std::env::var("EPOCH_DURATION_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let subscription_duration = std::env::var("SUBSCRIPTION_DURATION_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);

        // Resolver gets 3 days to publish truth before claims fall back to refunds
        let trueval_timeout = std::env::var("TRUEVAL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "259200".to_string())
            .parse()
            .unwrap_or(259_200);

        let resolver =
            std::env::var("RESOLVER_IDENTITY").unwrap_or_else(|_| "resolver".to_string());

        let fee_collector =
            std::env::var("FEE_COLLECTOR_IDENTITY").unwrap_or_else(|_| "treasury".to_string());

        Ok(Self {
            database_path,
            port,
            epoch_duration,
            subscription_duration,
            trueval_timeout,
            resolver,
            fee_collector,
        })
    }
}
