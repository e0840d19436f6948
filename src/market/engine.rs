//! Prediction Market Engine
//!
//! Epoch lifecycle, stake accounting, resolution state machine,
//! proportional payout/slashing and the subscription-gated read path.
//! All mutations serialize behind one lock; every state change is
//! written through to SQLite and leaves a settlement record.
//!
//! Payout formula for a winner: `floor(stake * total_pool / winning_pool)`.
//! The multiplier is the original total pool, not a depleting remainder —
//! losers never receive anything and the no-winner case sweeps the whole
//! pool at resolution, so the sum of winner payouts never exceeds the
//! pool. Rounding dust stays in custody permanently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::AuthorizationToken;
use crate::market::clock::EpochClock;
use crate::market::error::{MarketError, MarketResult};
use crate::market::ledger::{StakeLedger, CUSTODY_ACCOUNT};
use crate::market::store::MarketDb;
use crate::models::{
    Config, Epoch, EpochStatus, MarketParams, Prediction, SettlementKind, SettlementRecord,
    Subscription,
};

/// In-memory authority for all market state; restored from the store on boot
struct MarketState {
    epochs: HashMap<i64, Epoch>,
    predictions: HashMap<(i64, String), Prediction>,
    subscriptions: HashMap<String, Subscription>,
    params: MarketParams,
}

pub struct PredictionMarket {
    clock: EpochClock,
    resolver: String,
    fee_collector: String,
    db: MarketDb,
    ledger: Arc<dyn StakeLedger>,
    state: Mutex<MarketState>,
}

impl PredictionMarket {
    /// Open the market, restoring all persisted state.
    pub async fn restore(
        config: &Config,
        db: MarketDb,
        ledger: Arc<dyn StakeLedger>,
    ) -> MarketResult<Self> {
        let epochs = db.load_epochs().await?;
        let predictions = db.load_predictions().await?;
        let subscriptions = db.load_subscriptions().await?;
        let params = match db.load_params().await? {
            Some(p) => p,
            None => MarketParams {
                paused: false,
                subscription_duration: config.subscription_duration,
                trueval_timeout: config.trueval_timeout,
            },
        };

        info!(
            "restored market state: {} epochs, {} predictions, {} subscriptions",
            epochs.len(),
            predictions.len(),
            subscriptions.len()
        );

        Ok(Self {
            clock: EpochClock::new(config.epoch_duration),
            resolver: config.resolver.clone(),
            fee_collector: config.fee_collector.clone(),
            db,
            ledger,
            state: Mutex::new(MarketState {
                epochs,
                predictions,
                subscriptions,
                params,
            }),
        })
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    // ===== Prediction Ledger =====

    /// Submit or wholesale-replace a prediction for a future epoch.
    ///
    /// A resubmission before the cutoff replaces the previous position;
    /// the external transfer is the net delta between the two stakes.
    pub async fn submit_prediction(
        &self,
        predictor: &str,
        epoch: i64,
        direction: bool,
        stake: u64,
        now: i64,
    ) -> MarketResult<Prediction> {
        let predictor = normalize_identity(predictor)?;
        if stake == 0 {
            return Err(MarketError::input("stake must be positive"));
        }
        self.ensure_aligned(epoch)?;

        let mut state = self.state.lock().await;
        let state = &mut *state;

        if state.params.paused {
            return Err(MarketError::state("paused"));
        }
        if !self.clock.accepts_predictions(epoch, now) {
            return Err(MarketError::input("too late to submit"));
        }

        if let Some(ep) = state.epochs.get(&epoch) {
            if ep.status != EpochStatus::Pending {
                return Err(MarketError::state("epoch already resolved"));
            }
        }

        let key = (epoch, predictor.clone());
        let previous = state.predictions.get(&key).cloned();

        // Pull the net delta before touching any state; an insufficient
        // balance aborts the whole submission.
        let old_stake = previous.as_ref().map(|p| p.stake).unwrap_or(0);
        if stake > old_stake {
            self.ledger
                .transfer(&predictor, CUSTODY_ACCOUNT, stake - old_stake)
                .await?;
        } else if old_stake > stake {
            self.ledger
                .transfer(CUSTODY_ACCOUNT, &predictor, old_stake - stake)
                .await?;
        }

        let ep = state.epochs.entry(epoch).or_insert_with(|| Epoch::new(epoch));
        if let Some(prev) = &previous {
            ep.total_stake -= prev.stake;
            ep.custody -= prev.stake;
            if prev.direction {
                ep.true_stake -= prev.stake;
            }
        }
        ep.total_stake += stake;
        ep.custody += stake;
        if direction {
            ep.true_stake += stake;
        }

        let prediction = Prediction {
            epoch,
            predictor: predictor.clone(),
            direction,
            stake,
            paid: false,
        };
        state.predictions.insert(key, prediction.clone());

        self.db.upsert_epoch(ep).await?;
        self.db.upsert_prediction(&prediction).await?;
        self.db
            .insert_settlement(&settlement(
                SettlementKind::Submitted,
                epoch,
                Some(predictor.clone()),
                Some(stake),
                None,
                EpochStatus::Pending,
                now,
            ))
            .await?;

        debug!(
            "prediction recorded: {} staked {} on {} for epoch {}",
            predictor, stake, direction, epoch
        );
        Ok(prediction)
    }

    // ===== Resolution State Machine =====

    /// Publish ground truth for a closed epoch, or cancel it outright.
    ///
    /// Single-shot: once an epoch leaves Pending no further transition
    /// is accepted. If nobody predicted the truth, the whole pool is
    /// swept to the fee collector immediately so later claims settle
    /// to zero without residue.
    pub async fn resolve(
        &self,
        caller: &str,
        epoch: i64,
        truth: bool,
        cancel: bool,
        now: i64,
    ) -> MarketResult<Epoch> {
        if caller != self.resolver {
            return Err(MarketError::auth("caller is not the resolver"));
        }
        self.ensure_aligned(epoch)?;
        if !self.clock.epoch_closed(epoch, now) {
            return Err(MarketError::input("too early to submit"));
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;

        let ep = state.epochs.entry(epoch).or_insert_with(|| Epoch::new(epoch));
        if ep.status != EpochStatus::Pending {
            return Err(MarketError::state("epoch already resolved"));
        }

        if cancel {
            ep.status = EpochStatus::Canceled;
            info!("epoch {} canceled by resolver", epoch);
        } else {
            ep.trueval = Some(truth);
            ep.status = EpochStatus::Paying;

            // All-slashed short-circuit: no winners means nothing is
            // claimable, so the remaining pool goes to the collector now.
            if ep.winning_stake(truth) == 0 && ep.custody > 0 {
                let swept = ep.custody;
                self.ledger
                    .transfer(CUSTODY_ACCOUNT, &self.fee_collector, swept)
                    .await?;
                ep.custody = 0;
                self.db
                    .insert_settlement(&settlement(
                        SettlementKind::Sweep,
                        epoch,
                        Some(self.fee_collector.clone()),
                        Some(ep.total_stake),
                        Some(swept),
                        EpochStatus::Paying,
                        now,
                    ))
                    .await?;
                info!("💰 epoch {}: no winners, pool of {} swept", epoch, swept);
            }
            info!("✅ epoch {} resolved: truth = {}", epoch, truth);
        }

        self.db.upsert_epoch(ep).await?;
        self.db
            .insert_settlement(&settlement(
                SettlementKind::Resolved,
                epoch,
                None,
                Some(ep.total_stake),
                None,
                ep.status,
                now,
            ))
            .await?;

        Ok(ep.clone())
    }

    // ===== Payout Engine & Timeout Fallback =====

    /// Settle one predictor's position for one epoch.
    ///
    /// Returns `Ok(None)` for the idempotent no-ops: position already
    /// paid, or epoch still Pending inside the resolver's grace window.
    pub async fn claim(
        &self,
        predictor: &str,
        epoch: i64,
        now: i64,
    ) -> MarketResult<Option<SettlementRecord>> {
        let predictor = normalize_identity(predictor)?;
        self.ensure_aligned(epoch)?;

        let mut state = self.state.lock().await;
        let state = &mut *state;
        self.claim_locked(state, &predictor, epoch, now).await
    }

    /// Batched claim over several epochs (all must hold a position).
    pub async fn claim_many(
        &self,
        predictor: &str,
        epochs: &[i64],
        now: i64,
    ) -> MarketResult<Vec<(i64, Option<SettlementRecord>)>> {
        let predictor = normalize_identity(predictor)?;

        let mut state = self.state.lock().await;
        let state = &mut *state;

        for &epoch in epochs {
            self.ensure_aligned(epoch)?;
            if !state
                .predictions
                .contains_key(&(epoch, predictor.clone()))
            {
                return Err(MarketError::UnknownPrediction {
                    epoch,
                    predictor: predictor.clone(),
                });
            }
        }

        let mut results = Vec::with_capacity(epochs.len());
        for &epoch in epochs {
            let outcome = self.claim_locked(state, &predictor, epoch, now).await?;
            results.push((epoch, outcome));
        }
        Ok(results)
    }

    async fn claim_locked(
        &self,
        state: &mut MarketState,
        predictor: &str,
        epoch: i64,
        now: i64,
    ) -> MarketResult<Option<SettlementRecord>> {
        let key = (epoch, predictor.to_string());
        let Some(prediction) = state.predictions.get(&key).cloned() else {
            return Err(MarketError::UnknownPrediction {
                epoch,
                predictor: predictor.to_string(),
            });
        };
        if prediction.paid {
            return Ok(None);
        }

        let ep = state
            .epochs
            .get_mut(&epoch)
            .ok_or_else(|| MarketError::state("epoch record missing"))?;

        let (payout, record_status) = match ep.status {
            EpochStatus::Pending => {
                if !self
                    .clock
                    .timed_out(epoch, now, state.params.trueval_timeout)
                {
                    // Round still in progress; polling clients just retry.
                    return Ok(None);
                }
                // Resolver missed its deadline: this claim is an implicit
                // per-predictor cancellation. The epoch itself stays
                // Pending; each position resolves its own fate lazily.
                (prediction.stake, EpochStatus::Canceled)
            }
            EpochStatus::Canceled => (prediction.stake, EpochStatus::Canceled),
            EpochStatus::Paying => {
                let truth = ep
                    .trueval
                    .ok_or_else(|| MarketError::state("resolved epoch missing truth value"))?;
                let winning_pool = ep.winning_stake(truth);
                let amount = if prediction.direction == truth && winning_pool > 0 {
                    proportional_payout(prediction.stake, ep.total_stake, winning_pool)
                } else {
                    0
                };
                // A late resolution after timeout refunds can leave the
                // pool short; never pay out more than the epoch holds.
                (amount.min(ep.custody), EpochStatus::Paying)
            }
        };

        if payout > 0 {
            self.ledger
                .transfer(CUSTODY_ACCOUNT, predictor, payout)
                .await?;
            ep.custody -= payout;
        }

        let paid = Prediction {
            paid: true,
            ..prediction.clone()
        };
        state.predictions.insert(key, paid.clone());

        let record = settlement(
            SettlementKind::Payout,
            epoch,
            Some(predictor.to_string()),
            Some(prediction.stake),
            Some(payout),
            record_status,
            now,
        );

        self.db.upsert_epoch(ep).await?;
        self.db.upsert_prediction(&paid).await?;
        self.db.insert_settlement(&record).await?;

        info!(
            "epoch {} claim by {}: stake {} -> payout {} ({})",
            epoch,
            predictor,
            prediction.stake,
            payout,
            record_status.as_str()
        );
        Ok(Some(record))
    }

    // ===== Subscription & Access Gate =====

    /// Purchase read access. Back-to-back purchases extend the existing
    /// entitlement rather than resetting it; the payment is attributed
    /// in full to the epoch in which the purchase lands.
    pub async fn purchase_subscription(
        &self,
        buyer: &str,
        amount: u64,
        now: i64,
    ) -> MarketResult<Subscription> {
        let buyer = normalize_identity(buyer)?;
        if amount == 0 {
            return Err(MarketError::input("payment must be positive"));
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;

        self.ledger.transfer(&buyer, CUSTODY_ACCOUNT, amount).await?;

        let current = state
            .subscriptions
            .get(&buyer)
            .map(|s| s.expires)
            .unwrap_or(0);
        let expires = current.max(now) + state.params.subscription_duration;
        let subscription = Subscription {
            consumer: buyer.clone(),
            expires,
        };
        state
            .subscriptions
            .insert(buyer.clone(), subscription.clone());

        let attribution = self.clock.epoch_start(now);
        let ep = state
            .epochs
            .entry(attribution)
            .or_insert_with(|| Epoch::new(attribution));
        ep.revenue += amount;

        self.db.upsert_epoch(ep).await?;
        self.db.set_subscription(&buyer, expires).await?;
        self.db
            .insert_settlement(&settlement(
                SettlementKind::Revenue,
                attribution,
                Some(buyer.clone()),
                None,
                Some(amount),
                ep.status,
                now,
            ))
            .await?;

        debug!(
            "subscription for {} extended to {} (paid {})",
            buyer, expires, amount
        );
        Ok(subscription)
    }

    pub async fn is_valid_subscription(&self, consumer: &str, now: i64) -> bool {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(consumer)
            .map(|s| s.expires >= now)
            .unwrap_or(false)
    }

    /// Read the aggregated consensus for a closed epoch.
    ///
    /// Gated three ways: the window must be closed (no in-flight
    /// sentiment leaks), the caller must present a valid capability for
    /// their own identity, and the identity must hold a live
    /// subscription. Returns (true-direction stake, total stake).
    pub async fn aggregate(
        &self,
        epoch: i64,
        caller: &str,
        token: &AuthorizationToken,
        now: i64,
    ) -> MarketResult<(u64, u64)> {
        self.ensure_aligned(epoch)?;
        if !self.clock.epoch_closed(epoch, now) {
            return Err(MarketError::input("predictions not closed"));
        }

        token.verify(caller, now)?;

        let state = self.state.lock().await;
        let live = state
            .subscriptions
            .get(&token.subject)
            .map(|s| s.expires >= now)
            .unwrap_or(false);
        if !live {
            return Err(MarketError::auth("no subscription"));
        }

        let (true_stake, total_stake) = state
            .epochs
            .get(&epoch)
            .map(|e| (e.true_stake, e.total_stake))
            .unwrap_or((0, 0));
        Ok((true_stake, total_stake))
    }

    /// Raw pooled liquidity for a closed epoch; no subscription needed
    /// since the direction split is not revealed.
    pub async fn total_stake(&self, epoch: i64, now: i64) -> MarketResult<u64> {
        self.ensure_aligned(epoch)?;
        if !self.clock.epoch_closed(epoch, now) {
            return Err(MarketError::input("predictions not closed"));
        }
        let state = self.state.lock().await;
        Ok(state
            .epochs
            .get(&epoch)
            .map(|e| e.total_stake)
            .unwrap_or(0))
    }

    /// Read a single position. Until the epoch closes only its owner
    /// may see it; afterwards it is public history.
    pub async fn prediction(
        &self,
        epoch: i64,
        of: &str,
        caller: &str,
        now: i64,
    ) -> MarketResult<Prediction> {
        self.ensure_aligned(epoch)?;
        if caller != of && !self.clock.epoch_closed(epoch, now) {
            return Err(MarketError::auth("you shall not pass"));
        }
        let state = self.state.lock().await;
        state
            .predictions
            .get(&(epoch, of.to_string()))
            .cloned()
            .ok_or_else(|| MarketError::UnknownPrediction {
                epoch,
                predictor: of.to_string(),
            })
    }

    // ===== Revenue Reclamation =====

    /// Sweep an elapsed epoch's accrued subscription revenue to the fee
    /// collector. Admin-only; current and future epochs are rejected.
    pub async fn redeem_unused_revenue(
        &self,
        caller: &str,
        epoch: i64,
        now: i64,
    ) -> MarketResult<u64> {
        self.ensure_admin(caller)?;
        self.ensure_aligned(epoch)?;
        if epoch >= self.clock.epoch_start(now) {
            return Err(MarketError::input("cannot redeem current or future epoch"));
        }

        let mut state = self.state.lock().await;
        let state = &mut *state;

        let Some(ep) = state.epochs.get_mut(&epoch) else {
            return Ok(0);
        };
        let amount = ep.revenue;
        if amount == 0 {
            return Ok(0);
        }

        self.ledger
            .transfer(CUSTODY_ACCOUNT, &self.fee_collector, amount)
            .await?;
        ep.revenue = 0;

        self.db.upsert_epoch(ep).await?;
        self.db
            .insert_settlement(&settlement(
                SettlementKind::Sweep,
                epoch,
                Some(self.fee_collector.clone()),
                None,
                Some(amount),
                ep.status,
                now,
            ))
            .await?;

        info!("epoch {}: unused revenue {} reclaimed", epoch, amount);
        Ok(amount)
    }

    // ===== Administration =====

    /// Toggle the submission pause. Settlement and reads stay available.
    pub async fn pause_predictions(&self, caller: &str) -> MarketResult<bool> {
        self.ensure_admin(caller)?;
        let mut state = self.state.lock().await;
        state.params.paused = !state.params.paused;
        let paused = state.params.paused;
        self.db.upsert_params(&state.params).await?;
        info!("predictions {}", if paused { "paused" } else { "resumed" });
        Ok(paused)
    }

    pub async fn update_params(
        &self,
        caller: &str,
        subscription_duration: i64,
        trueval_timeout: i64,
    ) -> MarketResult<MarketParams> {
        self.ensure_admin(caller)?;
        if subscription_duration <= 0 || trueval_timeout <= 0 {
            return Err(MarketError::input("durations must be positive"));
        }
        let mut state = self.state.lock().await;
        state.params.subscription_duration = subscription_duration;
        state.params.trueval_timeout = trueval_timeout;
        self.db.upsert_params(&state.params).await?;
        Ok(state.params.clone())
    }

    // ===== Introspection =====

    pub async fn epoch_info(&self, epoch: i64) -> Option<Epoch> {
        let state = self.state.lock().await;
        state.epochs.get(&epoch).cloned()
    }

    pub async fn params(&self) -> MarketParams {
        let state = self.state.lock().await;
        state.params.clone()
    }

    pub async fn settlements(
        &self,
        epoch: Option<i64>,
        limit: usize,
    ) -> MarketResult<Vec<SettlementRecord>> {
        Ok(self.db.list_settlements(epoch, limit).await?)
    }

    /// Sum of unpaid stakes for an epoch; equals the epoch's custody
    /// balance while it is Pending (the conservation invariant).
    pub async fn unpaid_stake(&self, epoch: i64) -> u64 {
        let state = self.state.lock().await;
        state
            .predictions
            .values()
            .filter(|p| p.epoch == epoch && !p.paid)
            .map(|p| p.stake)
            .sum()
    }

    fn ensure_aligned(&self, epoch: i64) -> MarketResult<()> {
        if !self.clock.is_aligned(epoch) {
            return Err(MarketError::input("invalid epoch identifier"));
        }
        Ok(())
    }

    fn ensure_admin(&self, caller: &str) -> MarketResult<()> {
        if caller != self.fee_collector {
            return Err(MarketError::auth("caller is not the market admin"));
        }
        Ok(())
    }
}

/// Winner share of the pool, floor division with a wide intermediate
fn proportional_payout(stake: u64, total_pool: u64, winning_pool: u64) -> u64 {
    ((stake as u128 * total_pool as u128) / winning_pool as u128) as u64
}

fn normalize_identity(identity: &str) -> MarketResult<String> {
    let id = identity.trim().to_lowercase();
    if id.is_empty() {
        return Err(MarketError::input("identity required"));
    }
    Ok(id)
}

fn settlement(
    kind: SettlementKind,
    epoch: i64,
    account: Option<String>,
    stake: Option<u64>,
    payout: Option<u64>,
    status: EpochStatus,
    ts: i64,
) -> SettlementRecord {
    SettlementRecord {
        id: Uuid::new_v4().to_string(),
        ts,
        kind,
        epoch,
        account,
        stake,
        payout,
        status,
    }
}
