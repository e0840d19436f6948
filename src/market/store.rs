//! Market persistence
//!
//! Write-through SQLite store. The in-memory engine state is the
//! authority while the process runs; every mutation lands here so a
//! restart restores the full epoch arena, open predictions and
//! subscriptions. Settlement records are append-only.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use crate::models::{
    Epoch, EpochStatus, MarketParams, Prediction, SettlementKind, SettlementRecord, Subscription,
};

#[derive(Clone)]
pub struct MarketDb {
    conn: Arc<Mutex<Connection>>,
}

impl MarketDb {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open market db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS epochs (
                start INTEGER PRIMARY KEY,
                status TEXT NOT NULL,
                trueval INTEGER,
                total_stake INTEGER NOT NULL,
                true_stake INTEGER NOT NULL,
                custody INTEGER NOT NULL,
                revenue INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS predictions (
                epoch INTEGER NOT NULL,
                predictor TEXT NOT NULL,
                direction INTEGER NOT NULL,
                stake INTEGER NOT NULL,
                paid INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (epoch, predictor)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                consumer TEXT PRIMARY KEY,
                expires INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS market_params (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                paused INTEGER NOT NULL,
                subscription_duration INTEGER NOT NULL,
                trueval_timeout INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settlements (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                kind TEXT NOT NULL,
                epoch INTEGER NOT NULL,
                account TEXT,
                stake INTEGER,
                payout INTEGER,
                status TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_settlements_epoch ON settlements(epoch, ts ASC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_settlements_account ON settlements(account, ts DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn upsert_epoch(&self, epoch: &Epoch) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO epochs (start, status, trueval, total_stake, true_stake, custody, revenue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(start) DO UPDATE SET
                status = excluded.status,
                trueval = excluded.trueval,
                total_stake = excluded.total_stake,
                true_stake = excluded.true_stake,
                custody = excluded.custody,
                revenue = excluded.revenue",
            params![
                epoch.start,
                epoch.status.as_str(),
                epoch.trueval.map(|v| v as i64),
                epoch.total_stake as i64,
                epoch.true_stake as i64,
                epoch.custody as i64,
                epoch.revenue as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn load_epochs(&self) -> Result<HashMap<i64, Epoch>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT start, status, trueval, total_stake, true_stake, custody, revenue FROM epochs",
        )?;

        let rows = stmt.query_map([], |row| {
            let status: String = row.get(1)?;
            let trueval: Option<i64> = row.get(2)?;
            Ok(Epoch {
                start: row.get(0)?,
                status: EpochStatus::from_str(&status).unwrap_or(EpochStatus::Pending),
                trueval: trueval.map(|v| v != 0),
                total_stake: row.get::<_, i64>(3)? as u64,
                true_stake: row.get::<_, i64>(4)? as u64,
                custody: row.get::<_, i64>(5)? as u64,
                revenue: row.get::<_, i64>(6)? as u64,
            })
        })?;

        let mut out = HashMap::new();
        for epoch in rows.filter_map(|r| r.ok()) {
            out.insert(epoch.start, epoch);
        }
        Ok(out)
    }

    pub async fn upsert_prediction(&self, prediction: &Prediction) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO predictions (epoch, predictor, direction, stake, paid)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(epoch, predictor) DO UPDATE SET
                direction = excluded.direction,
                stake = excluded.stake,
                paid = excluded.paid",
            params![
                prediction.epoch,
                &prediction.predictor,
                prediction.direction as i64,
                prediction.stake as i64,
                prediction.paid as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn load_predictions(&self) -> Result<HashMap<(i64, String), Prediction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached("SELECT epoch, predictor, direction, stake, paid FROM predictions")?;

        let rows = stmt.query_map([], |row| {
            Ok(Prediction {
                epoch: row.get(0)?,
                predictor: row.get(1)?,
                direction: row.get::<_, i64>(2)? != 0,
                stake: row.get::<_, i64>(3)? as u64,
                paid: row.get::<_, i64>(4)? != 0,
            })
        })?;

        let mut out = HashMap::new();
        for prediction in rows.filter_map(|r| r.ok()) {
            out.insert((prediction.epoch, prediction.predictor.clone()), prediction);
        }
        Ok(out)
    }

    pub async fn set_subscription(&self, consumer: &str, expires: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO subscriptions (consumer, expires)
             VALUES (?1, ?2)
             ON CONFLICT(consumer) DO UPDATE SET expires = excluded.expires",
            params![consumer, expires],
        )?;
        Ok(())
    }

    pub async fn load_subscriptions(&self) -> Result<HashMap<String, Subscription>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT consumer, expires FROM subscriptions")?;

        let rows = stmt.query_map([], |row| {
            Ok(Subscription {
                consumer: row.get(0)?,
                expires: row.get(1)?,
            })
        })?;

        let mut out = HashMap::new();
        for sub in rows.filter_map(|r| r.ok()) {
            out.insert(sub.consumer.clone(), sub);
        }
        Ok(out)
    }

    pub async fn upsert_params(&self, p: &MarketParams) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO market_params (id, paused, subscription_duration, trueval_timeout)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                paused = excluded.paused,
                subscription_duration = excluded.subscription_duration,
                trueval_timeout = excluded.trueval_timeout",
            params![p.paused as i64, p.subscription_duration, p.trueval_timeout],
        )?;
        Ok(())
    }

    pub async fn load_params(&self) -> Result<Option<MarketParams>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT paused, subscription_duration, trueval_timeout
                 FROM market_params WHERE id = 1",
                [],
                |row| {
                    Ok(MarketParams {
                        paused: row.get::<_, i64>(0)? != 0,
                        subscription_duration: row.get(1)?,
                        trueval_timeout: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn insert_settlement(&self, rec: &SettlementRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO settlements
             (id, ts, kind, epoch, account, stake, payout, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &rec.id,
                rec.ts,
                rec.kind.as_str(),
                rec.epoch,
                rec.account.as_deref(),
                rec.stake.map(|v| v as i64),
                rec.payout.map(|v| v as i64),
                rec.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_settlements(
        &self,
        epoch: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SettlementRecord>> {
        let conn = self.conn.lock().await;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SettlementRecord> {
            let kind: String = row.get(2)?;
            let status: String = row.get(7)?;
            Ok(SettlementRecord {
                id: row.get(0)?,
                ts: row.get(1)?,
                kind: SettlementKind::from_str(&kind).unwrap_or(SettlementKind::Payout),
                epoch: row.get(3)?,
                account: row.get(4)?,
                stake: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                payout: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                status: EpochStatus::from_str(&status).unwrap_or(EpochStatus::Pending),
            })
        };

        let records = match epoch {
            Some(e) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, ts, kind, epoch, account, stake, payout, status
                     FROM settlements WHERE epoch = ?1 ORDER BY ts ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![e, limit as i64], map_row)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, ts, kind, epoch, account, stake, payout, status
                     FROM settlements ORDER BY ts DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], map_row)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_test_db() -> (MarketDb, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = MarketDb::new(temp.path().to_str().unwrap()).unwrap();
        (db, temp)
    }

    #[tokio::test]
    async fn test_epoch_roundtrip() {
        let (db, _temp) = open_test_db();

        let mut epoch = Epoch::new(900);
        epoch.total_stake = 150;
        epoch.true_stake = 100;
        epoch.custody = 150;
        db.upsert_epoch(&epoch).await.unwrap();

        epoch.status = EpochStatus::Paying;
        epoch.trueval = Some(true);
        db.upsert_epoch(&epoch).await.unwrap();

        let loaded = db.load_epochs().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let e = &loaded[&900];
        assert_eq!(e.status, EpochStatus::Paying);
        assert_eq!(e.trueval, Some(true));
        assert_eq!(e.total_stake, 150);
        assert_eq!(e.true_stake, 100);
    }

    #[tokio::test]
    async fn test_prediction_replace_keeps_single_row() {
        let (db, _temp) = open_test_db();

        let mut p = Prediction {
            epoch: 900,
            predictor: "alice".to_string(),
            direction: true,
            stake: 100,
            paid: false,
        };
        db.upsert_prediction(&p).await.unwrap();

        p.direction = false;
        p.stake = 60;
        db.upsert_prediction(&p).await.unwrap();

        let loaded = db.load_predictions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let stored = &loaded[&(900, "alice".to_string())];
        assert!(!stored.direction);
        assert_eq!(stored.stake, 60);
    }

    #[tokio::test]
    async fn test_params_default_absent_then_roundtrip() {
        let (db, _temp) = open_test_db();
        assert!(db.load_params().await.unwrap().is_none());

        let params = MarketParams {
            paused: true,
            subscription_duration: 3600,
            trueval_timeout: 7200,
        };
        db.upsert_params(&params).await.unwrap();

        let loaded = db.load_params().await.unwrap().unwrap();
        assert!(loaded.paused);
        assert_eq!(loaded.subscription_duration, 3600);
        assert_eq!(loaded.trueval_timeout, 7200);
    }

    #[tokio::test]
    async fn test_settlements_filter_by_epoch() {
        let (db, _temp) = open_test_db();

        for (i, epoch) in [(1, 900), (2, 900), (3, 1200)] {
            db.insert_settlement(&SettlementRecord {
                id: format!("rec-{i}"),
                ts: i,
                kind: SettlementKind::Payout,
                epoch,
                account: Some("alice".to_string()),
                stake: Some(100),
                payout: Some(150),
                status: EpochStatus::Paying,
            })
            .await
            .unwrap();
        }

        let for_epoch = db.list_settlements(Some(900), 10).await.unwrap();
        assert_eq!(for_epoch.len(), 2);
        assert!(for_epoch.iter().all(|r| r.epoch == 900));

        let all = db.list_settlements(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
