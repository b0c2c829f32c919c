//! Shared SQLite handle and schema.
//!
//! One connection behind a tokio mutex; every multi-step mutation runs inside
//! `Connection::transaction()` so wallet balances, aggregate totals, and the
//! transaction log move together or not at all.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open streambet db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS streams (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                creator_user_id TEXT,
                creator_rev_share_pct REAL NOT NULL DEFAULT 0.0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                stream_id TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                lock_at TEXT,
                created_at TEXT NOT NULL,
                closed_at TEXT,
                FOREIGN KEY (stream_id) REFERENCES streams(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_stream ON rounds(stream_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_status_lock ON rounds(status, lock_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS betting_variables (
                id TEXT PRIMARY KEY,
                round_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_winner INTEGER NOT NULL DEFAULT 0,
                gold_total REAL NOT NULL DEFAULT 0.0,
                gold_bet_count INTEGER NOT NULL DEFAULT 0,
                sweep_total REAL NOT NULL DEFAULT 0.0,
                sweep_bet_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (round_id) REFERENCES rounds(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_variables_round ON betting_variables(round_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                round_id TEXT NOT NULL,
                variable_id TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount REAL NOT NULL,
                status TEXT NOT NULL,
                payout_amount REAL,
                refund_amount REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                FOREIGN KEY (variable_id) REFERENCES betting_variables(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_round_status ON bets(round_id, status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_user ON bets(user_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wallets (
                user_id TEXT PRIMARY KEY,
                gold_balance REAL NOT NULL DEFAULT 0.0,
                sweep_balance REAL NOT NULL DEFAULT 0.0,
                sweep_withdrawable REAL NOT NULL DEFAULT 0.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Append-only: rows are inserted by the ledger and never updated.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount REAL NOT NULL,
                balance_after REAL NOT NULL,
                ref_kind TEXT,
                ref_id TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user_ts ON transactions(user_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_ref ON transactions(ref_kind, ref_id)",
            [],
        )?;

        // PRIMARY KEY on round_id is the database-level exactly-once guard:
        // a second settlement attempt cannot insert a second record.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS platform_payouts (
                round_id TEXT PRIMARY KEY,
                creator_user_id TEXT,
                creator_share_pct REAL NOT NULL,
                gold_platform REAL NOT NULL,
                gold_creator REAL NOT NULL,
                sweep_platform REAL NOT NULL,
                sweep_creator REAL NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id)
            )",
            [],
        )?;

        Ok(())
    }

    /// Run `f` inside a single SQLite transaction. Any error rolls the whole
    /// unit of work back.
    pub async fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit().context("commit transaction")?;
        Ok(out)
    }

    /// Run a read-only closure against the connection.
    pub async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}

/// Parse an RFC3339 column into a UTC timestamp inside a row mapper.
pub(crate) fn parse_ts(idx: usize, value: String) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use tempfile::NamedTempFile;

    /// Fresh on-disk database for a test; the tempfile guard keeps it alive.
    pub fn temp_db() -> (Db, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = Db::open(file.path().to_str().unwrap()).unwrap();
        (db, file)
    }
}
