//! Wallet Ledger
//!
//! Per-user balances for the two coin types plus an append-only transaction
//! log. Every wallet mutation in the system goes through [`apply`]: it checks
//! the non-negative invariant, updates the balance, and writes the audit row
//! in one step, inside whatever SQLite transaction the caller opened.
//!
//! Invariants:
//! 1. Balances never go negative. A debit that would is rejected with
//!    `InsufficientFunds` and has no effect.
//! 2. Transaction rows are append-only and carry the resulting balance
//!    snapshot plus a reference to the originating entity.
//! 3. The withdrawable tracker for sweep coins never exceeds the sweep
//!    balance.

use crate::db::{parse_ts, Db};
use crate::error::EngineError;
use crate::models::Currency;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tolerance for float comparison against zero.
pub const BALANCE_EPSILON: f64 = 1e-9;

/// Transaction types written by wallet mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Purchased currency arriving from the payments collaborator.
    Deposit,
    AdminCredit,
    AdminDebit,
    /// Stake debited when a bet is placed.
    BetPlaced,
    /// Credit/debit pair written when a bet amount is edited.
    BetEdited,
    /// Stake returned on bet cancellation while the round was still open.
    BetCancelled,
    /// Winner distribution during settlement.
    BetWinnings,
    /// Stake returned when the whole round is voided.
    BetRefund,
    /// Creator's share of the house cut.
    CreatorPayout,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::AdminCredit => "admin_credit",
            TxKind::AdminDebit => "admin_debit",
            TxKind::BetPlaced => "bet_placed",
            TxKind::BetEdited => "bet_edited",
            TxKind::BetCancelled => "bet_cancelled",
            TxKind::BetWinnings => "bet_winnings",
            TxKind::BetRefund => "bet_refund",
            TxKind::CreatorPayout => "creator_payout",
        }
    }
}

/// A user's wallet balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalances {
    pub user_id: String,
    pub gold_balance: f64,
    pub sweep_balance: f64,
    pub sweep_withdrawable: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletBalances {
    pub fn balance(&self, currency: Currency) -> f64 {
        match currency {
            Currency::GoldCoins => self.gold_balance,
            Currency::SweepCoins => self.sweep_balance,
        }
    }

    fn empty(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            gold_balance: 0.0,
            sweep_balance: 0.0,
            sweep_withdrawable: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable audit record of one wallet mutation. `amount` is signed:
/// credits positive, debits negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub currency: Currency,
    pub amount: f64,
    pub balance_after: f64,
    pub ref_kind: Option<String>,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Apply one signed balance delta inside the caller's transaction.
///
/// Returns the resulting balance. This is the only code path that touches
/// wallet rows.
pub(crate) fn apply(
    tx: &rusqlite::Transaction<'_>,
    user_id: &str,
    currency: Currency,
    delta: f64,
    kind: TxKind,
    ref_kind: Option<&str>,
    ref_id: Option<&str>,
) -> Result<f64> {
    if !delta.is_finite() || delta == 0.0 {
        return Err(EngineError::InvalidAmount { amount: delta }.into());
    }

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT OR IGNORE INTO wallets (user_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![user_id, now],
    )?;

    let col = match currency {
        Currency::GoldCoins => "gold_balance",
        Currency::SweepCoins => "sweep_balance",
    };
    let (balance, withdrawable): (f64, f64) = tx.query_row(
        &format!("SELECT {col}, sweep_withdrawable FROM wallets WHERE user_id = ?1"),
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let new_balance = balance + delta;
    if new_balance < -BALANCE_EPSILON {
        return Err(EngineError::InsufficientFunds {
            currency,
            requested: -delta,
            available: balance,
        }
        .into());
    }
    let new_balance = new_balance.max(0.0);

    // Winnings in sweep coins become withdrawable; the tracker is capped at
    // the live balance so debits cannot leave it stranded above it.
    let new_withdrawable = if currency == Currency::SweepCoins {
        let w = if kind == TxKind::BetWinnings && delta > 0.0 {
            withdrawable + delta
        } else {
            withdrawable
        };
        w.min(new_balance)
    } else {
        withdrawable
    };

    tx.execute(
        &format!(
            "UPDATE wallets SET {col} = ?1, sweep_withdrawable = ?2, updated_at = ?3 WHERE user_id = ?4"
        ),
        params![new_balance, new_withdrawable, now, user_id],
    )?;

    tx.execute(
        "INSERT INTO transactions (id, user_id, kind, currency, amount, balance_after, ref_kind, ref_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            Uuid::new_v4().to_string(),
            user_id,
            kind.as_str(),
            currency.as_str(),
            delta,
            new_balance,
            ref_kind,
            ref_id,
            now
        ],
    )?;

    Ok(new_balance)
}

/// Public wallet-ledger API. The funds on-ramp (payments collaborator, admin
/// tools) only ever calls these entry points.
#[derive(Clone)]
pub struct Ledger {
    db: Db,
}

impl Ledger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Credit purchased or granted currency. `kind` distinguishes checkout
    /// deposits from admin grants.
    pub async fn deposit(
        &self,
        user_id: &str,
        currency: Currency,
        amount: f64,
        kind: TxKind,
    ) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount { amount }.into());
        }
        let user_id = user_id.to_string();
        self.db
            .transaction(move |tx| apply(tx, &user_id, currency, amount, kind, None, None))
            .await
            .context("ledger deposit")
    }

    /// Admin debit. Rejected if the wallet cannot cover it.
    pub async fn admin_debit(&self, user_id: &str, currency: Currency, amount: f64) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount { amount }.into());
        }
        let user_id = user_id.to_string();
        self.db
            .transaction(move |tx| {
                apply(tx, &user_id, currency, -amount, TxKind::AdminDebit, None, None)
            })
            .await
            .context("ledger admin debit")
    }

    /// Current balances; a user without a wallet row reads as zeros.
    pub async fn balances(&self, user_id: &str) -> Result<WalletBalances> {
        let user_id = user_id.to_string();
        self.db
            .read(move |conn| {
                let result = conn.query_row(
                    "SELECT user_id, gold_balance, sweep_balance, sweep_withdrawable, created_at, updated_at
                     FROM wallets WHERE user_id = ?1",
                    params![&user_id],
                    |row| {
                        Ok(WalletBalances {
                            user_id: row.get(0)?,
                            gold_balance: row.get(1)?,
                            sweep_balance: row.get(2)?,
                            sweep_withdrawable: row.get(3)?,
                            created_at: parse_ts(4, row.get(4)?)?,
                            updated_at: parse_ts(5, row.get(5)?)?,
                        })
                    },
                );
                match result {
                    Ok(w) => Ok(w),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(WalletBalances::empty(&user_id)),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Most recent transactions for a user, newest first.
    pub async fn transactions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>> {
        let user_id = user_id.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, kind, currency, amount, balance_after, ref_kind, ref_id, created_at
                     FROM transactions WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![user_id, limit], map_transaction)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Transactions that reference a given entity (bet, round, ...).
    pub async fn transactions_for_ref(
        &self,
        ref_kind: &str,
        ref_id: &str,
    ) -> Result<Vec<TransactionRecord>> {
        let ref_kind = ref_kind.to_string();
        let ref_id = ref_id.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, kind, currency, amount, balance_after, ref_kind, ref_id, created_at
                     FROM transactions WHERE ref_kind = ?1 AND ref_id = ?2 ORDER BY created_at ASC",
                )?;
                let rows = stmt
                    .query_map(params![ref_kind, ref_id], map_transaction)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let currency_str: String = row.get(3)?;
    Ok(TransactionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        currency: Currency::from_str(&currency_str).unwrap_or(Currency::GoldCoins),
        amount: row.get(4)?,
        balance_after: row.get(5)?,
        ref_kind: row.get(6)?,
        ref_id: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::temp_db;
    use crate::error::as_engine_error;

    #[tokio::test]
    async fn deposit_then_debit() {
        let (db, _f) = temp_db();
        let ledger = Ledger::new(db);

        let bal = ledger
            .deposit("u1", Currency::GoldCoins, 100.0, TxKind::Deposit)
            .await
            .unwrap();
        assert_eq!(bal, 100.0);

        let bal = ledger
            .admin_debit("u1", Currency::GoldCoins, 40.0)
            .await
            .unwrap();
        assert_eq!(bal, 60.0);

        let w = ledger.balances("u1").await.unwrap();
        assert_eq!(w.gold_balance, 60.0);
        assert_eq!(w.sweep_balance, 0.0);
    }

    #[tokio::test]
    async fn overdraft_rejected_with_no_effect() {
        let (db, _f) = temp_db();
        let ledger = Ledger::new(db);

        ledger
            .deposit("u1", Currency::SweepCoins, 10.0, TxKind::Deposit)
            .await
            .unwrap();

        let err = ledger
            .admin_debit("u1", Currency::SweepCoins, 10.5)
            .await
            .unwrap_err();
        assert!(matches!(
            as_engine_error(&err),
            Some(EngineError::InsufficientFunds { .. })
        ));

        // Balance untouched, no audit row for the rejected debit.
        let w = ledger.balances("u1").await.unwrap();
        assert_eq!(w.sweep_balance, 10.0);
        let txs = ledger.transactions_for_user("u1", 10).await.unwrap();
        assert_eq!(txs.len(), 1);
    }

    #[tokio::test]
    async fn currencies_are_independent() {
        let (db, _f) = temp_db();
        let ledger = Ledger::new(db);

        ledger
            .deposit("u1", Currency::GoldCoins, 500.0, TxKind::Deposit)
            .await
            .unwrap();

        // Gold cannot cover a sweep debit.
        let err = ledger
            .admin_debit("u1", Currency::SweepCoins, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(
            as_engine_error(&err),
            Some(EngineError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_amounts_rejected() {
        let (db, _f) = temp_db();
        let ledger = Ledger::new(db);

        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = ledger
                .deposit("u1", Currency::GoldCoins, bad, TxKind::Deposit)
                .await
                .unwrap_err();
            assert!(matches!(
                as_engine_error(&err),
                Some(EngineError::InvalidAmount { .. })
            ));
        }
    }

    #[tokio::test]
    async fn transaction_log_is_append_only_audit() {
        let (db, _f) = temp_db();
        let ledger = Ledger::new(db);

        ledger
            .deposit("u1", Currency::GoldCoins, 100.0, TxKind::Deposit)
            .await
            .unwrap();
        ledger
            .admin_debit("u1", Currency::GoldCoins, 30.0)
            .await
            .unwrap();

        let txs = ledger.transactions_for_user("u1", 10).await.unwrap();
        assert_eq!(txs.len(), 2);
        // Signed amounts with balance snapshots.
        let total: f64 = txs.iter().map(|t| t.amount).sum();
        assert!((total - 70.0).abs() < BALANCE_EPSILON);
        assert!(txs.iter().any(|t| t.kind == "admin_debit" && t.balance_after == 70.0));
    }
}
