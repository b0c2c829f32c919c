//! Round/Bet State Machine
//!
//! Rounds move `created → open → locked → {closed | cancelled}`, with a
//! transient `closing` status the settlement orchestrator claims via
//! compare-and-set. Locking is the serialization point: once a round is
//! locked no bet mutation is legal, so settlement sees a frozen aggregate
//! snapshot.
//!
//! Placing, editing, or cancelling a bet runs in one SQLite transaction that
//! moves the wallet, the owning variable's aggregate totals, and the
//! transaction log together. Editing is cancel-then-reapply so the aggregates
//! cannot drift.

use crate::db::{parse_ts, Db};
use crate::error::EngineError;
use crate::ledger::{self, TxKind};
use crate::models::Currency;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Created,
    Open,
    Locked,
    /// Claimed by a settlement or cancellation in progress.
    Closing,
    Closed,
    Cancelled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Created => "created",
            RoundStatus::Open => "open",
            RoundStatus::Locked => "locked",
            RoundStatus::Closing => "closing",
            RoundStatus::Closed => "closed",
            RoundStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(RoundStatus::Created),
            "open" => Some(RoundStatus::Open),
            "locked" => Some(RoundStatus::Locked),
            "closing" => Some(RoundStatus::Closing),
            "closed" => Some(RoundStatus::Closed),
            "cancelled" => Some(RoundStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStatus::Closed | RoundStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Placed,
    Edited,
    Cancelled,
    Won,
    Lost,
    Refunded,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Placed => "placed",
            BetStatus::Edited => "edited",
            BetStatus::Cancelled => "cancelled",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "placed" => Some(BetStatus::Placed),
            "edited" => Some(BetStatus::Edited),
            "cancelled" => Some(BetStatus::Cancelled),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "refunded" => Some(BetStatus::Refunded),
            _ => None,
        }
    }

    /// A bet still counted in the aggregates and eligible for settlement.
    pub fn is_active(&self) -> bool {
        matches!(self, BetStatus::Placed | BetStatus::Edited)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub title: String,
    pub creator_user_id: Option<String>,
    pub creator_rev_share_pct: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingRound {
    pub id: String,
    pub stream_id: String,
    pub name: String,
    pub category: String,
    pub status: RoundStatus,
    pub lock_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One wagerable outcome. The per-currency running totals are the only state
/// the payout calculator ever reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingVariable {
    pub id: String,
    pub round_id: String,
    pub name: String,
    pub is_winner: bool,
    pub gold_total: f64,
    pub gold_bet_count: i64,
    pub sweep_total: f64,
    pub sweep_bet_count: i64,
}

impl BettingVariable {
    pub fn total(&self, currency: Currency) -> f64 {
        match currency {
            Currency::GoldCoins => self.gold_total,
            Currency::SweepCoins => self.sweep_total,
        }
    }

    pub fn count(&self, currency: Currency) -> i64 {
        match currency {
            Currency::GoldCoins => self.gold_bet_count,
            Currency::SweepCoins => self.sweep_bet_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub round_id: String,
    pub variable_id: String,
    pub currency: Currency,
    pub amount: f64,
    pub status: BetStatus,
    pub payout_amount: Option<f64>,
    pub refund_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RoundStore {
    db: Db,
}

impl RoundStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_stream(
        &self,
        title: &str,
        creator_user_id: Option<&str>,
        creator_rev_share_pct: f64,
    ) -> Result<Stream> {
        if !(0.0..=100.0).contains(&creator_rev_share_pct) {
            return Err(EngineError::InvalidAmount {
                amount: creator_rev_share_pct,
            }
            .into());
        }
        let stream = Stream {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            creator_user_id: creator_user_id.map(|s| s.to_string()),
            creator_rev_share_pct,
            created_at: Utc::now(),
        };
        let row = stream.clone();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO streams (id, title, creator_user_id, creator_rev_share_pct, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        row.title,
                        row.creator_user_id,
                        row.creator_rev_share_pct,
                        row.created_at.to_rfc3339()
                    ],
                )?;
                Ok(())
            })
            .await
            .context("create stream")?;
        Ok(stream)
    }

    /// Create a round in `created` with its outcome options. At least two
    /// mutually exclusive outcomes are required.
    pub async fn create_round(
        &self,
        stream_id: &str,
        name: &str,
        category: &str,
        lock_at: Option<DateTime<Utc>>,
        variable_names: &[&str],
    ) -> Result<(BettingRound, Vec<BettingVariable>)> {
        if variable_names.len() < 2 {
            bail!("a betting round needs at least two outcome options");
        }
        let round = BettingRound {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            status: RoundStatus::Created,
            lock_at,
            created_at: Utc::now(),
            closed_at: None,
        };
        let variables: Vec<BettingVariable> = variable_names
            .iter()
            .map(|n| BettingVariable {
                id: Uuid::new_v4().to_string(),
                round_id: round.id.clone(),
                name: n.to_string(),
                is_winner: false,
                gold_total: 0.0,
                gold_bet_count: 0,
                sweep_total: 0.0,
                sweep_bet_count: 0,
            })
            .collect();

        let round_row = round.clone();
        let var_rows = variables.clone();
        self.db
            .transaction(move |tx| {
                let exists: Option<String> = tx
                    .query_row(
                        "SELECT id FROM streams WHERE id = ?1",
                        params![round_row.stream_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(EngineError::NotFound {
                        entity: "stream",
                        id: round_row.stream_id.clone(),
                    }
                    .into());
                }
                tx.execute(
                    "INSERT INTO rounds (id, stream_id, name, category, status, lock_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        round_row.id,
                        round_row.stream_id,
                        round_row.name,
                        round_row.category,
                        round_row.status.as_str(),
                        round_row.lock_at.map(|t| t.to_rfc3339()),
                        round_row.created_at.to_rfc3339()
                    ],
                )?;
                for v in &var_rows {
                    tx.execute(
                        "INSERT INTO betting_variables (id, round_id, name) VALUES (?1, ?2, ?3)",
                        params![v.id, v.round_id, v.name],
                    )?;
                }
                Ok(())
            })
            .await
            .context("create round")?;

        info!(round_id = %round.id, stream_id, name, "🎲 Round created");
        Ok((round, variables))
    }

    /// `created → open`; enables bet placement.
    pub async fn open_round(&self, round_id: &str) -> Result<()> {
        let id = round_id.to_string();
        self.db
            .transaction(move |tx| {
                let changed = tx.execute(
                    "UPDATE rounds SET status = 'open' WHERE id = ?1 AND status = 'created'",
                    params![id],
                )?;
                if changed == 0 {
                    let round = get_round(tx, &id)?;
                    return Err(EngineError::RoundNotOpen {
                        round_id: id.clone(),
                        status: round.status,
                    }
                    .into());
                }
                Ok(())
            })
            .await?;
        info!(round_id, "🟢 Round opened for betting");
        Ok(())
    }

    /// Explicit `created/open → locked`. Locking an already-locked round is a
    /// no-op (returns false); a terminal round is a conflict.
    pub async fn lock_round(&self, round_id: &str) -> Result<bool> {
        let id = round_id.to_string();
        let transitioned = self
            .db
            .transaction(move |tx| {
                let changed = tx.execute(
                    "UPDATE rounds SET status = 'locked' WHERE id = ?1 AND status IN ('created', 'open')",
                    params![id],
                )?;
                if changed == 1 {
                    return Ok(true);
                }
                let round = get_round(tx, &id)?;
                if round.status == RoundStatus::Locked {
                    return Ok(false);
                }
                Err(EngineError::AlreadySettled {
                    round_id: id.clone(),
                }
                .into())
            })
            .await?;
        if transitioned {
            info!(round_id, "🔒 Round locked");
        }
        Ok(transitioned)
    }

    /// Auto-locker tick: flip every `created`/`open` round whose lock
    /// deadline has passed. Idempotent under overlapping ticks — a round
    /// already locked simply no longer matches. Returns (round_id, stream_id)
    /// pairs for broadcasting.
    pub async fn lock_overdue_rounds(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let cutoff = now.to_rfc3339();
        self.db
            .transaction(move |tx| {
                let mut stmt = tx.prepare_cached(
                    "SELECT id, stream_id FROM rounds
                     WHERE status IN ('created', 'open') AND lock_at IS NOT NULL AND lock_at < ?1",
                )?;
                let overdue = stmt
                    .query_map(params![cutoff], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for (round_id, _) in &overdue {
                    tx.execute(
                        "UPDATE rounds SET status = 'locked' WHERE id = ?1 AND status IN ('created', 'open')",
                        params![round_id],
                    )?;
                }
                Ok(overdue)
            })
            .await
            .context("lock overdue rounds")
    }

    /// Place a bet: debit the stake, bump the variable's aggregates, and
    /// write the audit row — one unit of work.
    pub async fn place_bet(
        &self,
        user_id: &str,
        variable_id: &str,
        currency: Currency,
        amount: f64,
    ) -> Result<Bet> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount { amount }.into());
        }
        let user = user_id.to_string();
        let var_id = variable_id.to_string();
        let bet = self
            .db
            .transaction(move |tx| {
                let variable = get_variable(tx, &var_id)?;
                let round = get_round(tx, &variable.round_id)?;
                if round.status != RoundStatus::Open {
                    return Err(EngineError::RoundNotOpen {
                        round_id: round.id,
                        status: round.status,
                    }
                    .into());
                }

                let now = Utc::now();
                let bet = Bet {
                    id: Uuid::new_v4().to_string(),
                    user_id: user.clone(),
                    round_id: round.id.clone(),
                    variable_id: variable.id.clone(),
                    currency,
                    amount,
                    status: BetStatus::Placed,
                    payout_amount: None,
                    refund_amount: None,
                    created_at: now,
                    updated_at: now,
                };

                ledger::apply(
                    tx,
                    &user,
                    currency,
                    -amount,
                    TxKind::BetPlaced,
                    Some("bet"),
                    Some(&bet.id),
                )?;
                tx.execute(
                    "INSERT INTO bets (id, user_id, round_id, variable_id, currency, amount, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        bet.id,
                        bet.user_id,
                        bet.round_id,
                        bet.variable_id,
                        currency.as_str(),
                        amount,
                        bet.status.as_str(),
                        now.to_rfc3339(),
                        now.to_rfc3339()
                    ],
                )?;
                adjust_aggregates(tx, &variable.id, currency, amount, 1)?;
                Ok(bet)
            })
            .await?;

        info!(bet_id = %bet.id, user_id, amount, currency = currency.as_str(), "💰 Bet placed");
        Ok(bet)
    }

    /// Change a bet's amount while the round is still open. Modeled as
    /// cancel-then-reapply: the old stake is fully reversed before the new
    /// one is debited, so the aggregates see both legs.
    pub async fn edit_bet(&self, bet_id: &str, user_id: &str, new_amount: f64) -> Result<Bet> {
        if !new_amount.is_finite() || new_amount <= 0.0 {
            return Err(EngineError::InvalidAmount { amount: new_amount }.into());
        }
        let id = bet_id.to_string();
        let user = user_id.to_string();
        let bet = self
            .db
            .transaction(move |tx| {
                let mut bet = get_owned_active_bet(tx, &id, &user)?;
                let round = get_round(tx, &bet.round_id)?;
                if round.status != RoundStatus::Open {
                    return Err(EngineError::RoundNotOpen {
                        round_id: round.id,
                        status: round.status,
                    }
                    .into());
                }

                // Cancel leg: return the old stake.
                ledger::apply(
                    tx,
                    &user,
                    bet.currency,
                    bet.amount,
                    TxKind::BetEdited,
                    Some("bet"),
                    Some(&bet.id),
                )?;
                adjust_aggregates(tx, &bet.variable_id, bet.currency, -bet.amount, -1)?;

                // Reapply leg: debit the new stake.
                ledger::apply(
                    tx,
                    &user,
                    bet.currency,
                    -new_amount,
                    TxKind::BetEdited,
                    Some("bet"),
                    Some(&bet.id),
                )?;
                adjust_aggregates(tx, &bet.variable_id, bet.currency, new_amount, 1)?;

                let now = Utc::now();
                tx.execute(
                    "UPDATE bets SET amount = ?1, status = 'edited', updated_at = ?2 WHERE id = ?3",
                    params![new_amount, now.to_rfc3339(), bet.id],
                )?;
                bet.amount = new_amount;
                bet.status = BetStatus::Edited;
                bet.updated_at = now;
                Ok(bet)
            })
            .await?;

        info!(bet_id, user_id, new_amount, "✏️ Bet edited");
        Ok(bet)
    }

    /// Cancel a bet while the round is still open; the stake goes back to
    /// the wallet and the aggregates are reversed.
    pub async fn cancel_bet(&self, bet_id: &str, user_id: &str) -> Result<Bet> {
        let id = bet_id.to_string();
        let user = user_id.to_string();
        let bet = self
            .db
            .transaction(move |tx| {
                let mut bet = get_owned_active_bet(tx, &id, &user)?;
                let round = get_round(tx, &bet.round_id)?;
                if round.status != RoundStatus::Open {
                    return Err(EngineError::RoundNotOpen {
                        round_id: round.id,
                        status: round.status,
                    }
                    .into());
                }

                ledger::apply(
                    tx,
                    &user,
                    bet.currency,
                    bet.amount,
                    TxKind::BetCancelled,
                    Some("bet"),
                    Some(&bet.id),
                )?;
                adjust_aggregates(tx, &bet.variable_id, bet.currency, -bet.amount, -1)?;

                let now = Utc::now();
                tx.execute(
                    "UPDATE bets SET status = 'cancelled', refund_amount = ?1, updated_at = ?2 WHERE id = ?3",
                    params![bet.amount, now.to_rfc3339(), bet.id],
                )?;
                bet.status = BetStatus::Cancelled;
                bet.refund_amount = Some(bet.amount);
                bet.updated_at = now;
                Ok(bet)
            })
            .await?;

        info!(bet_id, user_id, "↩️ Bet cancelled");
        Ok(bet)
    }

    pub async fn stream_by_id(&self, stream_id: &str) -> Result<Stream> {
        let id = stream_id.to_string();
        self.db.read(move |conn| get_stream(conn, &id)).await
    }

    pub async fn round_by_id(&self, round_id: &str) -> Result<BettingRound> {
        let id = round_id.to_string();
        self.db.read(move |conn| get_round(conn, &id)).await
    }

    pub async fn variables_for_round(&self, round_id: &str) -> Result<Vec<BettingVariable>> {
        let id = round_id.to_string();
        self.db.read(move |conn| variables_for_round(conn, &id)).await
    }

    pub async fn bets_for_round(&self, round_id: &str) -> Result<Vec<Bet>> {
        let id = round_id.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, round_id, variable_id, currency, amount, status,
                            payout_amount, refund_amount, created_at, updated_at
                     FROM bets WHERE round_id = ?1 ORDER BY created_at ASC",
                )?;
                let bets = stmt
                    .query_map(params![id], map_bet)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(bets)
            })
            .await
    }

    /// A user's own bets in one round, for the "my bets" view.
    pub async fn bets_for_user_in_round(&self, round_id: &str, user_id: &str) -> Result<Vec<Bet>> {
        let rid = round_id.to_string();
        let uid = user_id.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, round_id, variable_id, currency, amount, status,
                            payout_amount, refund_amount, created_at, updated_at
                     FROM bets WHERE round_id = ?1 AND user_id = ?2 ORDER BY created_at ASC",
                )?;
                let bets = stmt
                    .query_map(params![rid, uid], map_bet)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(bets)
            })
            .await
    }
}

// --- shared row access, usable inside any open transaction ---

pub(crate) fn get_stream(conn: &Connection, stream_id: &str) -> Result<Stream> {
    conn.query_row(
        "SELECT id, title, creator_user_id, creator_rev_share_pct, created_at
         FROM streams WHERE id = ?1",
        params![stream_id],
        |row| {
            Ok(Stream {
                id: row.get(0)?,
                title: row.get(1)?,
                creator_user_id: row.get(2)?,
                creator_rev_share_pct: row.get(3)?,
                created_at: parse_ts(4, row.get(4)?)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| {
        EngineError::NotFound {
            entity: "stream",
            id: stream_id.to_string(),
        }
        .into()
    })
}

pub(crate) fn get_round(conn: &Connection, round_id: &str) -> Result<BettingRound> {
    conn.query_row(
        "SELECT id, stream_id, name, category, status, lock_at, created_at, closed_at
         FROM rounds WHERE id = ?1",
        params![round_id],
        map_round,
    )
    .optional()?
    .ok_or_else(|| {
        EngineError::NotFound {
            entity: "round",
            id: round_id.to_string(),
        }
        .into()
    })
}

pub(crate) fn get_variable(conn: &Connection, variable_id: &str) -> Result<BettingVariable> {
    conn.query_row(
        "SELECT id, round_id, name, is_winner, gold_total, gold_bet_count, sweep_total, sweep_bet_count
         FROM betting_variables WHERE id = ?1",
        params![variable_id],
        map_variable,
    )
    .optional()?
    .ok_or_else(|| {
        EngineError::NotFound {
            entity: "betting variable",
            id: variable_id.to_string(),
        }
        .into()
    })
}

pub(crate) fn variables_for_round(conn: &Connection, round_id: &str) -> Result<Vec<BettingVariable>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, round_id, name, is_winner, gold_total, gold_bet_count, sweep_total, sweep_bet_count
         FROM betting_variables WHERE round_id = ?1",
    )?;
    let vars = stmt
        .query_map(params![round_id], map_variable)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(vars)
}

/// Bets still counted in the aggregates (placed or edited).
pub(crate) fn active_bets_for_round(conn: &Connection, round_id: &str) -> Result<Vec<Bet>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, round_id, variable_id, currency, amount, status,
                payout_amount, refund_amount, created_at, updated_at
         FROM bets WHERE round_id = ?1 AND status IN ('placed', 'edited')
         ORDER BY created_at ASC",
    )?;
    let bets = stmt
        .query_map(params![round_id], map_bet)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(bets)
}

fn get_owned_active_bet(conn: &Connection, bet_id: &str, user_id: &str) -> Result<Bet> {
    let bet: Bet = conn
        .query_row(
            "SELECT id, user_id, round_id, variable_id, currency, amount, status,
                    payout_amount, refund_amount, created_at, updated_at
             FROM bets WHERE id = ?1 AND user_id = ?2",
            params![bet_id, user_id],
            map_bet,
        )
        .optional()?
        .ok_or(EngineError::NotFound {
            entity: "bet",
            id: bet_id.to_string(),
        })?;
    if !bet.status.is_active() {
        return Err(EngineError::BetNotEditable {
            bet_id: bet.id,
            status: bet.status,
        }
        .into());
    }
    Ok(bet)
}

fn adjust_aggregates(
    conn: &Connection,
    variable_id: &str,
    currency: Currency,
    amount_delta: f64,
    count_delta: i64,
) -> Result<()> {
    let (total_col, count_col) = match currency {
        Currency::GoldCoins => ("gold_total", "gold_bet_count"),
        Currency::SweepCoins => ("sweep_total", "sweep_bet_count"),
    };
    conn.execute(
        &format!(
            "UPDATE betting_variables
             SET {total_col} = MAX({total_col} + ?1, 0.0), {count_col} = MAX({count_col} + ?2, 0)
             WHERE id = ?3"
        ),
        params![amount_delta, count_delta, variable_id],
    )?;
    Ok(())
}

fn map_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<BettingRound> {
    let status_str: String = row.get(4)?;
    Ok(BettingRound {
        id: row.get(0)?,
        stream_id: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        status: RoundStatus::from_str(&status_str).unwrap_or(RoundStatus::Created),
        lock_at: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_ts(5, s))
            .transpose()?,
        created_at: parse_ts(6, row.get(6)?)?,
        closed_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_ts(7, s))
            .transpose()?,
    })
}

fn map_variable(row: &rusqlite::Row<'_>) -> rusqlite::Result<BettingVariable> {
    Ok(BettingVariable {
        id: row.get(0)?,
        round_id: row.get(1)?,
        name: row.get(2)?,
        is_winner: row.get::<_, i64>(3)? == 1,
        gold_total: row.get(4)?,
        gold_bet_count: row.get(5)?,
        sweep_total: row.get(6)?,
        sweep_bet_count: row.get(7)?,
    })
}

fn map_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bet> {
    let currency_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    Ok(Bet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        round_id: row.get(2)?,
        variable_id: row.get(3)?,
        currency: Currency::from_str(&currency_str).unwrap_or(Currency::GoldCoins),
        amount: row.get(5)?,
        status: BetStatus::from_str(&status_str).unwrap_or(BetStatus::Placed),
        payout_amount: row.get(7)?,
        refund_amount: row.get(8)?,
        created_at: parse_ts(9, row.get(9)?)?,
        updated_at: parse_ts(10, row.get(10)?)?,
    })
}
