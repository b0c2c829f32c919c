//! Settlement Orchestrator
//!
//! Drives a locked round to its terminal status exactly once. The claim is a
//! compare-and-set on the round status (`locked → closing`), so a concurrent
//! retry loses the race before touching any wallet; the `platform_payouts`
//! primary key is the second, database-level guard. All ledger effects,
//! bet-status flips, and the payout record commit in one SQLite transaction —
//! any failure rolls the round back to its pre-settlement state.
//!
//! Broadcasts happen strictly after commit and are best-effort: a client that
//! cannot be reached is logged, never rolled back.

use crate::db::{parse_ts, Db};
use crate::error::EngineError;
use crate::ledger::{self, TxKind};
use crate::models::Currency;
use crate::notifier::{Notifier, WsEvent};
use crate::payout::{self, PayoutBreakdown};
use crate::presence::PresenceTracker;
use crate::rounds::{self, BetStatus, RoundStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub round_id: String,
    pub stream_id: String,
    pub breakdown: PayoutBreakdown,
    pub winners: usize,
    pub losers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub round_id: String,
    pub stream_id: String,
    pub refunded: usize,
}

/// The immutable settlement-completion record.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformPayoutRecord {
    pub round_id: String,
    pub creator_user_id: Option<String>,
    pub creator_share_pct: f64,
    pub gold_platform: f64,
    pub gold_creator: f64,
    pub sweep_platform: f64,
    pub sweep_creator: f64,
    pub created_at: DateTime<Utc>,
}

/// Read-only pot breakdown for admin reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutReport {
    pub round_id: String,
    pub stream_id: String,
    pub round_status: RoundStatus,
    pub variables: Vec<rounds::BettingVariable>,
    pub payout: Option<PlatformPayoutRecord>,
}

/// Per-user result summary handed to the notification collaborator after
/// settlement.
#[derive(Debug, Clone, Serialize)]
pub struct UserRoundSummary {
    pub user_id: String,
    pub round_id: String,
    /// "won" | "lost" | "void"
    pub result: String,
    pub gold_wagered: f64,
    pub gold_returned: f64,
    pub sweep_wagered: f64,
    pub sweep_returned: f64,
}

#[derive(Clone)]
pub struct Settler {
    db: Db,
    notifier: Notifier,
    presence: PresenceTracker,
    house_cut_fraction: f64,
}

impl Settler {
    pub fn new(
        db: Db,
        notifier: Notifier,
        presence: PresenceTracker,
        house_cut_fraction: f64,
    ) -> Self {
        Self {
            db,
            notifier,
            presence,
            house_cut_fraction,
        }
    }

    /// Close a locked round with the given winner and apply every payout.
    pub async fn settle_round(
        &self,
        round_id: &str,
        winning_variable_id: &str,
    ) -> Result<SettlementOutcome> {
        let id = round_id.to_string();
        let winner_id = winning_variable_id.to_string();
        let house_cut = self.house_cut_fraction;

        let (outcome, user_events) = self
            .db
            .transaction(move |tx| {
                claim_round(tx, &id, &[RoundStatus::Locked])?;

                let round = rounds::get_round(tx, &id)?;
                let stream = rounds::get_stream(tx, &round.stream_id)?;
                let variables = rounds::variables_for_round(tx, &id)?;
                if !variables.iter().any(|v| v.id == winner_id) {
                    return Err(EngineError::WinnerNotInRound {
                        round_id: id.clone(),
                        variable_id: winner_id.clone(),
                    }
                    .into());
                }

                // Winner flag: exactly one variable, set only on the way to
                // the terminal status.
                tx.execute(
                    "UPDATE betting_variables SET is_winner = (id = ?1) WHERE round_id = ?2",
                    params![winner_id, id],
                )?;

                let creator_pct = if stream.creator_user_id.is_some() {
                    stream.creator_rev_share_pct
                } else {
                    0.0
                };
                let breakdown = payout::compute(&variables, &winner_id, creator_pct, house_cut)?;

                let mut user_events: Vec<(String, WsEvent)> = Vec::new();
                let mut winners = 0usize;
                let mut losers = 0usize;
                let now = Utc::now();

                for bet in rounds::active_bets_for_round(tx, &id)? {
                    if bet.variable_id == winner_id {
                        let per = breakdown.for_currency(bet.currency);
                        let share =
                            payout::winner_share(bet.amount, per.winning_total, per.winners_pool);
                        let balance = ledger::apply(
                            tx,
                            &bet.user_id,
                            bet.currency,
                            share,
                            TxKind::BetWinnings,
                            Some("bet"),
                            Some(&bet.id),
                        )?;
                        tx.execute(
                            "UPDATE bets SET status = 'won', payout_amount = ?1, updated_at = ?2 WHERE id = ?3",
                            params![share, now.to_rfc3339(), bet.id],
                        )?;
                        winners += 1;
                        user_events.push((
                            bet.user_id.clone(),
                            WsEvent::BetResult {
                                user_id: bet.user_id.clone(),
                                round_id: id.clone(),
                                result: "won".to_string(),
                                currency: bet.currency,
                                amount: share,
                            },
                        ));
                        user_events.push((
                            bet.user_id.clone(),
                            WsEvent::BalanceUpdated {
                                user_id: bet.user_id.clone(),
                                currency: bet.currency,
                                balance,
                            },
                        ));
                    } else {
                        // The stake was debited at placement; losing has no
                        // further ledger effect.
                        tx.execute(
                            "UPDATE bets SET status = 'lost', updated_at = ?1 WHERE id = ?2",
                            params![now.to_rfc3339(), bet.id],
                        )?;
                        losers += 1;
                        user_events.push((
                            bet.user_id.clone(),
                            WsEvent::BetResult {
                                user_id: bet.user_id.clone(),
                                round_id: id.clone(),
                                result: "lost".to_string(),
                                currency: bet.currency,
                                amount: bet.amount,
                            },
                        ));
                    }
                }

                if breakdown.platform_total() > 0.0 {
                    tx.execute(
                        "INSERT INTO platform_payouts
                         (round_id, creator_user_id, creator_share_pct, gold_platform, gold_creator,
                          sweep_platform, sweep_creator, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            id,
                            stream.creator_user_id,
                            breakdown.creator_share_pct,
                            breakdown.gold.platform_payout,
                            breakdown.gold.creator_payout,
                            breakdown.sweep.platform_payout,
                            breakdown.sweep.creator_payout,
                            now.to_rfc3339()
                        ],
                    )?;
                }

                if let Some(creator) = &stream.creator_user_id {
                    for currency in Currency::ALL {
                        let amount = breakdown.for_currency(currency).creator_payout;
                        if amount > 0.0 {
                            let balance = ledger::apply(
                                tx,
                                creator,
                                currency,
                                amount,
                                TxKind::CreatorPayout,
                                Some("round"),
                                Some(&id),
                            )?;
                            user_events.push((
                                creator.clone(),
                                WsEvent::BalanceUpdated {
                                    user_id: creator.clone(),
                                    currency,
                                    balance,
                                },
                            ));
                        }
                    }
                }

                tx.execute(
                    "UPDATE rounds SET status = 'closed', closed_at = ?1 WHERE id = ?2",
                    params![now.to_rfc3339(), id],
                )?;

                Ok((
                    SettlementOutcome {
                        round_id: id.clone(),
                        stream_id: stream.id,
                        breakdown,
                        winners,
                        losers,
                    },
                    user_events,
                ))
            })
            .await
            .context("settle round")?;

        info!(
            round_id = %outcome.round_id,
            winners = outcome.winners,
            losers = outcome.losers,
            platform = outcome.breakdown.platform_total(),
            creator = outcome.breakdown.creator_total(),
            "🏁 Round settled"
        );

        self.emit(
            &outcome.stream_id,
            WsEvent::RoundSettled {
                round_id: outcome.round_id.clone(),
                stream_id: outcome.stream_id.clone(),
                winning_variable_id: outcome.breakdown.winning_variable_id.clone(),
            },
            user_events,
        );
        Ok(outcome)
    }

    /// Void a round: every bettor gets their stake back, no payout record.
    pub async fn cancel_round(&self, round_id: &str) -> Result<CancellationOutcome> {
        let id = round_id.to_string();
        let (outcome, user_events) = self
            .db
            .transaction(move |tx| {
                claim_round(tx, &id, &[RoundStatus::Open, RoundStatus::Locked])?;
                let round = rounds::get_round(tx, &id)?;

                let mut user_events: Vec<(String, WsEvent)> = Vec::new();
                let mut refunded = 0usize;
                let now = Utc::now();

                for bet in rounds::active_bets_for_round(tx, &id)? {
                    let balance = ledger::apply(
                        tx,
                        &bet.user_id,
                        bet.currency,
                        bet.amount,
                        TxKind::BetRefund,
                        Some("bet"),
                        Some(&bet.id),
                    )?;
                    tx.execute(
                        "UPDATE bets SET status = 'refunded', refund_amount = ?1, updated_at = ?2 WHERE id = ?3",
                        params![bet.amount, now.to_rfc3339(), bet.id],
                    )?;
                    refunded += 1;
                    user_events.push((
                        bet.user_id.clone(),
                        WsEvent::BetResult {
                            user_id: bet.user_id.clone(),
                            round_id: id.clone(),
                            result: "void".to_string(),
                            currency: bet.currency,
                            amount: bet.amount,
                        },
                    ));
                    user_events.push((
                        bet.user_id.clone(),
                        WsEvent::BalanceUpdated {
                            user_id: bet.user_id.clone(),
                            currency: bet.currency,
                            balance,
                        },
                    ));
                }

                tx.execute(
                    "UPDATE rounds SET status = 'cancelled', closed_at = ?1 WHERE id = ?2",
                    params![now.to_rfc3339(), id],
                )?;

                Ok((
                    CancellationOutcome {
                        round_id: id.clone(),
                        stream_id: round.stream_id,
                        refunded,
                    },
                    user_events,
                ))
            })
            .await
            .context("cancel round")?;

        info!(round_id = %outcome.round_id, refunded = outcome.refunded, "🚫 Round cancelled, stakes refunded");

        self.emit(
            &outcome.stream_id,
            WsEvent::RoundCancelled {
                round_id: outcome.round_id.clone(),
                stream_id: outcome.stream_id.clone(),
            },
            user_events,
        );
        Ok(outcome)
    }

    /// Pot breakdown for admin reporting; `payout` is present once the round
    /// settled with a positive platform amount.
    pub async fn payout_report(&self, round_id: &str) -> Result<PayoutReport> {
        let id = round_id.to_string();
        self.db
            .read(move |conn| {
                let round = rounds::get_round(conn, &id)?;
                let variables = rounds::variables_for_round(conn, &id)?;
                let payout = conn
                    .query_row(
                        "SELECT round_id, creator_user_id, creator_share_pct, gold_platform, gold_creator,
                                sweep_platform, sweep_creator, created_at
                         FROM platform_payouts WHERE round_id = ?1",
                        params![id],
                        |row| {
                            Ok(PlatformPayoutRecord {
                                round_id: row.get(0)?,
                                creator_user_id: row.get(1)?,
                                creator_share_pct: row.get(2)?,
                                gold_platform: row.get(3)?,
                                gold_creator: row.get(4)?,
                                sweep_platform: row.get(5)?,
                                sweep_creator: row.get(6)?,
                                created_at: parse_ts(7, row.get(7)?)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(PayoutReport {
                    round_id: round.id,
                    stream_id: round.stream_id,
                    round_status: round.status,
                    variables,
                    payout,
                })
            })
            .await
    }

    /// Build per-user result summaries for a terminal round, then clear the
    /// stream's participant set. The notification collaborator consumes the
    /// returned data; our responsibility ends here.
    pub async fn round_summaries(&self, round_id: &str) -> Result<Vec<UserRoundSummary>> {
        let id = round_id.to_string();
        let (stream_id, summaries) = self
            .db
            .read(move |conn| {
                let round = rounds::get_round(conn, &id)?;
                if !round.status.is_terminal() {
                    return Err(EngineError::RoundNotLocked {
                        round_id: id.clone(),
                        status: round.status,
                    }
                    .into());
                }

                let mut by_user: std::collections::HashMap<String, UserRoundSummary> =
                    std::collections::HashMap::new();
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, round_id, variable_id, currency, amount, status,
                            payout_amount, refund_amount, created_at, updated_at
                     FROM bets WHERE round_id = ?1 AND status IN ('won', 'lost', 'refunded')",
                )?;
                let bets = stmt
                    .query_map(params![id], |row| {
                        let currency: String = row.get(4)?;
                        let status: String = row.get(6)?;
                        Ok((
                            row.get::<_, String>(1)?,
                            Currency::from_str(&currency).unwrap_or(Currency::GoldCoins),
                            row.get::<_, f64>(5)?,
                            BetStatus::from_str(&status).unwrap_or(BetStatus::Lost),
                            row.get::<_, Option<f64>>(7)?,
                            row.get::<_, Option<f64>>(8)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for (user_id, currency, amount, status, payout_amount, refund_amount) in bets {
                    let entry = by_user
                        .entry(user_id.clone())
                        .or_insert_with(|| UserRoundSummary {
                            user_id,
                            round_id: id.clone(),
                            result: "lost".to_string(),
                            gold_wagered: 0.0,
                            gold_returned: 0.0,
                            sweep_wagered: 0.0,
                            sweep_returned: 0.0,
                        });
                    let returned = match status {
                        BetStatus::Won => payout_amount.unwrap_or(0.0),
                        BetStatus::Refunded => refund_amount.unwrap_or(0.0),
                        _ => 0.0,
                    };
                    match currency {
                        Currency::GoldCoins => {
                            entry.gold_wagered += amount;
                            entry.gold_returned += returned;
                        }
                        Currency::SweepCoins => {
                            entry.sweep_wagered += amount;
                            entry.sweep_returned += returned;
                        }
                    }
                    if status == BetStatus::Won {
                        entry.result = "won".to_string();
                    } else if status == BetStatus::Refunded && entry.result != "won" {
                        entry.result = "void".to_string();
                    }
                }

                let mut summaries: Vec<UserRoundSummary> = by_user.into_values().collect();
                summaries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                Ok((round.stream_id, summaries))
            })
            .await?;

        self.presence.clear_participants(&stream_id);
        Ok(summaries)
    }

    /// Post-commit fan-out. Failures here are logged, never propagated: the
    /// ledger transaction already committed.
    fn emit(&self, stream_id: &str, round_event: WsEvent, user_events: Vec<(String, WsEvent)>) {
        let delivered = self.notifier.broadcast_to_stream(stream_id, &round_event);
        if delivered == 0 {
            warn!(stream_id, "Round event had no connected viewers");
        }
        for (user_id, event) in user_events {
            self.notifier.send_to_user(&user_id, &event);
        }
    }
}

/// Compare-and-set claim on the round status. Exactly one caller can move a
/// round from an eligible status into `closing`; everyone else gets a typed
/// conflict.
fn claim_round(
    tx: &rusqlite::Transaction<'_>,
    round_id: &str,
    eligible: &[RoundStatus],
) -> Result<()> {
    let placeholders: Vec<&str> = eligible.iter().map(|s| s.as_str()).collect();
    let clause = placeholders
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let changed = tx.execute(
        &format!("UPDATE rounds SET status = 'closing' WHERE id = ?1 AND status IN ({clause})"),
        params![round_id],
    )?;
    if changed == 1 {
        return Ok(());
    }

    let round = rounds::get_round(tx, round_id)?;
    if round.status.is_terminal() || round.status == RoundStatus::Closing {
        Err(EngineError::AlreadySettled {
            round_id: round_id.to_string(),
        }
        .into())
    } else {
        Err(EngineError::RoundNotLocked {
            round_id: round_id.to_string(),
            status: round.status,
        }
        .into())
    }
}
