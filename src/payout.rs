//! Payout Calculator
//!
//! Pure pari-mutuel math over a round's aggregate totals. The calculator
//! never touches storage and never iterates individual bets; per-bet
//! distribution is the orchestrator's job and uses [`winner_share`].
//!
//! Per currency, independently for gold and sweep:
//! 1. The losing pot is everything staked on non-winning variables.
//! 2. If nobody staked on the winning variable, there is nobody to pay:
//!    the whole losing pot becomes the house cut.
//! 3. Otherwise the house cut is a fixed fraction of the losing pot and the
//!    remainder is the winners' pool, split pro-rata on top of returned
//!    stakes.
//! 4. The house cut splits between the assigned stream creator and the
//!    platform by the creator's revenue-share percentage.

use crate::error::EngineError;
use crate::models::Currency;
use crate::rounds::BettingVariable;
use serde::Serialize;

/// Fraction of the losing pot reserved for platform + creator.
pub const DEFAULT_HOUSE_CUT: f64 = 0.15;

/// Payout figures for one currency.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CurrencyBreakdown {
    /// Total staked on non-winning variables.
    pub losing_pot: f64,
    /// Total staked on the winning variable.
    pub winning_total: f64,
    /// Number of bets on the winning variable.
    pub winner_count: i64,
    /// Portion of the losing pot withheld for platform + creator.
    pub house_cut: f64,
    /// Portion of the losing pot distributed to winners (zero when the
    /// winning side has no stake).
    pub winners_pool: f64,
    pub creator_payout: f64,
    pub platform_payout: f64,
}

/// Full breakdown for a round, one set of figures per currency.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutBreakdown {
    pub winning_variable_id: String,
    pub creator_share_pct: f64,
    pub gold: CurrencyBreakdown,
    pub sweep: CurrencyBreakdown,
}

impl PayoutBreakdown {
    pub fn for_currency(&self, currency: Currency) -> &CurrencyBreakdown {
        match currency {
            Currency::GoldCoins => &self.gold,
            Currency::SweepCoins => &self.sweep,
        }
    }

    pub fn platform_total(&self) -> f64 {
        self.gold.platform_payout + self.sweep.platform_payout
    }

    pub fn creator_total(&self) -> f64 {
        self.gold.creator_payout + self.sweep.creator_payout
    }
}

/// Compute the breakdown for a closed round.
///
/// `creator_share_pct` is the stream creator's revenue share in percent
/// (0 when no creator is assigned). Fails if the winner is not among the
/// given variables.
pub fn compute(
    variables: &[BettingVariable],
    winning_variable_id: &str,
    creator_share_pct: f64,
    house_cut_fraction: f64,
) -> Result<PayoutBreakdown, EngineError> {
    let winner = variables
        .iter()
        .find(|v| v.id == winning_variable_id)
        .ok_or_else(|| EngineError::NotFound {
            entity: "betting variable",
            id: winning_variable_id.to_string(),
        })?;
    let pct = creator_share_pct.clamp(0.0, 100.0);

    let mut breakdown = PayoutBreakdown {
        winning_variable_id: winner.id.clone(),
        creator_share_pct: pct,
        gold: CurrencyBreakdown::default(),
        sweep: CurrencyBreakdown::default(),
    };
    for currency in Currency::ALL {
        let losing_pot: f64 = variables
            .iter()
            .filter(|v| v.id != winner.id)
            .map(|v| v.total(currency))
            .sum();
        let per = compute_currency(
            losing_pot,
            winner.total(currency),
            winner.count(currency),
            pct,
            house_cut_fraction,
        );
        match currency {
            Currency::GoldCoins => breakdown.gold = per,
            Currency::SweepCoins => breakdown.sweep = per,
        }
    }
    Ok(breakdown)
}

/// One-currency pari-mutuel split.
pub fn compute_currency(
    losing_pot: f64,
    winning_total: f64,
    winner_count: i64,
    creator_share_pct: f64,
    house_cut_fraction: f64,
) -> CurrencyBreakdown {
    let losing_pot = losing_pot.max(0.0);

    let (house_cut, winners_pool) = if winner_count == 0 || winning_total <= 0.0 {
        // Degenerate one-sided pot: no winners to share the distribution,
        // the whole opposing pot goes to the house.
        (losing_pot, 0.0)
    } else {
        let cut = losing_pot * house_cut_fraction;
        (cut, losing_pot - cut)
    };

    let creator_payout = (house_cut * creator_share_pct / 100.0).max(0.0);
    let platform_payout = (house_cut - creator_payout).max(0.0);

    CurrencyBreakdown {
        losing_pot,
        winning_total: winning_total.max(0.0),
        winner_count,
        house_cut,
        winners_pool,
        creator_payout,
        platform_payout,
    }
}

/// A winning bet's full credit: stake returned plus its pro-rata share of
/// the winners' pool.
pub fn winner_share(stake: f64, winning_total: f64, winners_pool: f64) -> f64 {
    if winning_total <= 0.0 {
        return stake;
    }
    stake + stake / winning_total * winners_pool
}
