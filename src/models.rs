use serde::{Deserialize, Serialize};

/// Wallet currency. The two coin types never mix: pots, payouts, and
/// balances are kept per currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Non-withdrawable promotional coins.
    GoldCoins,
    /// Withdrawable coins, subject to KYC rules outside this core.
    SweepCoins,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::GoldCoins, Currency::SweepCoins];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::GoldCoins => "gold_coins",
            Currency::SweepCoins => "sweep_coins",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gold_coins" => Some(Currency::GoldCoins),
            "sweep_coins" => Some(Currency::SweepCoins),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Seconds between auto-locker ticks.
    pub autolock_interval_secs: u64,
    /// Fraction of the losing pot reserved for platform + creator.
    pub house_cut_fraction: f64,
    /// Retention window for the betting-participant set, in seconds.
    pub participant_retention_secs: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./streambet.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let autolock_interval_secs = std::env::var("AUTOLOCK_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let house_cut_fraction = std::env::var("HOUSE_CUT_FRACTION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| (0.0..1.0).contains(&v))
            .unwrap_or(crate::payout::DEFAULT_HOUSE_CUT);

        let participant_retention_secs = std::env::var("PARTICIPANT_RETENTION_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86_400);

        Ok(Self {
            database_path,
            port,
            autolock_interval_secs,
            house_cut_fraction,
            participant_retention_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_round_trips() {
        for c in Currency::ALL {
            assert_eq!(Currency::from_str(c.as_str()), Some(c));
        }
        assert_eq!(Currency::from_str("doubloons"), None);
    }
}
