//! Streambet - Betting Round Settlement & Wallet Ledger Engine
//!
//! Pari-mutuel betting rounds attached to live streams, backed by a
//! dual-currency wallet ledger. Settlement runs exactly once per round
//! inside a single database transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streambet_backend::{
    api::{build_router, AppState},
    db::Db,
    ledger::Ledger,
    models::Config,
    notifier::{Notifier, WsEvent},
    presence::PresenceTracker,
    rounds::RoundStore,
    settlement::Settler,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!("🚀 Streambet engine starting");
    info!(
        db = %config.database_path,
        house_cut = config.house_cut_fraction,
        "Configuration loaded"
    );

    let db = Db::open(&config.database_path).context("open database")?;
    let ledger = Ledger::new(db.clone());
    let rounds = RoundStore::new(db.clone());
    let presence = PresenceTracker::new(config.participant_retention_secs);

    // The notifier handle exists before the listener accepts traffic, so
    // nothing ever broadcasts into an uninitialized registry.
    let notifier = Notifier::new();
    let settler = Settler::new(
        db,
        notifier.clone(),
        presence.clone(),
        config.house_cut_fraction,
    );

    tokio::spawn(auto_locker(
        rounds.clone(),
        notifier.clone(),
        config.autolock_interval_secs,
    ));

    let state = AppState {
        ledger,
        rounds,
        settler,
        presence,
        notifier,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streambet_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Periodic trigger flipping overdue rounds to `locked`. The underlying
/// operation is idempotent, so overlapping or duplicated ticks are harmless.
async fn auto_locker(rounds: RoundStore, notifier: Notifier, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        match rounds.lock_overdue_rounds(Utc::now()).await {
            Ok(locked) => {
                for (round_id, stream_id) in locked {
                    info!(round_id = %round_id, "⏰ Auto-locked overdue round");
                    notifier.broadcast_to_stream(
                        &stream_id,
                        &WsEvent::RoundLocked {
                            round_id,
                            stream_id: stream_id.clone(),
                        },
                    );
                }
            }
            Err(e) => error!(error = %e, "Auto-lock tick failed"),
        }
    }
}
