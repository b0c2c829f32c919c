//! End-to-end settlement flows through the public API.

use streambet_backend::db::Db;
use streambet_backend::error::{as_engine_error, EngineError};
use streambet_backend::ledger::{Ledger, TxKind};
use streambet_backend::models::Currency;
use streambet_backend::notifier::Notifier;
use streambet_backend::payout::DEFAULT_HOUSE_CUT;
use streambet_backend::presence::PresenceTracker;
use streambet_backend::rounds::{BetStatus, RoundStatus, RoundStore};
use streambet_backend::settlement::Settler;
use tempfile::NamedTempFile;

const TOL: f64 = 1e-6;

struct Harness {
    ledger: Ledger,
    rounds: RoundStore,
    settler: Settler,
    presence: PresenceTracker,
    _db_file: NamedTempFile,
}

fn harness() -> Harness {
    let file = NamedTempFile::new().unwrap();
    let db = Db::open(file.path().to_str().unwrap()).unwrap();
    let presence = PresenceTracker::new(3600);
    let settler = Settler::new(
        db.clone(),
        Notifier::new(),
        presence.clone(),
        DEFAULT_HOUSE_CUT,
    );
    Harness {
        ledger: Ledger::new(db.clone()),
        rounds: RoundStore::new(db),
        settler,
        presence,
        _db_file: file,
    }
}

async fn fund(h: &Harness, users: &[&str], currency: Currency, amount: f64) {
    for user in users {
        h.ledger
            .deposit(user, currency, amount, TxKind::Deposit)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn reference_scenario_with_creator_split() {
    let h = harness();
    fund(&h, &["alice", "bob", "carol"], Currency::SweepCoins, 1000.0).await;

    let stream = h
        .rounds
        .create_stream("poker night", Some("creator"), 20.0)
        .await
        .unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "hand 1", "poker", None, &["fold", "call"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();

    // 300 sweep on the losing side, 100 on the winning side.
    h.rounds
        .place_bet("alice", &vars[0].id, Currency::SweepCoins, 300.0)
        .await
        .unwrap();
    h.rounds
        .place_bet("bob", &vars[1].id, Currency::SweepCoins, 60.0)
        .await
        .unwrap();
    h.rounds
        .place_bet("carol", &vars[1].id, Currency::SweepCoins, 40.0)
        .await
        .unwrap();

    h.rounds.lock_round(&round.id).await.unwrap();
    let outcome = h.settler.settle_round(&round.id, &vars[1].id).await.unwrap();

    // House cut 45, creator 9, platform 36, winners split 255.
    assert!((outcome.breakdown.sweep.losing_pot - 300.0).abs() < TOL);
    assert!((outcome.breakdown.sweep.house_cut - 45.0).abs() < TOL);
    assert!((outcome.breakdown.sweep.creator_payout - 9.0).abs() < TOL);
    assert!((outcome.breakdown.sweep.platform_payout - 36.0).abs() < TOL);
    assert!((outcome.breakdown.sweep.winners_pool - 255.0).abs() < TOL);
    assert_eq!(outcome.winners, 2);
    assert_eq!(outcome.losers, 1);

    // Winners get their stake back plus a pro-rata share of 255.
    let bob = h.ledger.balances("bob").await.unwrap().sweep_balance;
    let carol = h.ledger.balances("carol").await.unwrap().sweep_balance;
    assert!((bob - (1000.0 + 153.0)).abs() < TOL); // 60/100 * 255
    assert!((carol - (1000.0 + 102.0)).abs() < TOL); // 40/100 * 255
    let alice = h.ledger.balances("alice").await.unwrap().sweep_balance;
    assert!((alice - 700.0).abs() < TOL);
    let creator = h.ledger.balances("creator").await.unwrap().sweep_balance;
    assert!((creator - 9.0).abs() < TOL);

    // Pot conservation: winner profit + platform + creator == losing pot.
    let winner_profit = (bob - 1000.0) + (carol - 1000.0);
    let conserved =
        winner_profit + outcome.breakdown.sweep.platform_payout + outcome.breakdown.sweep.creator_payout;
    assert!((conserved - 300.0).abs() < TOL);

    // Winnings in sweep coins are withdrawable.
    let w = h.ledger.balances("bob").await.unwrap();
    assert!((w.sweep_withdrawable - 213.0).abs() < TOL);

    let round = h.rounds.round_by_id(&round.id).await.unwrap();
    assert_eq!(round.status, RoundStatus::Closed);
    assert!(round.closed_at.is_some());

    let report = h.settler.payout_report(&round.id).await.unwrap();
    let payout = report.payout.expect("payout record written");
    assert!((payout.sweep_platform - 36.0).abs() < TOL);
    assert!((payout.sweep_creator - 9.0).abs() < TOL);
    assert_eq!(payout.creator_user_id.as_deref(), Some("creator"));
    // Exactly one winning variable, flagged only after the terminal status.
    let winners: Vec<_> = report.variables.iter().filter(|v| v.is_winner).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, vars[1].id);
}

#[tokio::test]
async fn settlement_runs_at_most_once() {
    let h = harness();
    fund(&h, &["alice", "bob"], Currency::GoldCoins, 500.0).await;

    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();
    h.rounds
        .place_bet("alice", &vars[0].id, Currency::GoldCoins, 100.0)
        .await
        .unwrap();
    h.rounds
        .place_bet("bob", &vars[1].id, Currency::GoldCoins, 100.0)
        .await
        .unwrap();
    h.rounds.lock_round(&round.id).await.unwrap();

    h.settler.settle_round(&round.id, &vars[0].id).await.unwrap();
    let alice_after = h.ledger.balances("alice").await.unwrap().gold_balance;

    // Second attempt is a conflict, not a re-execution.
    let err = h
        .settler
        .settle_round(&round.id, &vars[0].id)
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::AlreadySettled { .. })
    ));
    assert_eq!(
        h.ledger.balances("alice").await.unwrap().gold_balance,
        alice_after
    );

    // Cancellation after settlement is equally rejected.
    let err = h.settler.cancel_round(&round.id).await.unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::AlreadySettled { .. })
    ));
}

#[tokio::test]
async fn settlement_requires_a_locked_round() {
    let h = harness();
    fund(&h, &["alice"], Currency::GoldCoins, 100.0).await;

    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();

    let err = h
        .settler
        .settle_round(&round.id, &vars[0].id)
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::RoundNotLocked { .. })
    ));
}

#[tokio::test]
async fn unknown_winner_rolls_back_the_claim() {
    let h = harness();
    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, _vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();
    h.rounds.lock_round(&round.id).await.unwrap();

    let err = h
        .settler
        .settle_round(&round.id, "not-a-variable")
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::WinnerNotInRound { .. })
    ));

    // The failed claim rolled back; a valid retry still succeeds.
    let round = h.rounds.round_by_id(&round.id).await.unwrap();
    assert_eq!(round.status, RoundStatus::Locked);
    let vars = h.rounds.variables_for_round(&round.id).await.unwrap();
    h.settler.settle_round(&round.id, &vars[0].id).await.unwrap();
}

#[tokio::test]
async fn cancellation_refunds_every_stake_exactly() {
    let h = harness();
    fund(&h, &["alice", "bob"], Currency::GoldCoins, 800.0).await;
    fund(&h, &["alice"], Currency::SweepCoins, 50.0).await;

    let stream = h.rounds.create_stream("s", Some("creator"), 30.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();

    h.rounds
        .place_bet("alice", &vars[0].id, Currency::GoldCoins, 200.0)
        .await
        .unwrap();
    h.rounds
        .place_bet("alice", &vars[1].id, Currency::SweepCoins, 50.0)
        .await
        .unwrap();
    h.rounds
        .place_bet("bob", &vars[1].id, Currency::GoldCoins, 300.0)
        .await
        .unwrap();
    h.rounds.lock_round(&round.id).await.unwrap();

    let outcome = h.settler.cancel_round(&round.id).await.unwrap();
    assert_eq!(outcome.refunded, 3);

    // Everyone is back to their pre-round balances, both currencies.
    let alice = h.ledger.balances("alice").await.unwrap();
    assert!((alice.gold_balance - 800.0).abs() < TOL);
    assert!((alice.sweep_balance - 50.0).abs() < TOL);
    let bob = h.ledger.balances("bob").await.unwrap();
    assert!((bob.gold_balance - 800.0).abs() < TOL);
    // No payout record, no creator credit for a voided round.
    let report = h.settler.payout_report(&round.id).await.unwrap();
    assert!(report.payout.is_none());
    assert_eq!(h.ledger.balances("creator").await.unwrap().gold_balance, 0.0);

    let round = h.rounds.round_by_id(&round.id).await.unwrap();
    assert_eq!(round.status, RoundStatus::Cancelled);
    for bet in h.rounds.bets_for_round(&round.id).await.unwrap() {
        assert_eq!(bet.status, BetStatus::Refunded);
        assert_eq!(bet.refund_amount, Some(bet.amount));
    }
}

#[tokio::test]
async fn one_sided_pot_goes_to_the_house() {
    let h = harness();
    fund(&h, &["alice"], Currency::GoldCoins, 500.0).await;

    let stream = h.rounds.create_stream("s", Some("creator"), 20.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();
    // All 500 gold on the side that loses; nobody backed the winner.
    h.rounds
        .place_bet("alice", &vars[1].id, Currency::GoldCoins, 500.0)
        .await
        .unwrap();
    h.rounds.lock_round(&round.id).await.unwrap();

    let outcome = h.settler.settle_round(&round.id, &vars[0].id).await.unwrap();
    assert_eq!(outcome.winners, 0);
    assert!((outcome.breakdown.gold.house_cut - 500.0).abs() < TOL);
    assert!((outcome.breakdown.gold.creator_payout - 100.0).abs() < TOL);
    assert!((outcome.breakdown.gold.platform_payout - 400.0).abs() < TOL);
    assert_eq!(outcome.breakdown.gold.winners_pool, 0.0);

    assert_eq!(h.ledger.balances("alice").await.unwrap().gold_balance, 0.0);
    let creator = h.ledger.balances("creator").await.unwrap().gold_balance;
    assert!((creator - 100.0).abs() < TOL);
}

#[tokio::test]
async fn zero_pot_round_writes_no_payout_record() {
    let h = harness();
    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();
    h.rounds.lock_round(&round.id).await.unwrap();

    h.settler.settle_round(&round.id, &vars[0].id).await.unwrap();
    let report = h.settler.payout_report(&round.id).await.unwrap();
    assert!(report.payout.is_none());
    assert_eq!(report.round_status, RoundStatus::Closed);
}

#[tokio::test]
async fn summaries_cover_every_bettor_and_clear_participants() {
    let h = harness();
    fund(&h, &["alice", "bob"], Currency::SweepCoins, 500.0).await;

    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();
    h.rounds.open_round(&round.id).await.unwrap();
    h.rounds
        .place_bet("alice", &vars[0].id, Currency::SweepCoins, 100.0)
        .await
        .unwrap();
    h.presence.mark_participant(&stream.id, "alice");
    h.rounds
        .place_bet("bob", &vars[1].id, Currency::SweepCoins, 200.0)
        .await
        .unwrap();
    h.presence.mark_participant(&stream.id, "bob");

    h.rounds.lock_round(&round.id).await.unwrap();
    h.settler.settle_round(&round.id, &vars[0].id).await.unwrap();

    let summaries = h.settler.round_summaries(&round.id).await.unwrap();
    assert_eq!(summaries.len(), 2);
    let alice = summaries.iter().find(|s| s.user_id == "alice").unwrap();
    assert_eq!(alice.result, "won");
    assert!((alice.sweep_wagered - 100.0).abs() < TOL);
    // Stake back plus the whole winners' pool (170 = 200 * 0.85).
    assert!((alice.sweep_returned - 270.0).abs() < TOL);
    let bob = summaries.iter().find(|s| s.user_id == "bob").unwrap();
    assert_eq!(bob.result, "lost");
    assert_eq!(bob.sweep_returned, 0.0);

    // Consuming the summaries clears the participant set.
    assert!(h.presence.participants(&stream.id).is_empty());
}

#[tokio::test]
async fn bet_rejections_carry_the_specific_reason() {
    let h = harness();
    fund(&h, &["alice"], Currency::GoldCoins, 50.0).await;

    let stream = h.rounds.create_stream("s", None, 0.0).await.unwrap();
    let (round, vars) = h
        .rounds
        .create_round(&stream.id, "r", "c", None, &["a", "b"])
        .await
        .unwrap();

    // Round not open yet.
    let err = h
        .rounds
        .place_bet("alice", &vars[0].id, Currency::GoldCoins, 10.0)
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::RoundNotOpen { .. })
    ));

    h.rounds.open_round(&round.id).await.unwrap();
    let err = h
        .rounds
        .place_bet("alice", &vars[0].id, Currency::GoldCoins, 51.0)
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::InsufficientFunds { .. })
    ));
    let err = h
        .rounds
        .place_bet("alice", &vars[0].id, Currency::GoldCoins, -1.0)
        .await
        .unwrap_err();
    assert!(matches!(
        as_engine_error(&err),
        Some(EngineError::InvalidAmount { .. })
    ));
}
