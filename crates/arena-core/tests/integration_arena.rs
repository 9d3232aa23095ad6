//! Integration tests for the round scheduler.
//!
//! These tests drive complete sessions through the public API:
//! - Execution scenarios (BUY sizing, SELL without position, loss breaker)
//! - Ledger accounting across a multi-round mock session
//! - Mixed failures within one round and fallback ranking
//! - Round deadline enforcement
//! - Pause, resume and stop control
//! - Terminal states on market exhaustion and scheduler failure
//! - Event ordering

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use arena_common::{Action, ParticipantId, SessionStatus};
use arena_core::adapter::{AdapterError, MockAdapter, MockStrategy, ScriptStep, ScriptedAdapter};
use arena_core::arena::{ArenaBuilder, ExecutionStatus};
use arena_core::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use arena_core::config::ArenaConfig;
use arena_core::events::ChannelEventSink;
use arena_core::execution::{ExecutionError, ExecutionOutcome, RiskLimit};
use arena_core::market::{MarketError, MarketSnapshot, MarketSnapshotProvider, ReplayProvider};
use arena_core::types::RawOutput;

// ============================================================================
// Helpers
// ============================================================================

fn test_config(max_rounds: Option<u64>) -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.participants.clear();
    config.session.round_interval = Duration::from_secs(60);
    config.session.max_rounds = max_rounds;
    config.session.starting_capital = dec!(100);
    config.session.checkpoint_every = 1;
    config.execution.slippage = dec!(0.001);
    config.execution.commission_rate = dec!(0.001);
    config.execution.min_order_size = dec!(10);
    config.risk.max_position_fraction = dec!(0.5);
    config.risk.max_cumulative_loss_fraction = dec!(0.05);
    config.dispatch.timeout = Duration::from_secs(2);
    config.dispatch.max_attempts = 3;
    config.dispatch.base_delay = Duration::from_millis(100);
    config.dispatch.max_delay = Duration::from_millis(400);
    config
}

fn replay(prices: &[Decimal]) -> Arc<ReplayProvider> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Arc::new(ReplayProvider::from_prices(
        start,
        chrono::Duration::minutes(1),
        prices,
    ))
}

fn buy(size: f64) -> ScriptStep {
    ScriptStep::json(json!({"action": "BUY", "confidence": 0.8, "position_size": size}))
}

fn sell() -> ScriptStep {
    ScriptStep::json(json!({"action": "SELL", "confidence": 0.8}))
}

fn hold() -> ScriptStep {
    ScriptStep::json(json!({"action": "HOLD", "confidence": 0.5}))
}

fn id(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

// ============================================================================
// Execution Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_buy_half_of_cash_with_slippage_and_fee() {
    let arena = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(50000)]))
        .add_participant("buyer", Arc::new(ScriptedAdapter::new("buyer").then(buy(0.5))))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    assert_eq!(summary.rounds_completed, 1);

    let entry = &summary.history[0].entries[&id("buyer")];
    let ExecutionStatus::Applied {
        outcome:
            ExecutionOutcome::Opened {
                price,
                quantity,
                fee,
                ..
            },
    } = &entry.execution
    else {
        panic!("expected an opened position, got {:?}", entry.execution);
    };
    // 50000 * 1.001
    assert_eq!(*price, dec!(50050));
    // 50 / 50050 truncated to 8 dp
    assert_eq!(*quantity, dec!(0.000999));
    assert!((*fee - dec!(0.05)).abs() < dec!(0.001));

    let ledger = &summary.participant(&id("buyer")).unwrap().ledger;
    assert_eq!(ledger.cash(), dec!(49.95005005));
    assert_eq!(ledger.position().unwrap().quantity, dec!(0.000999));
}

#[tokio::test(start_paused = true)]
async fn test_sell_without_position_rejected_round_completes() {
    let arena = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(50000)]))
        .add_participant("seller", Arc::new(ScriptedAdapter::new("seller").then(sell())))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder").then(hold())))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.rounds_completed, 1);

    let round = &summary.history[0];
    assert_eq!(
        round.entries[&id("seller")].execution,
        ExecutionStatus::Rejected {
            error: ExecutionError::NoOpenPosition
        }
    );
    assert_eq!(
        round.entries[&id("holder")].execution,
        ExecutionStatus::Applied {
            outcome: ExecutionOutcome::Held
        }
    );

    let seller = summary.participant(&id("seller")).unwrap();
    assert_eq!(seller.ledger.cash(), dec!(100));
    assert!(seller.ledger.position().is_none());
    assert_eq!(seller.stats.rejections, 1);
    assert_eq!(seller.stats.errors, 1);
    // A rejected order is not a fallback
    assert_eq!(seller.stats.fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_loss_breaker_rejects_buy_with_cash_available() {
    let trader = ScriptedAdapter::new("trader")
        .on_round(1, buy(0.5))
        .on_round(2, sell())
        .on_round(3, buy(0.5));
    let arena = ArenaBuilder::new(test_config(Some(3)))
        .with_market(replay(&[dec!(50000), dec!(40000), dec!(40000)]))
        .add_participant("trader", Arc::new(trader))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.rounds_completed, 3);

    let trader = summary.participant(&id("trader")).unwrap();
    assert!(trader.ledger.realized_pnl() < dec!(-5));
    assert!(trader.ledger.cash() > dec!(80));

    match &summary.history[2].entries[&id("trader")].execution {
        ExecutionStatus::Rejected {
            error: ExecutionError::RiskLimitExceeded(RiskLimit::LossCircuitBreaker { loss, limit }),
        } => {
            assert_eq!(*limit, dec!(5));
            assert!(loss > limit);
        }
        other => panic!("expected loss breaker rejection, got {:?}", other),
    }
    assert!(trader.ledger.position().is_none());
}

// ============================================================================
// Accounting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_accounting_holds_every_round_of_mock_session() {
    let prices = [
        dec!(50000),
        dec!(50600),
        dec!(49700),
        dec!(51200),
        dec!(50300),
        dec!(50900),
        dec!(48800),
        dec!(51500),
    ];
    let latency = Duration::from_millis(50);
    let arena = ArenaBuilder::new(test_config(Some(8)))
        .with_market(replay(&prices))
        .add_participant(
            "aggressive",
            Arc::new(MockAdapter::new("aggressive", MockStrategy::Aggressive, latency, 21)),
        )
        .add_participant(
            "random",
            Arc::new(MockAdapter::new("random", MockStrategy::Random, latency, 22)),
        )
        .add_participant(
            "trend",
            Arc::new(MockAdapter::new("trend", MockStrategy::TrendFollowing, latency, 23)),
        )
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.rounds_completed, 8);

    let capital = dec!(100);
    let mut trades = 0;
    for p in &summary.participants {
        // Replay the fills from history and check each round's row against them
        let mut cash = capital;
        let mut realized = Decimal::ZERO;
        let mut open: Option<(Decimal, Decimal)> = None;

        for round in &summary.history {
            let entry = &round.entries[&p.id];
            if let ExecutionStatus::Applied { outcome } = &entry.execution {
                match outcome {
                    ExecutionOutcome::Opened { quantity, notional, fee, .. } => {
                        assert!(open.is_none(), "{} opened twice", p.id);
                        cash -= *notional + *fee;
                        open = Some((*quantity, *fee));
                        trades += 1;
                    }
                    ExecutionOutcome::Closed { proceeds, fee, realized_pnl, .. } => {
                        assert!(open.is_some(), "{} closed while flat", p.id);
                        cash += *proceeds - *fee;
                        realized += *realized_pnl;
                        open = None;
                        trades += 1;
                    }
                    ExecutionOutcome::Held => {}
                }
            }

            let row = round.leaderboard.entry(&p.id).unwrap();
            let price = round.snapshot.price;
            let (quantity, open_fee) = open.unwrap_or((Decimal::ZERO, Decimal::ZERO));

            assert!(row.cash >= Decimal::ZERO, "round {} {}", round.round, p.id);
            assert_eq!(row.cash, cash, "round {} {}", round.round, p.id);
            assert_eq!(row.realized_pnl, realized, "round {} {}", round.round, p.id);
            assert_eq!(row.has_position, open.is_some());
            assert_eq!(row.account_value, row.cash + quantity * price);
            let expected = capital + row.realized_pnl + row.unrealized_pnl - open_fee;
            assert!(
                (row.account_value - expected).abs() < dec!(0.00000001),
                "round {} {}: {} != {}",
                round.round,
                p.id,
                row.account_value,
                expected
            );
        }

        assert_eq!(p.ledger.cash(), cash);
        assert_eq!(p.ledger.realized_pnl(), realized);
    }
    assert!(trades > 0);
}

// ============================================================================
// Mixed Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_ranked_with_fallbacks() {
    let arena = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(50000)]))
        .add_participant(
            "garbled",
            Arc::new(
                ScriptedAdapter::new("garbled")
                    .otherwise(ScriptStep::Respond(RawOutput::text("I think we should buy"))),
            ),
        )
        .add_participant(
            "sleeper",
            Arc::new(ScriptedAdapter::new("sleeper").otherwise(ScriptStep::Hang)),
        )
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder").then(hold())))
        .add_participant("buyer", Arc::new(ScriptedAdapter::new("buyer").then(buy(0.5))))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    let leaderboard = summary.leaderboard.as_ref().unwrap();
    assert_eq!(leaderboard.entries.len(), 4);

    let fallbacks: Vec<&str> = leaderboard
        .entries
        .iter()
        .filter(|e| e.fallback)
        .map(|e| e.participant.as_str())
        .collect();
    assert_eq!(fallbacks, vec!["garbled", "sleeper"]);

    // Flat returns tie-break on errors, then id; the buyer paid fees
    let ranking: Vec<&str> = leaderboard.ranking().into_iter().map(|p| p.as_str()).collect();
    assert_eq!(ranking, vec!["holder", "garbled", "sleeper", "buyer"]);

    let round = &summary.history[0];
    for failed in ["garbled", "sleeper"] {
        let entry = &round.entries[&id(failed)];
        assert_eq!(entry.decision.action, Action::Hold);
        assert!(entry.decision.is_fallback());
        assert!(entry.dispatch_error.is_some());
    }
    assert!(round.entries[&id("buyer")].dispatch_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_mark_degraded_then_recover() {
    let mut config = test_config(Some(4));
    config.dispatch.degraded_after_failures = 2;
    let flaky = ScriptedAdapter::new("flaky")
        .on_round(1, ScriptStep::Fail(AdapterError::Auth("bad key".to_string())))
        .on_round(2, ScriptStep::Fail(AdapterError::Auth("bad key".to_string())))
        .on_round(3, ScriptStep::Fail(AdapterError::Auth("bad key".to_string())))
        .otherwise(hold());
    let arena = ArenaBuilder::new(config)
        .with_market(replay(&[dec!(100), dec!(100), dec!(100), dec!(100)]))
        .add_participant("flaky", Arc::new(flaky))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    let degraded: Vec<bool> = summary
        .history
        .iter()
        .map(|r| r.leaderboard.entry(&id("flaky")).unwrap().degraded)
        .collect();
    assert_eq!(degraded, vec![false, true, true, false]);

    let stats = &summary.participant(&id("flaky")).unwrap().stats;
    assert_eq!(stats.fallbacks, 3);
    assert_eq!(stats.decisions_made, 1);
    // Auth errors are not retried
    assert_eq!(stats.total_attempts, 4);
}

// ============================================================================
// Round Deadline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_round_bounded_by_deadline_with_hung_agent() {
    let mut config = test_config(Some(1));
    config.dispatch.timeout = Duration::from_secs(30);
    config.session.round_deadline = Some(Duration::from_secs(5));

    let arena = ArenaBuilder::new(config)
        .with_market(replay(&[dec!(50000)]))
        .add_participant("hung", Arc::new(ScriptedAdapter::new("hung").otherwise(ScriptStep::Hang)))
        .add_participant("quick", Arc::new(ScriptedAdapter::new("quick").then(hold())))
        .build()
        .unwrap();

    let start = Instant::now();
    let summary = arena.run_to_completion().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6), "round took {:?}", elapsed);

    let round = &summary.history[0];
    assert!(round.entries[&id("hung")].decision.is_fallback());
    assert!(!round.entries[&id("quick")].decision.is_fallback());
}

// ============================================================================
// Session Control
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_resume_stop() {
    let arena = ArenaBuilder::new(test_config(None))
        .with_market(replay(&[dec!(100); 50]))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let handle = arena.spawn();

    // First tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.status().round, 1);
    assert_eq!(handle.status().status, SessionStatus::Running);

    handle.pause();
    tokio::time::sleep(Duration::from_secs(300)).await;
    let status = handle.status();
    assert_eq!(status.status, SessionStatus::Paused);
    assert_eq!(status.round, 1);

    handle.resume();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.status().status, SessionStatus::Running);
    assert_eq!(handle.status().round, 2);

    handle.stop();
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert_eq!(summary.rounds_completed, 2);
    assert!(summary.failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused() {
    let arena = ArenaBuilder::new(test_config(None))
        .with_market(replay(&[dec!(100); 10]))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let handle = arena.spawn();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.pause();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    // Resume after stop is ignored
    handle.resume();

    let summary = handle.join().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert_eq!(summary.rounds_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_duration_finishes_session() {
    let mut config = test_config(None);
    config.session.max_duration = Some(Duration::from_secs(150));

    let arena = ArenaBuilder::new(config)
        .with_market(replay(&[dec!(100); 10]))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    // Rounds at t=0, 60 and 120
    assert_eq!(summary.rounds_completed, 3);
}

// ============================================================================
// Terminal States
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_market_exhaustion_finishes_session() {
    let arena = ArenaBuilder::new(test_config(None))
        .with_market(replay(&[dec!(100), dec!(101)]))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Finished);
    assert_eq!(summary.rounds_completed, 2);
    assert_eq!(summary.leaderboard.unwrap().price, dec!(101));
}

struct BrokenFeed;

#[async_trait]
impl MarketSnapshotProvider for BrokenFeed {
    async fn snapshot(&self, _symbol: &str) -> Result<MarketSnapshot, MarketError> {
        Err(MarketError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeated_snapshot_failures_fail_session() {
    let arena = ArenaBuilder::new(test_config(Some(10)))
        .with_market(Arc::new(BrokenFeed))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Failed);
    assert_eq!(summary.rounds_completed, 0);
    assert!(summary.failure.unwrap().contains("3 consecutive"));
}

struct FullDisk;

#[async_trait]
impl CheckpointStore for FullDisk {
    async fn save(
        &self,
        _session_id: Uuid,
        _round: u64,
        _checkpoint: &Checkpoint,
    ) -> Result<String, CheckpointError> {
        Err(CheckpointError::Unavailable("disk full".to_string()))
    }

    async fn load_latest(&self, _session_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_failure_fails_session() {
    let (events, mut rx) = ChannelEventSink::new(256);
    let arena = ArenaBuilder::new(test_config(Some(5)))
        .with_market(replay(&[dec!(100); 5]))
        .with_store(Arc::new(FullDisk))
        .with_events(Arc::new(events))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    let summary = arena.run_to_completion().await.unwrap();
    assert_eq!(summary.status, SessionStatus::Failed);
    assert_eq!(summary.rounds_completed, 1);
    assert!(summary.failure.unwrap().contains("disk full"));

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    match last {
        Some(arena_core::events::ArenaEvent::SessionEnded { status, rounds, failure, .. }) => {
            assert_eq!(status, SessionStatus::Failed);
            assert_eq!(rounds, 1);
            assert!(failure.is_some());
        }
        other => panic!("expected session_ended last, got {:?}", other),
    }
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_event_order_for_single_round() {
    let (events, mut rx) = ChannelEventSink::new(256);
    let arena = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(100)]))
        .with_events(Arc::new(events))
        .add_participant("holder", Arc::new(ScriptedAdapter::new("holder")))
        .build()
        .unwrap();

    arena.run_to_completion().await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            "session_started",
            "status_changed",
            "round_started",
            "decision_made",
            "execution_applied",
            "round_completed",
            "checkpoint_written",
            "status_changed",
            "checkpoint_written",
            "status_changed",
            "session_ended",
        ]
    );
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_rejects_duplicate_ids() {
    let result = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(100)]))
        .add_participant("a", Arc::new(ScriptedAdapter::new("a")))
        .add_participant("a", Arc::new(ScriptedAdapter::new("a")))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_builder_requires_market_and_participants() {
    let no_market = ArenaBuilder::new(test_config(Some(1)))
        .add_participant("a", Arc::new(ScriptedAdapter::new("a")))
        .build();
    assert!(no_market.is_err());

    let no_participants = ArenaBuilder::new(test_config(Some(1)))
        .with_market(replay(&[dec!(100)]))
        .build();
    assert!(no_participants.is_err());
}

#[test]
fn test_configured_participants_registered_in_id_order() {
    let config = ArenaConfig::default();
    let arena = ArenaBuilder::new(config)
        .with_market(replay(&[dec!(100)]))
        .with_configured_participants()
        .unwrap()
        .build()
        .unwrap();

    let ids: Vec<&str> = arena.participant_ids().into_iter().map(|p| p.as_str()).collect();
    assert_eq!(
        ids,
        vec!["mock-aggressive", "mock-conservative", "mock-random", "mock-trend"]
    );
    assert_eq!(arena.status(), SessionStatus::Init);
    assert_eq!(arena.round(), 0);
}
