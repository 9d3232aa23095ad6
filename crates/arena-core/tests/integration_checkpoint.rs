//! Integration tests for checkpointing, resume and results export.
//!
//! A session interrupted after K rounds and resumed from its checkpoint
//! must end with the same ledgers and rankings as one that ran straight
//! through.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use arena_common::{ParticipantId, SessionStatus};
use arena_core::adapter::{MockAdapter, MockStrategy, ScriptedAdapter};
use arena_core::arena::{ArenaBuilder, SessionSummary};
use arena_core::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use arena_core::config::ArenaConfig;
use arena_core::export::ResultsExporter;
use arena_core::market::ReplayProvider;

const PRICES: [Decimal; 8] = [
    dec!(50000),
    dec!(50600),
    dec!(49700),
    dec!(51200),
    dec!(50300),
    dec!(50900),
    dec!(48800),
    dec!(51500),
];

fn test_config(max_rounds: u64) -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.participants.clear();
    config.session.round_interval = Duration::from_secs(60);
    config.session.max_rounds = Some(max_rounds);
    config.session.starting_capital = dec!(1000);
    config.risk.max_position_fraction = dec!(0.8);
    config.dispatch.timeout = Duration::from_secs(2);
    config
}

fn replay() -> Arc<ReplayProvider> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    Arc::new(ReplayProvider::from_prices(
        start,
        chrono::Duration::minutes(1),
        &PRICES,
    ))
}

fn with_mocks(builder: ArenaBuilder) -> ArenaBuilder {
    let latency = Duration::from_millis(50);
    builder
        .add_participant(
            "aggressive",
            Arc::new(MockAdapter::new("aggressive", MockStrategy::Aggressive, latency, 11)),
        )
        .add_participant(
            "random",
            Arc::new(MockAdapter::new("random", MockStrategy::Random, latency, 12)),
        )
        .add_participant(
            "trend",
            Arc::new(MockAdapter::new("trend", MockStrategy::TrendFollowing, latency, 13)),
        )
}

fn assert_same_outcome(a: &SessionSummary, b: &SessionSummary) {
    assert_eq!(a.rounds_completed, b.rounds_completed);
    assert_eq!(a.history.len(), b.history.len());

    for (ra, rb) in a.history.iter().zip(&b.history) {
        assert_eq!(ra.round, rb.round);
        assert_eq!(ra.snapshot.price, rb.snapshot.price);
        for (id, ea) in &ra.entries {
            let eb = &rb.entries[id];
            assert_eq!(ea.decision, eb.decision, "round {} {}", ra.round, id);
            assert_eq!(ea.execution, eb.execution, "round {} {}", ra.round, id);
        }
        assert_eq!(ra.leaderboard.ranking(), rb.leaderboard.ranking());
    }

    for pa in &a.participants {
        let pb = b.participant(&pa.id).unwrap();
        assert_eq!(pa.ledger, pb.ledger, "ledger of {}", pa.id);
        assert_eq!(pa.stats.decisions_made, pb.stats.decisions_made);
        assert_eq!(pa.stats.trades_executed, pb.stats.trades_executed);
        assert_eq!(pa.stats.errors, pb.stats.errors);
    }

    let la = a.leaderboard.as_ref().unwrap();
    let lb = b.leaderboard.as_ref().unwrap();
    assert_eq!(la.ranking(), lb.ranking());
    for (ea, eb) in la.entries.iter().zip(&lb.entries) {
        assert_eq!(ea.account_value, eb.account_value);
        assert_eq!(ea.return_pct, eb.return_pct);
    }
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resume_matches_uninterrupted_run() {
    let straight = with_mocks(ArenaBuilder::new(test_config(8)))
        .with_market(replay())
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();
    assert_eq!(straight.status, SessionStatus::Finished);
    assert_eq!(straight.rounds_completed, 8);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path(), 0));
    let session_id = Uuid::new_v4();

    let first = with_mocks(ArenaBuilder::new(test_config(3)))
        .with_session_id(session_id)
        .with_market(replay())
        .with_store(store.clone())
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();
    assert_eq!(first.rounds_completed, 3);
    assert_eq!(store.list_rounds(session_id).await.unwrap(), vec![1, 2, 3]);

    let resumed = with_mocks(ArenaBuilder::new(test_config(8)))
        .with_market(replay())
        .with_store(store.clone())
        .resume_from(session_id)
        .await
        .unwrap();
    assert_eq!(resumed.session_id(), session_id);
    assert_eq!(resumed.round(), 3);
    assert_eq!(resumed.history().len(), 3);

    let resumed = resumed.run_to_completion().await.unwrap();
    assert_eq!(resumed.session_id, session_id);
    assert_eq!(resumed.started_at, first.started_at);
    assert_same_outcome(&straight, &resumed);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_every_k_rounds() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let session_id = Uuid::new_v4();
    let mut config = test_config(7);
    config.session.checkpoint_every = 3;

    with_mocks(ArenaBuilder::new(config))
        .with_session_id(session_id)
        .with_market(replay())
        .with_store(store.clone())
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();

    // Rounds 3 and 6, plus the final checkpoint at round 7
    assert_eq!(store.rounds(session_id), vec![3, 6, 7]);

    let periodic = store.get(session_id, 3).unwrap();
    assert_eq!(periodic.session.round, 3);
    assert_eq!(periodic.session.status, SessionStatus::Running);
    assert_eq!(periodic.history.len(), 3);
    assert_eq!(periodic.participants.len(), 3);

    let last = store.load_latest(session_id).await.unwrap().unwrap();
    assert_eq!(last.session.round, 7);
    assert_eq!(last.session.status, SessionStatus::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_resume_rejects_different_participants() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let session_id = Uuid::new_v4();

    with_mocks(ArenaBuilder::new(test_config(2)))
        .with_session_id(session_id)
        .with_market(replay())
        .with_store(store.clone())
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();

    let result = ArenaBuilder::new(test_config(4))
        .with_market(replay())
        .with_store(store.clone())
        .add_participant("newcomer", Arc::new(ScriptedAdapter::new("newcomer")))
        .resume_from(session_id)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_resume_without_checkpoint_fails() {
    let result = with_mocks(ArenaBuilder::new(test_config(4)))
        .with_market(replay())
        .resume_from(Uuid::new_v4())
        .await;
    let err = result.err().unwrap();
    assert!(err.to_string().contains("No checkpoint"));
}

#[tokio::test(start_paused = true)]
async fn test_resume_rejects_symbol_change() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let session_id = Uuid::new_v4();

    with_mocks(ArenaBuilder::new(test_config(1)))
        .with_session_id(session_id)
        .with_market(replay())
        .with_store(store.clone())
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();

    let mut config = test_config(4);
    config.session.symbol = "ETHUSDT".to_string();
    let result = with_mocks(ArenaBuilder::new(config))
        .with_market(replay())
        .with_store(store.clone())
        .resume_from(session_id)
        .await;
    assert!(result.is_err());
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_results_exported_on_finish() {
    let dir = tempfile::tempdir().unwrap();
    let session_id = Uuid::new_v4();

    let summary = with_mocks(ArenaBuilder::new(test_config(4)))
        .with_session_id(session_id)
        .with_market(replay())
        .with_exporter(ResultsExporter::new(dir.path()))
        .build()
        .unwrap()
        .run_to_completion()
        .await
        .unwrap();

    let json_path = dir.path().join(format!("{}.json", session_id));
    let csv_path = dir.path().join(format!("{}_leaderboard.csv", session_id));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["session_id"], session_id.to_string());
    assert_eq!(json["status"], serde_json::to_value(SessionStatus::Finished).unwrap());
    assert_eq!(json["rounds_completed"], 4);
    assert_eq!(json["history"].as_array().unwrap().len(), 4);

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "rank");
    assert_eq!(&headers[1], "participant");
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);

    let expected: Vec<String> = summary
        .leaderboard
        .unwrap()
        .entries
        .iter()
        .map(|e| e.participant.to_string())
        .collect();
    let exported: Vec<String> = rows.iter().map(|r| r[1].to_string()).collect();
    assert_eq!(exported, expected);
    assert_eq!(&rows[0][0], "1");
}

#[tokio::test(start_paused = true)]
async fn test_status_report_tracks_rounds() {
    let arena = with_mocks(ArenaBuilder::new(test_config(2)))
        .with_market(replay())
        .build()
        .unwrap();
    let handle = arena.spawn();
    let controller = handle.controller();

    let summary = handle.join().await.unwrap();
    let report = controller.status();
    assert_eq!(report.status, SessionStatus::Finished);
    assert_eq!(report.round, 2);
    assert_eq!(report.leaderboard, summary.leaderboard);
    assert!(summary.participant(&ParticipantId::from("trend")).is_some());
}
