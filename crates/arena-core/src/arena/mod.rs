//! Round scheduler.
//!
//! The arena owns the session: participants, their ledgers and stats, the
//! round history and every collaborator. It advances one round per tick:
//!
//! 1. request a market snapshot
//! 2. build one context per participant from that snapshot
//! 3. dispatch to every adapter concurrently, bounded by the round deadline
//! 4. execute each decision (or fallback HOLD) serially against its ledger
//! 5. rank the leaderboard and append the round to history
//! 6. emit events and checkpoint every K rounds
//!
//! ## State machine
//!
//! ```text
//! INIT ──► RUNNING ◄──► PAUSED
//!             │            │
//!             ▼            ▼
//!          STOPPING ──► STOPPED | FINISHED | FAILED
//! ```
//!
//! Pause and stop requests are only observed between rounds, so a round's
//! accounting is never split.

pub mod handle;
pub mod session;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use arena_common::{ParticipantId, SessionStatus};

use crate::adapter::{self, AgentAdapter, AgentContext};
use crate::checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, CheckpointError, CheckpointStore, MemoryCheckpointStore,
    ParticipantSnapshot, SessionSnapshot,
};
use crate::config::ArenaConfig;
use crate::dispatch::{DispatchError, DispatchResult, DispatchTarget, Dispatcher, RetryPolicy, TokenBucket};
use crate::events::{ArenaEvent, EventSink, NoopEventSink};
use crate::execution::{ExecutionEngine, PriceTick};
use crate::export::ResultsExporter;
use crate::leaderboard::{Leaderboard, Standing};
use crate::market::{ContextBuilder, JsonContextBuilder, MarketError, MarketSnapshotProvider};
use crate::portfolio::{CallSample, ParticipantStats, PortfolioLedger};
use crate::types::Decision;
use crate::validator::DecisionValidator;

pub use handle::{ArenaController, ArenaHandle};
pub use session::{
    ExecutionStatus, ParticipantSummary, RoundEntry, RoundRecord, SessionSummary, StatusReport,
};

use handle::Control;

/// Unrecoverable scheduler error. The session ends FAILED.
#[derive(Debug, Error)]
pub enum SchedulerFailure {
    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Market data unavailable after {failures} consecutive attempts: {last}")]
    MarketData { failures: u32, last: MarketError },

    #[error("Scheduler task failed: {0}")]
    Task(String),
}

/// One competing agent and its private account.
struct Participant {
    id: ParticipantId,
    adapter: Arc<dyn AgentAdapter>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    ledger: PortfolioLedger,
    stats: ParticipantStats,
}

/// How a single tick ended.
enum RoundOutcome {
    Completed,
    /// Snapshot failed but the failure budget is not exhausted.
    Skipped,
    /// Replay data ran out.
    MarketExhausted,
}

/// Execution and risk parameters recorded with every checkpoint.
fn config_fingerprint(config: &ArenaConfig) -> String {
    format!(
        "capital={};slippage={};commission={};min_order={};max_fraction={};max_loss={};scope={}",
        config.session.starting_capital,
        config.execution.slippage,
        config.execution.commission_rate,
        config.execution.min_order_size,
        config.risk.max_position_fraction,
        config.risk.max_cumulative_loss_fraction,
        config.risk.breaker_scope,
    )
}

// =============================================================================
// Builder
// =============================================================================

struct Registration {
    id: ParticipantId,
    adapter: Arc<dyn AgentAdapter>,
    timeout: Option<Duration>,
    calls_per_minute: Option<u32>,
}

/// Wires collaborators and participants into an [`Arena`].
pub struct ArenaBuilder {
    config: ArenaConfig,
    session_id: Option<Uuid>,
    market: Option<Arc<dyn MarketSnapshotProvider>>,
    context_builder: Arc<dyn ContextBuilder>,
    store: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
    exporter: Option<ResultsExporter>,
    registrations: Vec<Registration>,
}

impl ArenaBuilder {
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            session_id: None,
            market: None,
            context_builder: Arc::new(JsonContextBuilder),
            store: Arc::new(MemoryCheckpointStore::new()),
            events: Arc::new(NoopEventSink),
            exporter: None,
            registrations: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_market(mut self, market: Arc<dyn MarketSnapshotProvider>) -> Self {
        self.market = Some(market);
        self
    }

    pub fn with_context_builder(mut self, builder: Arc<dyn ContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_exporter(mut self, exporter: ResultsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Register a participant using the dispatch defaults.
    pub fn add_participant(
        mut self,
        id: impl Into<ParticipantId>,
        adapter: Arc<dyn AgentAdapter>,
    ) -> Self {
        self.registrations.push(Registration {
            id: id.into(),
            adapter,
            timeout: None,
            calls_per_minute: None,
        });
        self
    }

    /// Register every participant listed in the configuration.
    pub fn with_configured_participants(mut self) -> Result<Self> {
        for participant in &self.config.participants {
            let adapter = adapter::from_config(participant)
                .with_context(|| format!("Failed to build adapter for {}", participant.id))?;
            self.registrations.push(Registration {
                id: ParticipantId::from(participant.id.as_str()),
                adapter,
                timeout: participant.timeout,
                calls_per_minute: participant.calls_per_minute,
            });
        }
        Ok(self)
    }

    /// Create a fresh session.
    pub fn build(self) -> Result<Arena> {
        let Some(market) = self.market.clone() else {
            bail!("a market snapshot provider is required");
        };
        ensure!(!self.registrations.is_empty(), "at least one participant is required");

        let mut seen = HashSet::new();
        for registration in &self.registrations {
            if !seen.insert(registration.id.clone()) {
                bail!("duplicate participant id: {}", registration.id);
            }
        }

        let config = self.config;
        let dispatch = &config.dispatch;
        let mut participants: Vec<Participant> = self
            .registrations
            .into_iter()
            .map(|r| Participant {
                id: r.id,
                adapter: r.adapter,
                limiter: Arc::new(TokenBucket::per_minute(
                    r.calls_per_minute.unwrap_or(dispatch.calls_per_minute),
                )),
                timeout: r.timeout.unwrap_or(dispatch.timeout),
                ledger: PortfolioLedger::new(config.session.starting_capital),
                stats: ParticipantStats::new(),
            })
            .collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));

        let session_id = self.session_id.unwrap_or_else(Uuid::new_v4);
        let dispatcher = Dispatcher::new(RetryPolicy::from_config(dispatch), DecisionValidator::new());
        let engine = ExecutionEngine::new(config.execution.clone());

        Ok(Arena {
            session_id,
            started_at: Utc::now(),
            round: 0,
            resumed_at_round: 0,
            status: SessionStatus::Init,
            active_before: Duration::ZERO,
            run_started: None,
            paused_since: None,
            paused_total: Duration::ZERO,
            snapshot_failures: 0,
            last_price: None,
            participants,
            history: Vec::new(),
            market,
            context_builder: self.context_builder,
            store: self.store,
            events: self.events,
            exporter: self.exporter,
            dispatcher,
            engine,
            report: Arc::new(RwLock::new(StatusReport::new(session_id, 0))),
            failure: None,
            config,
        })
    }

    /// Rebuild a session from its latest checkpoint.
    ///
    /// The registered participants must match the checkpointed ones exactly.
    /// The market provider is positioned past the rounds already played.
    pub async fn resume_from(self, session_id: Uuid) -> Result<Arena> {
        let store = Arc::clone(&self.store);
        let mut arena = self.with_session_id(session_id).build()?;

        let checkpoint = store
            .load_latest(session_id)
            .await
            .with_context(|| format!("Failed to load checkpoint for session {session_id}"))?
            .with_context(|| format!("No checkpoint found for session {session_id}"))?;

        arena.restore(checkpoint)?;
        arena
            .market
            .seek(arena.round)
            .await
            .context("Failed to position market data for resume")?;

        info!(
            session_id = %session_id,
            round = arena.round,
            participants = arena.participants.len(),
            "Session restored from checkpoint"
        );
        Ok(arena)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// A competition session.
pub struct Arena {
    session_id: Uuid,
    config: ArenaConfig,
    started_at: DateTime<Utc>,
    /// Rounds completed.
    round: u64,
    resumed_at_round: u64,
    status: SessionStatus,
    /// Running time carried over from a checkpoint.
    active_before: Duration,
    run_started: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    snapshot_failures: u32,
    last_price: Option<Decimal>,
    /// Sorted by id.
    participants: Vec<Participant>,
    history: Vec<RoundRecord>,
    market: Arc<dyn MarketSnapshotProvider>,
    context_builder: Arc<dyn ContextBuilder>,
    store: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
    exporter: Option<ResultsExporter>,
    dispatcher: Dispatcher,
    engine: ExecutionEngine,
    report: Arc<RwLock<StatusReport>>,
    failure: Option<SchedulerFailure>,
}

impl Arena {
    pub fn builder(config: ArenaConfig) -> ArenaBuilder {
        ArenaBuilder::new(config)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Rounds completed.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn participant_ids(&self) -> Vec<&ParticipantId> {
        self.participants.iter().map(|p| &p.id).collect()
    }

    pub fn ledger(&self, id: &ParticipantId) -> Option<&PortfolioLedger> {
        self.participant(id).map(|p| &p.ledger)
    }

    pub fn stats(&self, id: &ParticipantId) -> Option<&ParticipantStats> {
        self.participant(id).map(|p| &p.stats)
    }

    fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Leaderboard at the last traded price, recomputed from the ledgers.
    pub fn leaderboard(&self) -> Option<Leaderboard> {
        let price = self.last_price?;
        let last_entries = self.history.last().map(|r| &r.entries);
        Some(Leaderboard::compute(
            self.round,
            price,
            self.participants.iter().map(|p| Standing {
                participant: &p.id,
                ledger: &p.ledger,
                stats: &p.stats,
                fallback: last_entries
                    .and_then(|e| e.get(&p.id))
                    .is_some_and(|e| e.decision.is_fallback()),
            }),
        ))
    }

    /// Consistent snapshot of the session at the current round boundary.
    pub fn checkpoint(&self, status: SessionStatus) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            session: SessionSnapshot {
                id: self.session_id,
                symbol: self.config.session.symbol.clone(),
                round_interval_ms: self.config.session.round_interval.as_millis() as u64,
                started_at: self.started_at,
                round: self.round,
                status,
                active_ms: self.active_elapsed().as_millis() as u64,
            },
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantSnapshot {
                    id: p.id.clone(),
                    ledger: p.ledger.clone(),
                    stats: p.stats.clone(),
                })
                .collect(),
            history: self.history.clone(),
            config_fingerprint: config_fingerprint(&self.config),
            saved_at: Utc::now(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        ensure!(
            checkpoint.session.symbol == self.config.session.symbol,
            "checkpoint symbol {} does not match configured symbol {}",
            checkpoint.session.symbol,
            self.config.session.symbol
        );

        let registered: HashSet<&ParticipantId> = self.participants.iter().map(|p| &p.id).collect();
        let saved: HashSet<&ParticipantId> = checkpoint.participants.iter().map(|p| &p.id).collect();
        if registered != saved {
            bail!(
                "participants differ from checkpoint: registered {:?}, checkpoint {:?}",
                registered,
                saved
            );
        }

        let fingerprint = config_fingerprint(&self.config);
        if checkpoint.config_fingerprint != fingerprint {
            warn!(
                checkpoint = %checkpoint.config_fingerprint,
                current = %fingerprint,
                "Execution parameters changed since checkpoint"
            );
        }

        for snapshot in checkpoint.participants {
            if let Some(p) = self.participants.iter_mut().find(|p| p.id == snapshot.id) {
                p.ledger = snapshot.ledger;
                p.stats = snapshot.stats;
            }
        }

        self.started_at = checkpoint.session.started_at;
        self.round = checkpoint.session.round;
        self.resumed_at_round = checkpoint.session.round;
        self.active_before = Duration::from_millis(checkpoint.session.active_ms);
        self.history = checkpoint.history;
        self.last_price = self.history.last().map(|r| r.snapshot.price);

        let leaderboard = self.leaderboard();
        let mut report = self.report.write();
        report.round = self.round;
        report.leaderboard = leaderboard;
        Ok(())
    }

    /// Start the session on the current runtime.
    pub fn spawn(self) -> ArenaHandle {
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let controller =
            ArenaController::new(self.session_id, control_tx, Arc::clone(&self.report));
        let task = tokio::spawn(self.run(control_rx));
        ArenaHandle::new(controller, task)
    }

    /// Run until a terminal state without external control.
    pub async fn run_to_completion(self) -> Result<SessionSummary, SchedulerFailure> {
        self.spawn().join().await
    }

    async fn run(mut self, mut control: watch::Receiver<Control>) -> SessionSummary {
        self.run_started = Some(Instant::now());
        self.events.emit(ArenaEvent::SessionStarted {
            session_id: self.session_id,
            symbol: self.config.session.symbol.clone(),
            participants: self.participants.iter().map(|p| p.id.clone()).collect(),
            resumed_at_round: self.resumed_at_round,
        });
        info!(
            session_id = %self.session_id,
            symbol = %self.config.session.symbol,
            participants = self.participants.len(),
            interval_secs = self.config.session.round_interval.as_secs(),
            resumed_at_round = self.resumed_at_round,
            "Arena session starting"
        );
        self.transition(SessionStatus::Running);

        let mut ticker = tokio::time::interval(self.config.session.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            if self.limit_reached() {
                break SessionStatus::Finished;
            }
            if !self.wait_for_turn(&mut ticker, &mut control).await {
                break SessionStatus::Stopped;
            }
            if self.limit_reached() {
                break SessionStatus::Finished;
            }

            match self.run_round().await {
                Ok(RoundOutcome::Completed) | Ok(RoundOutcome::Skipped) => {}
                Ok(RoundOutcome::MarketExhausted) => {
                    info!(round = self.round, "Market data exhausted");
                    break SessionStatus::Finished;
                }
                Err(failure) => {
                    error!(round = self.round, error = %failure, "Scheduler failure");
                    self.failure = Some(failure);
                    break SessionStatus::Failed;
                }
            }

            if *control.borrow() == Control::Stop {
                break SessionStatus::Stopped;
            }
        };

        self.finish(end).await
    }

    /// Block until the next round may start. Returns false on stop.
    async fn wait_for_turn(
        &mut self,
        ticker: &mut Interval,
        control: &mut watch::Receiver<Control>,
    ) -> bool {
        let mut control_open = true;
        loop {
            let requested = *control.borrow_and_update();
            match requested {
                Control::Stop => return false,
                Control::Pause if control_open => {
                    self.enter_pause();
                    if control.changed().await.is_err() {
                        control_open = false;
                    }
                }
                Control::Pause | Control::Run => {
                    self.leave_pause();
                    if !control_open {
                        ticker.tick().await;
                        return true;
                    }
                    tokio::select! {
                        _ = ticker.tick() => return true,
                        changed = control.changed() => {
                            if changed.is_err() {
                                control_open = false;
                            }
                        }
                    }
                }
            }
        }
    }

    fn enter_pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
        self.transition(SessionStatus::Paused);
    }

    fn leave_pause(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
        self.transition(SessionStatus::Running);
    }

    /// Running time across all runs of this session, pauses excluded.
    fn active_elapsed(&self) -> Duration {
        let Some(started) = self.run_started else {
            return self.active_before;
        };
        let paused = self.paused_total + self.paused_since.map(|s| s.elapsed()).unwrap_or_default();
        self.active_before + started.elapsed().saturating_sub(paused)
    }

    fn limit_reached(&self) -> bool {
        if let Some(max_rounds) = self.config.session.max_rounds
            && self.round >= max_rounds
        {
            return true;
        }
        if let Some(max_duration) = self.config.session.max_duration
            && self.active_elapsed() >= max_duration
        {
            return true;
        }
        false
    }

    async fn run_round(&mut self) -> Result<RoundOutcome, SchedulerFailure> {
        let round = self.round + 1;
        let symbol = self.config.session.symbol.clone();

        let snapshot = match self.market.snapshot(&symbol).await {
            Ok(snapshot) if snapshot.price > Decimal::ZERO => snapshot,
            Ok(snapshot) => {
                return self.snapshot_failed(
                    round,
                    MarketError::Unavailable(format!("non-positive price {}", snapshot.price)),
                );
            }
            Err(MarketError::Exhausted) => return Ok(RoundOutcome::MarketExhausted),
            Err(e) => return self.snapshot_failed(round, e),
        };
        self.snapshot_failures = 0;

        let tick = PriceTick {
            round,
            price: snapshot.price,
            timestamp: snapshot.timestamp,
        };
        self.events.emit(ArenaEvent::RoundStarted {
            round,
            price: tick.price,
            timestamp: tick.timestamp,
        });

        let targets: Vec<DispatchTarget> = self
            .participants
            .iter()
            .map(|p| {
                let account = p.ledger.account_state(tick.price);
                let payload = self.context_builder.build(&snapshot, &account, round);
                DispatchTarget {
                    participant: p.id.clone(),
                    adapter: Arc::clone(&p.adapter),
                    limiter: Arc::clone(&p.limiter),
                    timeout: p.timeout,
                    context: AgentContext {
                        session_id: self.session_id,
                        round,
                        participant: p.id.clone(),
                        payload,
                    },
                    account,
                }
            })
            .collect();

        let slowest = self
            .participants
            .iter()
            .map(|p| p.timeout)
            .max()
            .unwrap_or(self.config.dispatch.timeout);
        let deadline = self
            .config
            .session
            .effective_deadline(self.dispatcher.retry_policy(), slowest);
        let mut results = self.dispatcher.dispatch(targets, deadline).await;

        let degraded_after = self.config.dispatch.degraded_after_failures;
        let mut entries = BTreeMap::new();
        for p in &mut self.participants {
            let result = results.remove(&p.id).unwrap_or_else(|| DispatchResult {
                outcome: Err(DispatchError::TaskFailed("no dispatch result".to_string())),
                sample: CallSample::default(),
            });
            p.stats.record_call(&result.sample);

            let (decision, dispatch_error) = match result.outcome {
                Ok(decision) => {
                    p.stats.record_decision();
                    self.events.emit(ArenaEvent::DecisionMade {
                        round,
                        participant: p.id.clone(),
                        decision: decision.clone(),
                        sample: result.sample,
                    });
                    (decision, None)
                }
                Err(err) => {
                    let reason = err.to_string();
                    p.stats.record_failure(&reason, degraded_after);
                    self.events.emit(ArenaEvent::ParticipantError {
                        round,
                        participant: p.id.clone(),
                        error: reason.clone(),
                        degraded: p.stats.degraded,
                    });
                    (Decision::fallback(reason.as_str()), Some(reason))
                }
            };

            let execution =
                match self
                    .engine
                    .apply(&mut p.ledger, &decision, &tick, &self.config.risk)
                {
                    Ok(outcome) => {
                        if outcome.is_trade() {
                            p.stats.record_trade();
                        }
                        self.events.emit(ArenaEvent::ExecutionApplied {
                            round,
                            participant: p.id.clone(),
                            outcome: outcome.clone(),
                        });
                        ExecutionStatus::Applied { outcome }
                    }
                    Err(error) => {
                        p.stats.record_rejection(&error.to_string());
                        self.events.emit(ArenaEvent::ExecutionRejected {
                            round,
                            participant: p.id.clone(),
                            error: error.clone(),
                        });
                        ExecutionStatus::Rejected { error }
                    }
                };

            entries.insert(
                p.id.clone(),
                RoundEntry {
                    decision,
                    dispatch_error,
                    execution,
                    sample: result.sample,
                },
            );
        }

        let leaderboard = Leaderboard::compute(
            round,
            tick.price,
            self.participants.iter().map(|p| Standing {
                participant: &p.id,
                ledger: &p.ledger,
                stats: &p.stats,
                fallback: entries.get(&p.id).is_some_and(|e| e.decision.is_fallback()),
            }),
        );

        self.round = round;
        self.last_price = Some(tick.price);
        self.history.push(RoundRecord {
            round,
            timestamp: tick.timestamp,
            snapshot,
            entries,
            leaderboard: leaderboard.clone(),
        });
        {
            let mut report = self.report.write();
            report.round = round;
            report.leaderboard = Some(leaderboard.clone());
        }
        self.events.emit(ArenaEvent::RoundCompleted { leaderboard });

        if round % self.config.session.checkpoint_every.max(1) == 0 {
            self.write_checkpoint(self.status).await?;
        }
        Ok(RoundOutcome::Completed)
    }

    fn snapshot_failed(
        &mut self,
        round: u64,
        error: MarketError,
    ) -> Result<RoundOutcome, SchedulerFailure> {
        self.snapshot_failures += 1;
        warn!(
            round,
            failures = self.snapshot_failures,
            max = self.config.session.max_snapshot_failures,
            error = %error,
            "Market snapshot failed, skipping round"
        );
        if self.snapshot_failures >= self.config.session.max_snapshot_failures {
            return Err(SchedulerFailure::MarketData {
                failures: self.snapshot_failures,
                last: error,
            });
        }
        Ok(RoundOutcome::Skipped)
    }

    async fn write_checkpoint(&self, status: SessionStatus) -> Result<(), CheckpointError> {
        let checkpoint = self.checkpoint(status);
        let location = self
            .store
            .save(self.session_id, self.round, &checkpoint)
            .await?;
        self.events.emit(ArenaEvent::CheckpointWritten {
            round: self.round,
            location,
        });
        Ok(())
    }

    fn transition(&mut self, to: SessionStatus) {
        let from = self.status;
        if from == to {
            return;
        }
        self.status = to;
        self.report.write().status = to;
        debug!(session_id = %self.session_id, from = %from, to = %to, "Session status changed");
        self.events.emit(ArenaEvent::StatusChanged { from, to });
    }

    async fn finish(mut self, end: SessionStatus) -> SessionSummary {
        self.leave_pause_accounting();
        self.transition(SessionStatus::Stopping);

        let mut end = end;
        if let Err(e) = self.write_checkpoint(end).await {
            if end == SessionStatus::Failed {
                warn!(error = %e, "Best-effort final checkpoint failed");
            } else {
                error!(error = %e, "Final checkpoint failed");
                self.failure = Some(SchedulerFailure::Checkpoint(e));
                end = SessionStatus::Failed;
            }
        }

        let summary = self.summary(end);
        if let Some(exporter) = &self.exporter
            && let Err(e) = exporter.export(&summary).await
        {
            error!(error = %e, "Results export failed");
        }

        let failure = summary.failure.clone();
        self.report.write().failure = failure.clone();
        self.transition(end);
        self.events.emit(ArenaEvent::SessionEnded {
            session_id: self.session_id,
            status: end,
            rounds: self.round,
            failure,
        });
        summary
    }

    fn leave_pause_accounting(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    fn summary(&self, status: SessionStatus) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            symbol: self.config.session.symbol.clone(),
            status,
            rounds_completed: self.round,
            started_at: self.started_at,
            ended_at: Utc::now(),
            failure: self.failure.as_ref().map(ToString::to_string),
            leaderboard: self.leaderboard(),
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantSummary {
                    id: p.id.clone(),
                    ledger: p.ledger.clone(),
                    stats: p.stats.clone(),
                })
                .collect(),
            history: self.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ScriptedAdapter;
    use crate::market::ReplayProvider;
    use rust_decimal_macros::dec;

    fn arena() -> Arena {
        let mut config = ArenaConfig::default();
        config.participants.clear();
        let start = Utc::now();
        ArenaBuilder::new(config)
            .with_market(Arc::new(ReplayProvider::from_prices(
                start,
                chrono::Duration::minutes(3),
                &[dec!(100)],
            )))
            .add_participant("b", Arc::new(ScriptedAdapter::new("b")))
            .add_participant("a", Arc::new(ScriptedAdapter::new("a")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fingerprint_tracks_execution_parameters() {
        let config = ArenaConfig::default();
        let mut changed = config.clone();
        changed.execution.slippage = dec!(0.002);

        assert_eq!(config_fingerprint(&config), config_fingerprint(&config.clone()));
        assert_ne!(config_fingerprint(&config), config_fingerprint(&changed));
        assert!(config_fingerprint(&config).contains("scope=session"));
    }

    #[test]
    fn test_fresh_checkpoint_contents() {
        let arena = arena();
        let checkpoint = arena.checkpoint(SessionStatus::Init);

        assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
        assert_eq!(checkpoint.session.id, arena.session_id());
        assert_eq!(checkpoint.session.round, 0);
        assert_eq!(checkpoint.session.round_interval_ms, 180_000);
        assert!(checkpoint.history.is_empty());

        let ids: Vec<&str> = checkpoint.participants.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(checkpoint.participants[0].ledger.cash(), dec!(100));
    }

    #[test]
    fn test_leaderboard_absent_before_first_round() {
        let arena = arena();
        assert!(arena.leaderboard().is_none());
        assert_eq!(arena.status(), SessionStatus::Init);
        assert!(arena.ledger(&ParticipantId::from("a")).is_some());
        assert!(arena.stats(&ParticipantId::from("missing")).is_none());
    }
}
