//! Session events.
//!
//! The arena reports every lifecycle edge through an [`EventSink`]. Emitting
//! is synchronous and must never block the round loop, so sinks either do
//! their work inline (logging) or hand off with `try_send` and drop on
//! backpressure.
//!
//! ```text
//! [Arena] ──emit()──► [FanoutSink] ──► [LogEventSink]
//!                                  └─► [ChannelEventSink] ──try_send──► consumer
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use arena_common::{ParticipantId, SessionStatus};

use crate::execution::{ExecutionError, ExecutionOutcome};
use crate::leaderboard::Leaderboard;
use crate::portfolio::CallSample;
use crate::types::Decision;

/// Default buffer for [`ChannelEventSink`].
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Log every Nth dropped event.
const DROP_LOG_EVERY: u64 = 100;

/// Something that happened during a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaEvent {
    SessionStarted {
        session_id: Uuid,
        symbol: String,
        participants: Vec<ParticipantId>,
        /// Round counter restored from a checkpoint (0 for a fresh session).
        resumed_at_round: u64,
    },
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    RoundStarted {
        round: u64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    DecisionMade {
        round: u64,
        participant: ParticipantId,
        decision: Decision,
        sample: CallSample,
    },
    /// Dispatch failed; the participant holds this round.
    ParticipantError {
        round: u64,
        participant: ParticipantId,
        error: String,
        degraded: bool,
    },
    ExecutionApplied {
        round: u64,
        participant: ParticipantId,
        outcome: ExecutionOutcome,
    },
    ExecutionRejected {
        round: u64,
        participant: ParticipantId,
        error: ExecutionError,
    },
    RoundCompleted {
        leaderboard: Leaderboard,
    },
    CheckpointWritten {
        round: u64,
        location: String,
    },
    SessionEnded {
        session_id: Uuid,
        status: SessionStatus,
        rounds: u64,
        failure: Option<String>,
    },
}

impl ArenaEvent {
    /// Short variant name for logs and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            ArenaEvent::SessionStarted { .. } => "session_started",
            ArenaEvent::StatusChanged { .. } => "status_changed",
            ArenaEvent::RoundStarted { .. } => "round_started",
            ArenaEvent::DecisionMade { .. } => "decision_made",
            ArenaEvent::ParticipantError { .. } => "participant_error",
            ArenaEvent::ExecutionApplied { .. } => "execution_applied",
            ArenaEvent::ExecutionRejected { .. } => "execution_rejected",
            ArenaEvent::RoundCompleted { .. } => "round_completed",
            ArenaEvent::CheckpointWritten { .. } => "checkpoint_written",
            ArenaEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

/// Receives arena events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ArenaEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    #[inline]
    fn emit(&self, _event: ArenaEvent) {}
}

/// Mirrors events into the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: ArenaEvent) {
        match event {
            ArenaEvent::SessionStarted {
                session_id,
                symbol,
                participants,
                resumed_at_round,
            } => info!(
                session_id = %session_id,
                symbol = %symbol,
                participants = participants.len(),
                resumed_at_round,
                "Session started"
            ),
            ArenaEvent::StatusChanged { from, to } => {
                info!(from = %from, to = %to, "Session status changed")
            }
            ArenaEvent::RoundStarted { round, price, .. } => {
                debug!(round, price = %price, "Round started")
            }
            ArenaEvent::DecisionMade {
                round,
                participant,
                decision,
                sample,
            } => debug!(
                round,
                participant = %participant,
                action = %decision.action,
                confidence = %decision.confidence,
                size = %decision.position_size,
                latency_ms = sample.latency_ms,
                attempts = sample.attempts,
                "Decision"
            ),
            ArenaEvent::ParticipantError {
                round,
                participant,
                error,
                degraded,
            } => warn!(
                round,
                participant = %participant,
                error = %error,
                degraded,
                "Participant fell back to HOLD"
            ),
            ArenaEvent::ExecutionApplied {
                round,
                participant,
                outcome,
            } => {
                if outcome.is_trade() {
                    info!(round, participant = %participant, outcome = ?outcome, "Order executed");
                }
            }
            ArenaEvent::ExecutionRejected {
                round,
                participant,
                error,
            } => warn!(round, participant = %participant, error = %error, "Order rejected"),
            ArenaEvent::RoundCompleted { leaderboard } => {
                if let Some(leader) = leaderboard.leader() {
                    info!(
                        round = leaderboard.round,
                        price = %leaderboard.price,
                        leader = %leader.participant,
                        leader_return_pct = %leader.return_pct.round_dp(4),
                        "Round completed"
                    );
                }
            }
            ArenaEvent::CheckpointWritten { round, location } => {
                debug!(round, location = %location, "Checkpoint written")
            }
            ArenaEvent::SessionEnded {
                session_id,
                status,
                rounds,
                failure,
            } => match failure {
                Some(failure) => warn!(
                    session_id = %session_id,
                    status = %status,
                    rounds,
                    failure = %failure,
                    "Session ended"
                ),
                None => info!(session_id = %session_id, status = %status, rounds, "Session ended"),
            },
        }
    }
}

/// Delivery counters for [`ChannelEventSink`].
#[derive(Debug, Default)]
pub struct EventStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EventStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Forwards events over a bounded channel, dropping when it is full.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<ArenaEvent>,
    stats: Arc<EventStats>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ArenaEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                sender,
                stats: Arc::new(EventStats::default()),
            },
            receiver,
        )
    }

    pub fn stats(&self) -> Arc<EventStats> {
        Arc::clone(&self.stats)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ArenaEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                    warn!(dropped, kind = event.kind(), "Event channel full, dropping events");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Broadcasts every event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: ArenaEvent) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.emit(event.clone());
        }
        last.emit(event);
    }
}
