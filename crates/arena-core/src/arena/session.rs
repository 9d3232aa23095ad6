//! Session records: round history, status reports and the final summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use arena_common::{ParticipantId, SessionStatus};

use crate::execution::{ExecutionError, ExecutionOutcome};
use crate::leaderboard::Leaderboard;
use crate::market::MarketSnapshot;
use crate::portfolio::{CallSample, ParticipantStats, PortfolioLedger};
use crate::types::Decision;

/// Result of handing a decision to the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Applied { outcome: ExecutionOutcome },
    Rejected { error: ExecutionError },
}

impl ExecutionStatus {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecutionStatus::Rejected { .. })
    }
}

/// One participant's part of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEntry {
    /// The validated decision, or the fallback HOLD that replaced it.
    pub decision: Decision,
    /// Dispatch or validation failure text when the decision is a fallback.
    pub dispatch_error: Option<String>,
    pub execution: ExecutionStatus,
    pub sample: CallSample,
}

/// Immutable record of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u64,
    pub timestamp: DateTime<Utc>,
    pub snapshot: MarketSnapshot,
    pub entries: BTreeMap<ParticipantId, RoundEntry>,
    pub leaderboard: Leaderboard,
}

/// Point-in-time view served by `ArenaHandle::status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// Rounds completed so far.
    pub round: u64,
    pub leaderboard: Option<Leaderboard>,
    pub failure: Option<String>,
}

impl StatusReport {
    pub(crate) fn new(session_id: Uuid, round: u64) -> Self {
        Self {
            session_id,
            status: SessionStatus::Init,
            round,
            leaderboard: None,
            failure: None,
        }
    }
}

/// Final state of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub ledger: PortfolioLedger,
    pub stats: ParticipantStats,
}

/// Everything a finished session produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub symbol: String,
    pub status: SessionStatus,
    pub rounds_completed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub failure: Option<String>,
    pub leaderboard: Option<Leaderboard>,
    pub participants: Vec<ParticipantSummary>,
    pub history: Vec<RoundRecord>,
}

impl SessionSummary {
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantSummary> {
        self.participants.iter().find(|p| &p.id == id)
    }
}
