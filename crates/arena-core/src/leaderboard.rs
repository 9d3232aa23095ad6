//! Round leaderboard.
//!
//! A pure ranking over ledger snapshots. Ordering is total and
//! deterministic:
//!
//! 1. return % descending
//! 2. cumulative error count ascending
//! 3. participant id ascending
//!
//! Recomputing from the same ledgers always yields the same leaderboard.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use arena_common::ParticipantId;

use crate::portfolio::{ParticipantStats, PortfolioLedger};

/// Inputs for one participant's row.
#[derive(Debug, Clone, Copy)]
pub struct Standing<'a> {
    pub participant: &'a ParticipantId,
    pub ledger: &'a PortfolioLedger,
    pub stats: &'a ParticipantStats,
    /// Whether this round's decision was a fallback HOLD.
    pub fallback: bool,
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based rank.
    pub rank: usize,
    pub participant: ParticipantId,
    pub account_value: Decimal,
    pub return_pct: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub cash: Decimal,
    pub has_position: bool,
    pub trades: u32,
    pub win_rate: Decimal,
    pub errors: u64,
    pub fallbacks: u64,
    pub fallback: bool,
    pub degraded: bool,
    pub avg_latency_ms: u64,
}

/// Ranked snapshot at the end of a round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub round: u64,
    pub price: Decimal,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Rank every standing at `price`.
    pub fn compute<'a>(
        round: u64,
        price: Decimal,
        standings: impl IntoIterator<Item = Standing<'a>>,
    ) -> Self {
        let mut entries: Vec<LeaderboardEntry> = standings
            .into_iter()
            .map(|s| LeaderboardEntry {
                rank: 0,
                participant: s.participant.clone(),
                account_value: s.ledger.total_value(price),
                return_pct: s.ledger.return_pct(price),
                realized_pnl: s.ledger.realized_pnl(),
                unrealized_pnl: s.ledger.unrealized_pnl(price),
                cash: s.ledger.cash(),
                has_position: s.ledger.position().is_some(),
                trades: s.ledger.trade_count(),
                win_rate: s.ledger.win_rate(),
                errors: s.stats.errors,
                fallbacks: s.stats.fallbacks,
                fallback: s.fallback,
                degraded: s.stats.degraded,
                avg_latency_ms: s.stats.avg_latency_ms(),
            })
            .collect();

        entries.sort_by(compare_rows);
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }

        Self {
            round,
            price,
            entries,
        }
    }

    /// Top-ranked entry.
    pub fn leader(&self) -> Option<&LeaderboardEntry> {
        self.entries.first()
    }

    pub fn entry(&self, participant: &ParticipantId) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| &e.participant == participant)
    }

    /// Participant ids in rank order.
    pub fn ranking(&self) -> Vec<&ParticipantId> {
        self.entries.iter().map(|e| &e.participant).collect()
    }
}

/// Total order used for ranking.
pub fn compare_rows(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    // 1. Return desc
    match b.return_pct.cmp(&a.return_pct) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // 2. Errors asc
    match a.errors.cmp(&b.errors) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // 3. Id asc
    a.participant.cmp(&b.participant)
}
