//! Rolling per-participant statistics.
//!
//! Updated by the scheduler after every round from the dispatcher's call
//! records and the execution result. Checkpointed alongside the ledger.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Latency samples retained per participant.
pub const LATENCY_WINDOW: usize = 100;

/// Measurements from one adapter invocation (all attempts combined).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSample {
    /// Wall-clock time from dispatch to resolution.
    pub latency_ms: u64,
    /// Adapter attempts made, including retries.
    pub attempts: u32,
    /// Time spent waiting on the rate limiter.
    pub rate_limit_wait_ms: u64,
}

impl CallSample {
    pub fn new(latency: Duration, attempts: u32, rate_limit_wait: Duration) -> Self {
        Self {
            latency_ms: latency.as_millis() as u64,
            attempts,
            rate_limit_wait_ms: rate_limit_wait.as_millis() as u64,
        }
    }
}

/// Counters and latency history for one participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStats {
    /// Rounds where the agent produced a valid decision.
    pub decisions_made: u64,
    /// Orders that changed the ledger.
    pub trades_executed: u64,
    /// Dispatch failures plus rejected orders. Used as leaderboard tie-break.
    pub errors: u64,
    /// Rounds resolved by a fallback HOLD.
    pub fallbacks: u64,
    /// Orders rejected by the execution engine.
    pub rejections: u64,
    /// Failed dispatches in a row; reset on the next valid decision.
    pub consecutive_failures: u32,
    /// Adapter attempts across the session.
    pub total_attempts: u64,
    pub latencies_ms: VecDeque<u64>,
    pub last_error: Option<String>,
    /// Set after repeated consecutive failures; cleared on recovery.
    pub degraded: bool,
}

impl ParticipantStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency and attempt count of one dispatch.
    pub fn record_call(&mut self, sample: &CallSample) {
        self.total_attempts += u64::from(sample.attempts);
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(sample.latency_ms);
    }

    /// Record a valid decision. Clears the degraded flag.
    pub fn record_decision(&mut self) {
        self.decisions_made += 1;
        self.consecutive_failures = 0;
        self.degraded = false;
    }

    /// Record a failed dispatch resolved by fallback.
    ///
    /// Marks the participant degraded once `degraded_after` consecutive
    /// failures have accumulated (0 disables the flag).
    pub fn record_failure(&mut self, error: &str, degraded_after: u32) {
        self.errors += 1;
        self.fallbacks += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        if degraded_after > 0 && self.consecutive_failures >= degraded_after {
            self.degraded = true;
        }
    }

    pub fn record_trade(&mut self) {
        self.trades_executed += 1;
    }

    /// Record an order rejected by the execution engine.
    pub fn record_rejection(&mut self, error: &str) {
        self.errors += 1;
        self.rejections += 1;
        self.last_error = Some(error.to_string());
    }

    /// Mean of the retained latency samples.
    pub fn avg_latency_ms(&self) -> u64 {
        if self.latencies_ms.is_empty() {
            return 0;
        }
        self.latencies_ms.iter().sum::<u64>() / self.latencies_ms.len() as u64
    }
}
