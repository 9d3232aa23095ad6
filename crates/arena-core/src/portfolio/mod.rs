//! Per-participant paper accounts and rolling statistics.
//!
//! - `ledger`: cash, open position, realized PnL and trade counters
//! - `stats`: decisions, errors, latency samples, degraded flag

pub mod ledger;
pub mod stats;

pub use ledger::{AccountState, LossWindow, PortfolioLedger, Position};
pub use stats::{CallSample, ParticipantStats};
