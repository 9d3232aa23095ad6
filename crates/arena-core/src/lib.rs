//! Round-based competition engine for paper-trading decision agents.
//!
//! Several agents receive the same market context each round, answer with
//! a trading decision, and are scored on independent simulated accounts.
//!
//! ## Architecture
//!
//! - **Concurrent dispatch**: one task per agent per round, bounded by a
//!   round deadline; per-agent retry and rate limiting
//! - **Serial execution**: decisions are applied to isolated ledgers after
//!   the round's dispatch completes, so accounting is deterministic
//! - **Recoverable sessions**: checkpoints after every K rounds; a session
//!   resumes from its latest checkpoint
//!
//! ## Modules
//!
//! - `arena`: scheduler state machine, control handle and session records
//! - `adapter`: agent adapters (HTTP chat, mock, scripted)
//! - `dispatch`: concurrent dispatch with timeout, retry and token bucket
//! - `validator`: raw agent output to validated decision
//! - `execution`: fills with slippage and fees under risk limits
//! - `portfolio`: per-agent ledgers and call statistics
//! - `leaderboard`: deterministic ranking
//! - `market`: snapshot providers and context building
//! - `checkpoint`: durable session snapshots
//! - `events`: round and session event sinks
//! - `export`: final results files
//! - `config`: configuration loading and validation

pub mod adapter;
pub mod arena;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod execution;
pub mod export;
pub mod leaderboard;
pub mod market;
pub mod portfolio;
pub mod types;
pub mod validator;

pub use adapter::{AdapterError, AgentAdapter, AgentContext, MockAdapter, MockStrategy};
pub use arena::{
    Arena, ArenaBuilder, ArenaController, ArenaHandle, RoundRecord, SchedulerFailure,
    SessionSummary, StatusReport,
};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, FileCheckpointStore};
pub use config::ArenaConfig;
pub use events::{ArenaEvent, ChannelEventSink, EventSink, FanoutSink, LogEventSink};
pub use execution::{ExecutionEngine, ExecutionError, ExecutionOutcome};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use market::{MarketSnapshot, MarketSnapshotProvider, RandomWalkProvider, ReplayProvider};
pub use portfolio::{AccountState, ParticipantStats, PortfolioLedger};
pub use types::{Decision, RawOutput};
