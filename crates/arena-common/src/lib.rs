//! Shared types for the trading agent arena.
//!
//! This crate contains:
//! - Participant identity (`ParticipantId`)
//! - Trading actions (`Action`)
//! - Session lifecycle states (`SessionStatus`)

pub mod types;

pub use types::*;
