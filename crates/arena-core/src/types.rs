//! Decision types exchanged between adapters, the validator and the engine.

use arena_common::Action;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw, unvalidated output of an agent adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawOutput {
    /// Free-form text, possibly wrapping a JSON object.
    Text(String),
    /// Already-structured output.
    Json(serde_json::Value),
}

impl RawOutput {
    pub fn text(s: impl Into<String>) -> Self {
        RawOutput::Text(s.into())
    }
}

/// One participant's validated action for one round.
///
/// Immutable once produced; retained in round history for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Agent confidence in [0, 1].
    pub confidence: Decimal,
    /// Fraction of available cash to commit on BUY, in [0, 1]. Zero for HOLD.
    pub position_size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reasoning: String,
    /// Set when this decision replaced a failed dispatch or invalid output.
    pub fallback_reason: Option<String>,
}

impl Decision {
    /// Safe HOLD substituted for a failed or invalid agent response.
    pub fn fallback(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            action: Action::Hold,
            confidence: Decimal::ZERO,
            position_size: Decimal::ZERO,
            stop_loss: None,
            take_profit: None,
            reasoning: format!("fallback: {reason}"),
            fallback_reason: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}
