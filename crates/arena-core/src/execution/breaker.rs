//! Cumulative-loss circuit breaker.
//!
//! Halts new exposure for a participant once realized losses inside the
//! current window exceed `max_cumulative_loss_fraction × starting_capital`.
//! Closing an existing position is never blocked.
//!
//! The window is either the whole session or the current UTC day. Its
//! baseline lives in the ledger so it survives checkpoint and resume.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{BreakerScope, RiskConfig};
use crate::portfolio::PortfolioLedger;

/// Breaker state for one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// New BUYs allowed.
    Armed { loss: Decimal, limit: Decimal },
    /// New BUYs blocked until the window rolls (daily scope only).
    Tripped { loss: Decimal, limit: Decimal },
}

impl BreakerState {
    pub fn is_tripped(&self) -> bool {
        matches!(self, BreakerState::Tripped { .. })
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Armed { .. } => write!(f, "Armed"),
            BreakerState::Tripped { .. } => write!(f, "Tripped"),
        }
    }
}

/// Evaluates the loss limit against a ledger.
#[derive(Debug, Clone, Copy)]
pub struct LossCircuitBreaker {
    scope: BreakerScope,
    max_loss_fraction: Decimal,
}

impl LossCircuitBreaker {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            scope: risk.breaker_scope,
            max_loss_fraction: risk.max_cumulative_loss_fraction,
        }
    }

    /// Absolute loss limit for `ledger`.
    pub fn limit(&self, ledger: &PortfolioLedger) -> Decimal {
        ledger.starting_capital() * self.max_loss_fraction
    }

    /// Realized loss inside the window containing `now` (zero when in profit).
    ///
    /// A daily window that has not been rolled onto today yet counts from
    /// the current realized PnL, so reading never needs the ledger mutably.
    pub fn window_loss(&self, ledger: &PortfolioLedger, now: DateTime<Utc>) -> Decimal {
        let window = ledger.loss_window();
        let baseline = if self.scope == BreakerScope::Daily && window.day != Some(now.date_naive()) {
            ledger.realized_pnl()
        } else {
            window.realized_at_open
        };
        let pnl = ledger.realized_pnl() - baseline;
        if pnl < Decimal::ZERO { -pnl } else { Decimal::ZERO }
    }

    pub fn state(&self, ledger: &PortfolioLedger, now: DateTime<Utc>) -> BreakerState {
        let loss = self.window_loss(ledger, now);
        let limit = self.limit(ledger);
        if loss > limit {
            BreakerState::Tripped { loss, limit }
        } else {
            BreakerState::Armed { loss, limit }
        }
    }

    /// Open a new window when the UTC day changes (daily scope only).
    ///
    /// Only called once an order is known to fill.
    pub(crate) fn roll_window(&self, ledger: &mut PortfolioLedger, now: DateTime<Utc>) {
        if self.scope != BreakerScope::Daily {
            return;
        }
        let today = now.date_naive();
        if ledger.loss_window().day != Some(today) {
            ledger.reset_loss_window(Some(today));
        }
    }
}
