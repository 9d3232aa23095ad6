//! Paper execution of validated decisions against a participant's ledger.
//!
//! `ExecutionEngine::apply` is the only way a ledger changes. It either
//! applies a decision in full or rejects it with an [`ExecutionError`] and
//! leaves the ledger untouched.
//!
//! ## Pricing
//!
//! - BUY fills at `price × (1 + slippage)`, SELL at `price × (1 − slippage)`
//! - Commission is `quantity × execution_price × commission_rate`
//! - Quantities are truncated to [`QUANTITY_DP`] decimal places
//!
//! ## Risk
//!
//! BUY is rejected when the requested fraction exceeds the configured
//! maximum, when the order is below the minimum size, or while the
//! cumulative-loss breaker is tripped. SELL is always allowed when a
//! position is open.

pub mod breaker;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use arena_common::Action;

use crate::config::{ExecutionConfig, RiskConfig};
use crate::portfolio::{PortfolioLedger, Position};
use crate::types::Decision;

pub use breaker::{BreakerState, LossCircuitBreaker};

/// Decimal places kept on position quantities.
pub const QUANTITY_DP: u32 = 8;

/// Risk limit that caused a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLimit {
    /// Requested fraction of cash above the configured maximum.
    PositionFraction { requested: Decimal, max: Decimal },
    /// Cumulative loss above the configured fraction of starting capital.
    LossCircuitBreaker { loss: Decimal, limit: Decimal },
}

impl std::fmt::Display for RiskLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLimit::PositionFraction { requested, max } => {
                write!(f, "position fraction {} > max {}", requested, max)
            }
            RiskLimit::LossCircuitBreaker { loss, limit } => {
                write!(f, "loss circuit breaker: loss {} > limit {}", loss, limit)
            }
        }
    }
}

/// Order rejection reasons. The ledger is unchanged whenever one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("Insufficient funds: available={available}, required={required}")]
    InsufficientFunds { available: Decimal, required: Decimal },

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(RiskLimit),

    #[error("No open position to sell")]
    NoOpenPosition,

    #[error("Position already open")]
    DuplicatePosition,

    #[error("Order below minimum: value={value}, minimum={minimum}")]
    BelowMinimumOrder { value: Decimal, minimum: Decimal },

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),
}

/// Market price and round identity for one execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub round: u64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Ledger change produced by a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Opened {
        price: Decimal,
        quantity: Decimal,
        notional: Decimal,
        fee: Decimal,
    },
    Closed {
        price: Decimal,
        quantity: Decimal,
        proceeds: Decimal,
        fee: Decimal,
        realized_pnl: Decimal,
    },
    Held,
}

impl ExecutionOutcome {
    /// Whether the ledger changed.
    pub fn is_trade(&self) -> bool {
        !matches!(self, ExecutionOutcome::Held)
    }
}

/// Applies decisions to ledgers with slippage, fees and risk limits.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Apply `decision` to `ledger` at `tick.price`.
    ///
    /// Every check happens before the first mutation, so an error always
    /// leaves the ledger as it was.
    pub fn apply(
        &self,
        ledger: &mut PortfolioLedger,
        decision: &Decision,
        tick: &PriceTick,
        risk: &RiskConfig,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let breaker = LossCircuitBreaker::new(risk);

        match decision.action {
            Action::Hold => Ok(ExecutionOutcome::Held),
            Action::Buy => self.buy(ledger, decision, tick, risk, &breaker),
            Action::Sell => self.sell(ledger, tick, &breaker),
        }
    }

    fn buy(
        &self,
        ledger: &mut PortfolioLedger,
        decision: &Decision,
        tick: &PriceTick,
        risk: &RiskConfig,
        breaker: &LossCircuitBreaker,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if ledger.position().is_some() {
            return Err(ExecutionError::DuplicatePosition);
        }
        if tick.price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidPrice(tick.price));
        }

        if let BreakerState::Tripped { loss, limit } = breaker.state(ledger, tick.timestamp) {
            return Err(ExecutionError::RiskLimitExceeded(
                RiskLimit::LossCircuitBreaker { loss, limit },
            ));
        }

        if decision.position_size > risk.max_position_fraction {
            return Err(ExecutionError::RiskLimitExceeded(
                RiskLimit::PositionFraction {
                    requested: decision.position_size,
                    max: risk.max_position_fraction,
                },
            ));
        }

        let budget = decision.position_size * ledger.cash();
        if budget < self.config.min_order_size || budget <= Decimal::ZERO {
            return Err(ExecutionError::BelowMinimumOrder {
                value: budget,
                minimum: self.config.min_order_size,
            });
        }

        let exec_price = tick.price * (Decimal::ONE + self.config.slippage);
        let quantity =
            (budget / exec_price).round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::BelowMinimumOrder {
                value: budget,
                minimum: self.config.min_order_size,
            });
        }

        let notional = quantity * exec_price;
        let fee = notional * self.config.commission_rate;
        let required = notional + fee;
        if required > ledger.cash() {
            return Err(ExecutionError::InsufficientFunds {
                available: ledger.cash(),
                required,
            });
        }

        breaker.roll_window(ledger, tick.timestamp);
        ledger.open(
            Position {
                entry_price: exec_price,
                quantity,
                entry_fee: fee,
                entry_round: tick.round,
                entry_time: tick.timestamp,
                stop_loss: decision.stop_loss,
                take_profit: decision.take_profit,
            },
            notional,
            fee,
        );

        debug!(
            price = %exec_price,
            quantity = %quantity,
            notional = %notional,
            fee = %fee,
            cash = %ledger.cash(),
            "Paper BUY filled"
        );

        Ok(ExecutionOutcome::Opened {
            price: exec_price,
            quantity,
            notional,
            fee,
        })
    }

    fn sell(
        &self,
        ledger: &mut PortfolioLedger,
        tick: &PriceTick,
        breaker: &LossCircuitBreaker,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(position) = ledger.position() else {
            return Err(ExecutionError::NoOpenPosition);
        };
        if tick.price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidPrice(tick.price));
        }

        let exec_price = tick.price * (Decimal::ONE - self.config.slippage);
        let quantity = position.quantity;
        let proceeds = quantity * exec_price;
        let fee = proceeds * self.config.commission_rate;
        let realized_pnl =
            (exec_price - position.entry_price) * quantity - position.entry_fee - fee;

        breaker.roll_window(ledger, tick.timestamp);
        ledger.close(proceeds, fee, realized_pnl);

        debug!(
            price = %exec_price,
            quantity = %quantity,
            realized_pnl = %realized_pnl,
            cash = %ledger.cash(),
            "Paper SELL filled"
        );

        Ok(ExecutionOutcome::Closed {
            price: exec_price,
            quantity,
            proceeds,
            fee,
            realized_pnl,
        })
    }
}
