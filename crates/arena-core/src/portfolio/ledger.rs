//! Paper-trading account for a single participant.
//!
//! Long-only: at most one open [`Position`] on the session instrument.
//! The ledger keeps `cash + position_market_value == total_account_value`
//! and never lets cash go negative. All mutation goes through the
//! execution engine, which calls the crate-private `open`/`close` methods
//! once per round.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use arena_common::return_fraction;

/// An open long position. Owned by its ledger; holds no reference back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Execution price paid per unit (after slippage).
    pub entry_price: Decimal,
    /// Units held. Always positive while the position exists.
    pub quantity: Decimal,
    /// Commission paid when opening.
    pub entry_fee: Decimal,
    pub entry_round: u64,
    pub entry_time: DateTime<Utc>,
    /// Agent-supplied protective levels, kept for audit.
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl Position {
    /// Units valued at `price`.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Gross mark-to-market PnL at `price`, excluding fees.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity
    }
}

/// Realized PnL baseline for the cumulative-loss circuit breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossWindow {
    /// UTC day the window opened on (daily scope only).
    pub day: Option<NaiveDate>,
    /// Realized PnL when the window opened.
    pub realized_at_open: Decimal,
}

/// Read-only view of a ledger valued at a price.
///
/// Handed to the context builder and validator; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub starting_capital: Decimal,
    pub cash: Decimal,
    pub has_position: bool,
    pub position_quantity: Decimal,
    pub entry_price: Option<Decimal>,
    pub mark_price: Decimal,
    pub position_value: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Return on starting capital in percent.
    pub return_pct: Decimal,
}

/// Per-participant paper account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioLedger {
    starting_capital: Decimal,
    cash: Decimal,
    position: Option<Position>,
    /// Net of all fees on closed round trips.
    realized_pnl: Decimal,
    fees_paid: Decimal,
    /// Executed orders (each BUY and each SELL counts once).
    trade_count: u32,
    win_count: u32,
    loss_count: u32,
    loss_window: LossWindow,
}

impl PortfolioLedger {
    /// Create a flat ledger funded with `starting_capital`.
    pub fn new(starting_capital: Decimal) -> Self {
        Self {
            starting_capital,
            cash: starting_capital,
            position: None,
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            trade_count: 0,
            win_count: 0,
            loss_count: 0,
            loss_window: LossWindow::default(),
        }
    }

    #[inline]
    pub fn starting_capital(&self) -> Decimal {
        self.starting_capital
    }

    #[inline]
    pub fn cash(&self) -> Decimal {
        self.cash
    }

    #[inline]
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    #[inline]
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    #[inline]
    pub fn fees_paid(&self) -> Decimal {
        self.fees_paid
    }

    #[inline]
    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }

    #[inline]
    pub fn win_count(&self) -> u32 {
        self.win_count
    }

    #[inline]
    pub fn loss_count(&self) -> u32 {
        self.loss_count
    }

    pub fn loss_window(&self) -> &LossWindow {
        &self.loss_window
    }

    /// Closed round trips that made money, as a ratio (0.0 to 1.0).
    pub fn win_rate(&self) -> Decimal {
        let closed = self.win_count + self.loss_count;
        if closed == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.win_count) / Decimal::from(closed)
    }

    /// Value of the open position at `price` (zero when flat).
    pub fn position_value(&self, price: Decimal) -> Decimal {
        self.position
            .as_ref()
            .map(|p| p.market_value(price))
            .unwrap_or(Decimal::ZERO)
    }

    /// `cash + position_value(price)`.
    pub fn total_value(&self, price: Decimal) -> Decimal {
        self.cash + self.position_value(price)
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.position
            .as_ref()
            .map(|p| p.unrealized_pnl(price))
            .unwrap_or(Decimal::ZERO)
    }

    /// Return on starting capital at `price`, in percent.
    pub fn return_pct(&self, price: Decimal) -> Decimal {
        return_fraction(self.total_value(price), self.starting_capital) * Decimal::ONE_HUNDRED
    }

    /// Snapshot of the account valued at `price`.
    pub fn account_state(&self, price: Decimal) -> AccountState {
        AccountState {
            starting_capital: self.starting_capital,
            cash: self.cash,
            has_position: self.position.is_some(),
            position_quantity: self
                .position
                .as_ref()
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO),
            entry_price: self.position.as_ref().map(|p| p.entry_price),
            mark_price: price,
            position_value: self.position_value(price),
            total_value: self.total_value(price),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(price),
            return_pct: self.return_pct(price),
        }
    }

    /// Open `position`, debiting `cost + fee` from cash.
    ///
    /// The caller has already checked that no position is open and that
    /// cash covers the debit.
    pub(crate) fn open(&mut self, position: Position, cost: Decimal, fee: Decimal) {
        debug_assert!(self.position.is_none());
        debug_assert!(cost + fee <= self.cash);
        self.cash -= cost + fee;
        self.fees_paid += fee;
        self.trade_count += 1;
        self.position = Some(position);
    }

    /// Close the open position, crediting `proceeds - fee` and realizing `pnl`.
    pub(crate) fn close(&mut self, proceeds: Decimal, fee: Decimal, pnl: Decimal) -> Option<Position> {
        let closed = self.position.take()?;
        self.cash += proceeds - fee;
        self.fees_paid += fee;
        self.realized_pnl += pnl;
        self.trade_count += 1;
        if pnl > Decimal::ZERO {
            self.win_count += 1;
        } else {
            self.loss_count += 1;
        }
        Some(closed)
    }

    /// Restart the loss window at the current realized PnL.
    pub(crate) fn reset_loss_window(&mut self, day: Option<NaiveDate>) {
        self.loss_window = LossWindow {
            day,
            realized_at_open: self.realized_pnl,
        };
    }

    #[cfg(test)]
    pub(crate) fn set_cash_for_test(&mut self, cash: Decimal) {
        self.cash = cash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(entry: Decimal, qty: Decimal, fee: Decimal) -> Position {
        Position {
            entry_price: entry,
            quantity: qty,
            entry_fee: fee,
            entry_round: 1,
            entry_time: Utc::now(),
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn test_new_ledger_is_flat() {
        let ledger = PortfolioLedger::new(dec!(100));
        assert_eq!(ledger.cash(), dec!(100));
        assert!(ledger.position().is_none());
        assert_eq!(ledger.total_value(dec!(50000)), dec!(100));
        assert_eq!(ledger.return_pct(dec!(50000)), dec!(0));
        assert_eq!(ledger.win_rate(), dec!(0));
    }

    #[test]
    fn test_open_and_value() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger.open(position(dec!(100), dec!(0.5), dec!(0.05)), dec!(50), dec!(0.05));

        assert_eq!(ledger.cash(), dec!(49.95));
        assert_eq!(ledger.fees_paid(), dec!(0.05));
        assert_eq!(ledger.trade_count(), 1);
        assert_eq!(ledger.position_value(dec!(110)), dec!(55));
        assert_eq!(ledger.total_value(dec!(110)), dec!(104.95));
        assert_eq!(ledger.unrealized_pnl(dec!(110)), dec!(5));
        assert_eq!(ledger.return_pct(dec!(110)), dec!(4.95));
    }

    #[test]
    fn test_close_updates_counters() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger.open(position(dec!(100), dec!(0.5), dec!(0.05)), dec!(50), dec!(0.05));
        let closed = ledger.close(dec!(45), dec!(0.045), dec!(-5.095));

        assert!(closed.is_some());
        assert!(ledger.position().is_none());
        assert_eq!(ledger.cash(), dec!(94.905));
        assert_eq!(ledger.realized_pnl(), dec!(-5.095));
        assert_eq!(ledger.loss_count(), 1);
        assert_eq!(ledger.win_count(), 0);
        assert_eq!(ledger.trade_count(), 2);
        // Realized PnL accounts for every cent that left the account
        assert_eq!(ledger.cash(), ledger.starting_capital() + ledger.realized_pnl());
    }

    #[test]
    fn test_close_without_position_is_none() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        assert!(ledger.close(dec!(1), dec!(0), dec!(1)).is_none());
        assert_eq!(ledger.cash(), dec!(100));
        assert_eq!(ledger.trade_count(), 0);
    }

    #[test]
    fn test_account_state() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger.open(position(dec!(100), dec!(0.5), dec!(0)), dec!(50), dec!(0));
        let state = ledger.account_state(dec!(120));

        assert!(state.has_position);
        assert_eq!(state.position_quantity, dec!(0.5));
        assert_eq!(state.entry_price, Some(dec!(100)));
        assert_eq!(state.position_value, dec!(60));
        assert_eq!(state.total_value, dec!(110));
        assert_eq!(state.cash + state.position_value, state.total_value);
    }

    #[test]
    fn test_serde_round_trip_preserves_state() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger.open(position(dec!(123.456), dec!(0.1), dec!(0.01)), dec!(12.3456), dec!(0.01));
        let json = serde_json::to_string(&ledger).unwrap();
        let restored: PortfolioLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ledger);
    }
}
