//! Market snapshot and context collaborators.
//!
//! The arena asks a [`MarketSnapshotProvider`] for one snapshot per round and
//! hands it, together with each participant's account state, to a
//! [`ContextBuilder`]. Every participant receives a payload built from the
//! same snapshot.
//!
//! ## Providers
//!
//! - `ReplayProvider`: pre-loaded price series with a cursor, optionally read
//!   from a `timestamp,price` CSV
//! - `RandomWalkProvider`: seeded geometric random walk for demos

pub mod random_walk;
pub mod replay;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::portfolio::AccountState;

pub use random_walk::RandomWalkProvider;
pub use replay::{PricePoint, ReplayProvider};

/// Prices kept for feature computation.
pub const FEATURE_LOOKBACK: usize = 20;

/// Errors from a snapshot provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// No more data; the session finishes normally.
    #[error("Market data exhausted")]
    Exhausted,

    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Market state shared by all participants for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Derived indicators, opaque to the arena.
    pub features: Value,
}

/// Source of one snapshot per round.
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError>;

    /// Position the provider as if `rounds_consumed` snapshots had been taken.
    /// Called once when a session resumes from a checkpoint.
    async fn seek(&self, _rounds_consumed: u64) -> Result<(), MarketError> {
        Ok(())
    }
}

/// Builds the opaque payload forwarded to an adapter.
pub trait ContextBuilder: Send + Sync {
    fn build(&self, snapshot: &MarketSnapshot, account: &AccountState, round: u64) -> Value;
}

/// Default context: snapshot, features and account state as one JSON object.
#[derive(Debug, Clone, Default)]
pub struct JsonContextBuilder;

impl ContextBuilder for JsonContextBuilder {
    fn build(&self, snapshot: &MarketSnapshot, account: &AccountState, round: u64) -> Value {
        json!({
            "round": round,
            "symbol": snapshot.symbol,
            "price": snapshot.price,
            "timestamp": snapshot.timestamp,
            "features": snapshot.features,
            "account": account,
        })
    }
}

/// Simple features over a trailing price window (oldest first).
pub fn price_features(window: &[Decimal]) -> Value {
    let Some(&last) = window.last() else {
        return json!({});
    };

    let change_pct = match window.len() {
        n if n >= 2 && window[n - 2] > Decimal::ZERO => {
            ((last - window[n - 2]) / window[n - 2] * Decimal::ONE_HUNDRED)
                .round_dp(4)
                .normalize()
        }
        _ => Decimal::ZERO,
    };
    let sum: Decimal = window.iter().sum();
    let sma = (sum / Decimal::from(window.len())).round_dp(4).normalize();
    let high = window.iter().copied().max().unwrap_or(last);
    let low = window.iter().copied().min().unwrap_or(last);

    json!({
        "change_pct": change_pct,
        "sma": sma,
        "high": high,
        "low": low,
        "samples": window.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PortfolioLedger;
    use rust_decimal_macros::dec;

    fn decimal_at(value: &Value, key: &str) -> Decimal {
        value[key].as_str().unwrap().parse().unwrap()
    }

    #[test]
    fn test_price_features() {
        let features = price_features(&[dec!(100), dec!(110), dec!(99)]);
        assert_eq!(decimal_at(&features, "change_pct"), dec!(-10));
        assert_eq!(decimal_at(&features, "sma"), dec!(103));
        assert_eq!(decimal_at(&features, "high"), dec!(110));
        assert_eq!(decimal_at(&features, "low"), dec!(99));
        assert_eq!(features["samples"], json!(3));

        assert_eq!(price_features(&[]), json!({}));
    }

    #[test]
    fn test_json_context_builder() {
        let snapshot = MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price: dec!(50000),
            timestamp: Utc::now(),
            features: json!({"sma": "49000"}),
        };
        let account = PortfolioLedger::new(dec!(100)).account_state(dec!(50000));

        let payload = JsonContextBuilder.build(&snapshot, &account, 7);
        assert_eq!(payload["round"], json!(7));
        assert_eq!(payload["symbol"], json!("BTCUSDT"));
        assert_eq!(payload["features"]["sma"], json!("49000"));
        assert_eq!(payload["account"]["has_position"], json!(false));
    }
}
