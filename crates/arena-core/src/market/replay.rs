//! Replay of a pre-loaded price series.
//!
//! Each `snapshot` call consumes one point. The cursor can be moved with
//! `seek`, so a resumed session sees the same prices it would have seen
//! had it never stopped.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{FEATURE_LOOKBACK, MarketError, MarketSnapshot, MarketSnapshotProvider, price_features};

/// One row of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Replays prices in order, one per round.
///
/// The series is behind an `Arc` so several sessions can replay the same
/// data without copying it.
#[derive(Debug)]
pub struct ReplayProvider {
    points: Arc<Vec<PricePoint>>,
    cursor: AtomicUsize,
}

impl ReplayProvider {
    /// Points should already be in chronological order.
    pub fn new(points: Arc<Vec<PricePoint>>) -> Self {
        Self {
            points,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Series starting at `start`, one point every `step`.
    pub fn from_prices(start: DateTime<Utc>, step: chrono::Duration, prices: &[Decimal]) -> Self {
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                timestamp: start + step * i as i32,
                price,
            })
            .collect();
        Self::new(Arc::new(points))
    }

    /// Load a `timestamp,price` CSV with a header row.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, MarketError> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| MarketError::Parse(format!("Failed to open {:?}: {}", path, e)))?;

        let mut points = Vec::new();
        for result in reader.deserialize() {
            let point: PricePoint =
                result.map_err(|e| MarketError::Parse(format!("CSV parse error: {}", e)))?;
            if point.price <= Decimal::ZERO {
                return Err(MarketError::Parse(format!(
                    "non-positive price {} at {}",
                    point.price, point.timestamp
                )));
            }
            points.push(point);
        }
        points.sort_by_key(|p| p.timestamp);

        debug!(path = ?path, points = points.len(), "Loaded replay prices");
        Ok(Self::new(Arc::new(points)))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the next point to be served.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketSnapshotProvider for ReplayProvider {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(point) = self.points.get(index) else {
            self.cursor.store(self.points.len(), Ordering::SeqCst);
            return Err(MarketError::Exhausted);
        };

        let from = (index + 1).saturating_sub(FEATURE_LOOKBACK);
        let window: Vec<Decimal> = self.points[from..=index].iter().map(|p| p.price).collect();

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price: point.price,
            timestamp: point.timestamp,
            features: price_features(&window),
        })
    }

    async fn seek(&self, rounds_consumed: u64) -> Result<(), MarketError> {
        let target = usize::try_from(rounds_consumed)
            .unwrap_or(usize::MAX)
            .min(self.points.len());
        self.cursor.store(target, Ordering::SeqCst);
        Ok(())
    }
}
