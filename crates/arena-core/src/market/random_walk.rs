//! Seeded random-walk price source for demo sessions.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use super::{FEATURE_LOOKBACK, MarketError, MarketSnapshot, MarketSnapshotProvider, price_features};

struct WalkState {
    rng: StdRng,
    price: Decimal,
    steps: u64,
    history: VecDeque<Decimal>,
}

/// Geometric random walk: each step multiplies the price by
/// `1 + u × volatility` with `u` uniform in `[-1, 1)`.
///
/// The sequence depends only on the seed, so `seek(n)` reproduces the
/// exact prices a fresh walk would produce after `n` snapshots.
pub struct RandomWalkProvider {
    seed: u64,
    start_price: Decimal,
    volatility: f64,
    state: Mutex<WalkState>,
}

impl RandomWalkProvider {
    pub fn new(start_price: Decimal, volatility: f64, seed: u64) -> Self {
        Self {
            seed,
            start_price,
            volatility,
            state: Mutex::new(Self::fresh_state(start_price, seed)),
        }
    }

    fn fresh_state(start_price: Decimal, seed: u64) -> WalkState {
        WalkState {
            rng: StdRng::seed_from_u64(seed),
            price: start_price,
            steps: 0,
            history: VecDeque::with_capacity(FEATURE_LOOKBACK),
        }
    }

    /// Produce the next price. The first step returns the start price.
    fn advance(&self, state: &mut WalkState) -> Decimal {
        if state.steps > 0 {
            let shock: f64 = state.rng.random_range(-1.0..1.0) * self.volatility;
            let factor = Decimal::try_from(1.0 + shock).unwrap_or(Decimal::ONE);
            state.price = (state.price * factor).round_dp(2).max(Decimal::new(1, 2));
        }
        state.steps += 1;
        if state.history.len() == FEATURE_LOOKBACK {
            state.history.pop_front();
        }
        state.history.push_back(state.price);
        state.price
    }
}

#[async_trait]
impl MarketSnapshotProvider for RandomWalkProvider {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let mut state = self.state.lock();
        let price = self.advance(&mut state);
        let window: Vec<Decimal> = state.history.iter().copied().collect();

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
            features: price_features(&window),
        })
    }

    async fn seek(&self, rounds_consumed: u64) -> Result<(), MarketError> {
        let mut state = self.state.lock();
        *state = Self::fresh_state(self.start_price, self.seed);
        for _ in 0..rounds_consumed {
            self.advance(&mut state);
        }
        Ok(())
    }
}
