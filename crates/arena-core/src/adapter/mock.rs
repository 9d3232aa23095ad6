//! Rule-based simulated agents.
//!
//! Each call sleeps for the configured latency and then answers with a
//! JSON decision text, the way a language model would. Randomness is
//! derived from `(seed, round)` only, so a resumed session reproduces the
//! same answers for the same rounds.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use super::{AdapterError, AgentAdapter, AgentContext};
use crate::types::RawOutput;

/// Built-in trading personalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStrategy {
    /// Mostly HOLD, small positions.
    Conservative,
    /// Frequent trades, large positions.
    Aggressive,
    /// Uniform over actions.
    Random,
    /// Cycles BUY, HOLD, SELL.
    TrendFollowing,
}

impl std::str::FromStr for MockStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(MockStrategy::Conservative),
            "aggressive" => Ok(MockStrategy::Aggressive),
            "random" => Ok(MockStrategy::Random),
            "trend_following" | "trend-following" | "trend" => Ok(MockStrategy::TrendFollowing),
            _ => Err(format!("Unknown mock strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for MockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockStrategy::Conservative => write!(f, "conservative"),
            MockStrategy::Aggressive => write!(f, "aggressive"),
            MockStrategy::Random => write!(f, "random"),
            MockStrategy::TrendFollowing => write!(f, "trend_following"),
        }
    }
}

/// Simulated agent.
pub struct MockAdapter {
    name: String,
    strategy: MockStrategy,
    latency: Duration,
    seed: u64,
}

impl MockAdapter {
    pub fn new(name: &str, strategy: MockStrategy, latency: Duration, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            latency,
            seed,
        }
    }

    pub fn strategy(&self) -> MockStrategy {
        self.strategy
    }

    fn rng_for_round(&self, round: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ round.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Produce the decision JSON for `round`.
    pub fn answer(&self, round: u64) -> serde_json::Value {
        let mut rng = self.rng_for_round(round);

        // (hold, buy) cumulative weights, confidence range, size range
        let (action, confidence, size) = match self.strategy {
            MockStrategy::Conservative => (
                weighted_action(&mut rng, 0.7, 0.9),
                rng.random_range(0.5..0.7),
                rng.random_range(0.1..0.3),
            ),
            MockStrategy::Aggressive => (
                weighted_action(&mut rng, 0.3, 0.7),
                rng.random_range(0.7..0.9),
                rng.random_range(0.4..0.8),
            ),
            MockStrategy::Random => (
                weighted_action(&mut rng, 1.0 / 3.0, 2.0 / 3.0),
                rng.random_range(0.3..0.9),
                rng.random_range(0.2..0.6),
            ),
            MockStrategy::TrendFollowing => {
                let action = match round.saturating_sub(1) % 3 {
                    0 => "BUY",
                    1 => "HOLD",
                    _ => "SELL",
                };
                (action, rng.random_range(0.6..0.8), rng.random_range(0.3..0.5))
            }
        };
        let size = if action == "HOLD" { 0.0 } else { round2(size) };

        json!({
            "action": action,
            "confidence": round2(confidence),
            "position_size": size,
            "reasoning": format!("{} strategy: {}", self.strategy, action),
            "stop_loss": null,
            "take_profit": null,
        })
    }
}

fn weighted_action(rng: &mut StdRng, hold_below: f64, buy_below: f64) -> &'static str {
    let roll: f64 = rng.random();
    if roll < hold_below {
        "HOLD"
    } else if roll < buy_below {
        "BUY"
    } else {
        "SELL"
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[async_trait]
impl AgentAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, ctx: &AgentContext) -> Result<RawOutput, AdapterError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(RawOutput::Text(self.answer(ctx.round).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PortfolioLedger;
    use crate::validator::DecisionValidator;
    use arena_common::{Action, ParticipantId};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn ctx(round: u64) -> AgentContext {
        AgentContext {
            session_id: Uuid::nil(),
            round,
            participant: ParticipantId::from("mock"),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Aggressive".parse::<MockStrategy>(), Ok(MockStrategy::Aggressive));
        assert_eq!(
            "trend_following".parse::<MockStrategy>(),
            Ok(MockStrategy::TrendFollowing)
        );
        assert!("martingale".parse::<MockStrategy>().is_err());
    }

    #[test]
    fn test_answers_are_deterministic_per_round() {
        let a = MockAdapter::new("a", MockStrategy::Random, Duration::ZERO, 42);
        let b = MockAdapter::new("b", MockStrategy::Random, Duration::ZERO, 42);
        for round in 1..20 {
            assert_eq!(a.answer(round), b.answer(round));
        }
    }

    #[test]
    fn test_trend_following_cycle() {
        let adapter = MockAdapter::new("t", MockStrategy::TrendFollowing, Duration::ZERO, 0);
        assert_eq!(adapter.answer(1)["action"], "BUY");
        assert_eq!(adapter.answer(2)["action"], "HOLD");
        assert_eq!(adapter.answer(3)["action"], "SELL");
        assert_eq!(adapter.answer(4)["action"], "BUY");
        assert_eq!(adapter.answer(2)["position_size"], 0.0);
    }

    #[tokio::test]
    async fn test_answers_always_validate() {
        let validator = DecisionValidator::new();
        let account = PortfolioLedger::new(dec!(100)).account_state(dec!(50000));
        for strategy in [
            MockStrategy::Conservative,
            MockStrategy::Aggressive,
            MockStrategy::Random,
            MockStrategy::TrendFollowing,
        ] {
            let adapter = MockAdapter::new("m", strategy, Duration::ZERO, 7);
            for round in 1..50 {
                let raw = adapter.decide(&ctx(round)).await.unwrap();
                let decision = validator.validate(&raw, &account).unwrap();
                if decision.action == Action::Hold {
                    assert_eq!(decision.position_size, dec!(0));
                }
            }
        }
    }
}
