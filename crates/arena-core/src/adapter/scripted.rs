//! Deterministic adapter that replays a script.
//!
//! Resolution order for each call: the next queued step (consumed once),
//! then the step registered for the context's round, then the default.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AdapterError, AgentAdapter, AgentContext};
use crate::types::RawOutput;

/// One scripted reaction.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer immediately.
    Respond(RawOutput),
    /// Answer after a delay.
    Delayed(Duration, RawOutput),
    /// Fail with the given error.
    Fail(AdapterError),
    /// Never answer.
    Hang,
}

impl ScriptStep {
    /// Answer with JSON text.
    pub fn json(value: serde_json::Value) -> Self {
        ScriptStep::Respond(RawOutput::Text(value.to_string()))
    }
}

/// Adapter driven by a script of steps.
pub struct ScriptedAdapter {
    name: String,
    queue: Mutex<VecDeque<ScriptStep>>,
    by_round: HashMap<u64, ScriptStep>,
    default: ScriptStep,
    calls: AtomicU64,
}

impl ScriptedAdapter {
    /// An adapter that answers HOLD unless told otherwise.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            by_round: HashMap::new(),
            default: ScriptStep::json(serde_json::json!({
                "action": "HOLD",
                "confidence": 0.5,
                "reasoning": "scripted default"
            })),
            calls: AtomicU64::new(0),
        }
    }

    /// Step used when nothing more specific applies.
    pub fn otherwise(mut self, step: ScriptStep) -> Self {
        self.default = step;
        self
    }

    /// Step used whenever the context is for `round`.
    pub fn on_round(mut self, round: u64, step: ScriptStep) -> Self {
        self.by_round.insert(round, step);
        self
    }

    /// Steps consumed by the next calls, in order.
    pub fn then(self, step: ScriptStep) -> Self {
        self.queue.lock().push_back(step);
        self
    }

    /// Number of `decide` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, ctx: &AgentContext) -> Result<RawOutput, AdapterError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let step = self
            .queue
            .lock()
            .pop_front()
            .or_else(|| self.by_round.get(&ctx.round).cloned())
            .unwrap_or_else(|| self.default.clone());

        match step {
            ScriptStep::Respond(raw) => Ok(raw),
            ScriptStep::Delayed(delay, raw) => {
                tokio::time::sleep(delay).await;
                Ok(raw)
            }
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => {
                std::future::pending::<()>().await;
                Err(AdapterError::Timeout(Duration::MAX))
            }
        }
    }
}
