//! Agent adapter abstraction.
//!
//! Every participant is backed by one `AgentAdapter`. The arena only needs
//! a single capability from it: given the round context, return raw output
//! (or fail). Implementations are selected when the session is built.
//!
//! ## Implementations
//!
//! - `MockAdapter`: rule-based simulated agent with seeded randomness
//! - `ScriptedAdapter`: replays predetermined responses, delays and errors
//! - `HttpChatAdapter`: OpenAI-compatible chat completions endpoint

pub mod http;
pub mod mock;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use arena_common::ParticipantId;

use crate::config::{AgentKind, ParticipantConfig};
use crate::types::RawOutput;

pub use http::{HttpChatAdapter, HttpChatConfig};
pub use mock::{MockAdapter, MockStrategy};
pub use scripted::{ScriptStep, ScriptedAdapter};

/// Adapter failure. Transient variants are retried by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Adapter timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    /// Whether the dispatcher may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Timeout(_) | AdapterError::RateLimited { .. } | AdapterError::Transient(_)
        )
    }
}

/// Input handed to an adapter for one round.
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub session_id: Uuid,
    pub round: u64,
    pub participant: ParticipantId,
    /// Opaque payload from the context builder, forwarded unmodified.
    pub payload: serde_json::Value,
}

/// A decision agent.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Produce raw output for one round.
    async fn decide(&self, ctx: &AgentContext) -> Result<RawOutput, AdapterError>;
}

/// Build the adapter described by `config`.
pub fn from_config(config: &ParticipantConfig) -> Result<Arc<dyn AgentAdapter>> {
    match config.kind {
        AgentKind::Mock => {
            let Ok(strategy) = config.strategy.parse::<MockStrategy>() else {
                bail!("unknown mock strategy {:?} for {}", config.strategy, config.id);
            };
            Ok(Arc::new(MockAdapter::new(
                &config.id,
                strategy,
                config.latency,
                config.seed,
            )))
        }
        AgentKind::Http => {
            let (Some(endpoint), Some(model)) = (&config.endpoint, &config.model) else {
                bail!("http participant {} requires endpoint and model", config.id);
            };
            let adapter = HttpChatAdapter::new(HttpChatConfig {
                name: config.id.clone(),
                endpoint: endpoint.clone(),
                model: model.clone(),
                api_key: config.api_key.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                request_timeout: config.timeout.unwrap_or(Duration::from_secs(60)),
            })?;
            Ok(Arc::new(adapter))
        }
    }
}
