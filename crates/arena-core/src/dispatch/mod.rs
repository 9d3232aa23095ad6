//! Concurrent decision dispatch.
//!
//! One task per participant per round, all joined against a shared
//! deadline. Each task:
//!
//! 1. waits on its adapter's token bucket
//! 2. calls the adapter under the per-adapter timeout
//! 3. retries transient failures with exponential backoff
//! 4. validates the raw output
//!
//! A task still running at the deadline is aborted and resolved to
//! [`DispatchError::DeadlineExceeded`]. No task can delay or fail another.

pub mod rate_limit;
pub mod retry;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use arena_common::ParticipantId;

use crate::adapter::{AdapterError, AgentAdapter, AgentContext};
use crate::portfolio::{AccountState, CallSample};
use crate::types::Decision;
use crate::validator::{DecisionValidator, ValidationError};

pub use rate_limit::TokenBucket;
pub use retry::RetryPolicy;

/// Why a participant produced no decision this round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("adapter failed after {attempts} attempt(s): {error}")]
    Adapter { error: AdapterError, attempts: u32 },

    #[error("invalid output: {0}")]
    Validation(#[from] ValidationError),

    #[error("round deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
}

/// Everything needed to query one participant.
pub struct DispatchTarget {
    pub participant: ParticipantId,
    pub adapter: Arc<dyn AgentAdapter>,
    pub limiter: Arc<TokenBucket>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub context: AgentContext,
    /// Account state handed to the validator.
    pub account: AccountState,
}

/// Resolution of one participant's dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: Result<Decision, DispatchError>,
    pub sample: CallSample,
}

/// Fans a round out to every participant.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    retry: RetryPolicy,
    validator: DecisionValidator,
}

impl Dispatcher {
    pub fn new(retry: RetryPolicy, validator: DecisionValidator) -> Self {
        Self { retry, validator }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Query every target concurrently and wait at most `deadline`.
    ///
    /// Always returns exactly one result per target.
    pub async fn dispatch(
        &self,
        targets: Vec<DispatchTarget>,
        deadline: Duration,
    ) -> BTreeMap<ParticipantId, DispatchResult> {
        let started = Instant::now();
        let deadline_at = started + deadline;

        let mut set = JoinSet::new();
        let mut task_owner = HashMap::new();
        let mut attempt_counters = Vec::with_capacity(targets.len());

        for target in targets {
            let attempts = Arc::new(AtomicU32::new(0));
            attempt_counters.push((target.participant.clone(), attempts.clone()));

            let participant = target.participant.clone();
            let handle = set.spawn(run_target(
                target,
                self.retry.clone(),
                self.validator.clone(),
                attempts,
            ));
            task_owner.insert(handle.id(), participant);
        }

        let mut results = BTreeMap::new();
        loop {
            match tokio::time::timeout_at(deadline_at, set.join_next_with_id()).await {
                Ok(Some(Ok((_, (participant, result))))) => {
                    results.insert(participant, result);
                }
                Ok(Some(Err(join_err))) => {
                    if let Some(participant) = task_owner.get(&join_err.id()) {
                        error!(participant = %participant, error = %join_err, "Dispatch task failed");
                        results.insert(
                            participant.clone(),
                            DispatchResult {
                                outcome: Err(DispatchError::TaskFailed(join_err.to_string())),
                                sample: CallSample::new(started.elapsed(), 0, Duration::ZERO),
                            },
                        );
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = set.len(),
                        deadline_ms = deadline.as_millis() as u64,
                        "Round deadline reached, cancelling pending adapter calls"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        for (participant, attempts) in attempt_counters {
            results.entry(participant).or_insert_with(|| DispatchResult {
                outcome: Err(DispatchError::DeadlineExceeded(deadline)),
                sample: CallSample::new(
                    started.elapsed(),
                    attempts.load(Ordering::Relaxed),
                    Duration::ZERO,
                ),
            });
        }

        results
    }
}

async fn run_target(
    target: DispatchTarget,
    retry: RetryPolicy,
    validator: DecisionValidator,
    attempts: Arc<AtomicU32>,
) -> (ParticipantId, DispatchResult) {
    let DispatchTarget {
        participant,
        adapter,
        limiter,
        timeout,
        context,
        account,
    } = target;

    let started = Instant::now();
    let mut waited = Duration::ZERO;
    let mut attempt = 0;

    let outcome = loop {
        attempt += 1;
        attempts.store(attempt, Ordering::Relaxed);
        waited += limiter.acquire().await;

        let result = match tokio::time::timeout(timeout, adapter.decide(&context)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(timeout)),
        };

        match result {
            Ok(raw) => break validator.validate(&raw, &account).map_err(DispatchError::from),
            Err(err) => match retry.next_delay(attempt, &err) {
                Some(delay) => {
                    warn!(
                        participant = %participant,
                        adapter = adapter.name(),
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Adapter call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    break Err(DispatchError::Adapter {
                        error: err,
                        attempts: attempt,
                    });
                }
            },
        }
    };

    let latency = started.elapsed();
    debug!(
        participant = %participant,
        attempts = attempt,
        latency_ms = latency.as_millis() as u64,
        ok = outcome.is_ok(),
        "Dispatch resolved"
    );

    (
        participant,
        DispatchResult {
            outcome,
            sample: CallSample::new(latency, attempt, waited),
        },
    )
}
