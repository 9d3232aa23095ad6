//! Configuration for the arena.
//!
//! Loaded from a TOML file, then overridden by environment variables and
//! CLI arguments, then validated. Every field has a default so an empty file
//! (or no file at all) yields a runnable demo session with mock agents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::dispatch::RetryPolicy;

/// Slack added to the retry budget for the default round deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Top-level configuration for an arena session.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Logging level.
    pub log_level: String,

    /// Session parameters (instrument, cadence, limits).
    pub session: SessionConfig,

    /// Paper execution parameters.
    pub execution: ExecutionConfig,

    /// Risk limits applied to every participant.
    pub risk: RiskConfig,

    /// Dispatcher parameters (timeouts, retry, rate limiting).
    pub dispatch: DispatchConfig,

    /// Checkpoint and results locations.
    pub persistence: PersistenceConfig,

    /// Competing agents.
    pub participants: Vec<ParticipantConfig>,
}

/// Session cadence and termination limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Instrument symbol shared by all participants.
    pub symbol: String,

    /// Time between round starts.
    pub round_interval: Duration,

    /// Stop with FINISHED after this many rounds.
    pub max_rounds: Option<u64>,

    /// Stop with FINISHED after this much wall-clock time.
    pub max_duration: Option<Duration>,

    /// Paper capital each participant starts with.
    pub starting_capital: Decimal,

    /// Write a checkpoint every K rounds.
    pub checkpoint_every: u64,

    /// Wall-clock budget for one round's dispatch fan-out.
    /// Defaults to the full retry budget of the slowest adapter plus 5 s,
    /// capped at the round interval.
    pub round_deadline: Option<Duration>,

    /// Consecutive market snapshot failures tolerated before FAILED.
    pub max_snapshot_failures: u32,
}

impl SessionConfig {
    /// Deadline handed to the dispatcher each round.
    pub fn effective_deadline(&self, retry: &RetryPolicy, adapter_timeout: Duration) -> Duration {
        self.round_deadline.unwrap_or_else(|| {
            (retry.budget(adapter_timeout) + DEADLINE_GRACE).min(self.round_interval)
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            round_interval: Duration::from_secs(180),
            max_rounds: None,
            max_duration: None,
            starting_capital: dec!(100),
            checkpoint_every: 1,
            round_deadline: None,
            max_snapshot_failures: 3,
        }
    }
}

/// Paper execution parameters.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Price slippage as a fraction (0.001 = 0.1%).
    pub slippage: Decimal,

    /// Commission charged on notional as a fraction.
    pub commission_rate: Decimal,

    /// Minimum BUY order value in quote currency.
    pub min_order_size: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage: dec!(0.001),
            commission_rate: dec!(0.001),
            min_order_size: dec!(10),
        }
    }
}

/// Window over which cumulative loss is measured by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerScope {
    /// Loss accumulated since session start.
    #[default]
    Session,
    /// Loss accumulated since the start of the current UTC day.
    Daily,
}

impl BreakerScope {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "session" => Some(BreakerScope::Session),
            "daily" | "day" => Some(BreakerScope::Daily),
            _ => None,
        }
    }
}

impl std::fmt::Display for BreakerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerScope::Session => write!(f, "session"),
            BreakerScope::Daily => write!(f, "daily"),
        }
    }
}

/// Risk limits enforced by the execution engine.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Largest `position_size` a BUY may request.
    pub max_position_fraction: Decimal,

    /// Cumulative loss, as a fraction of starting capital, that halts new BUYs.
    pub max_cumulative_loss_fraction: Decimal,

    /// Window for the cumulative loss measurement.
    pub breaker_scope: BreakerScope,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: dec!(0.5),
            max_cumulative_loss_fraction: dec!(0.05),
            breaker_scope: BreakerScope::Session,
        }
    }
}

/// Dispatcher parameters.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-attempt adapter timeout.
    pub timeout: Duration,

    /// Total attempts per adapter call (1 = no retry).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff growth factor between retries.
    pub multiplier: f64,

    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,

    /// Token bucket rate per adapter.
    pub calls_per_minute: u32,

    /// Consecutive failed rounds after which a participant is marked degraded.
    pub degraded_after_failures: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(8000),
            calls_per_minute: 100,
            degraded_after_failures: 5,
        }
    }
}

/// Checkpoint and results locations.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory for round checkpoints.
    pub checkpoint_dir: PathBuf,

    /// Directory for final results export.
    pub results_dir: PathBuf,

    /// Checkpoints retained per session (0 = keep all).
    pub keep_last: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            results_dir: PathBuf::from("data/results"),
            keep_last: 0,
        }
    }
}

/// Which adapter implementation backs a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// Rule-based simulated agent.
    Mock,
    /// OpenAI-compatible chat completions endpoint.
    Http,
}

impl AgentKind {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(AgentKind::Mock),
            "http" | "openai" | "llm" => Some(AgentKind::Http),
            _ => None,
        }
    }
}

/// One competing agent.
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// Unique participant id.
    pub id: String,

    /// Adapter implementation.
    pub kind: AgentKind,

    /// Mock strategy name.
    pub strategy: String,

    /// Mock simulated latency.
    pub latency: Duration,

    /// Mock RNG seed.
    pub seed: u64,

    /// HTTP base URL (e.g. `https://api.openai.com/v1`).
    pub endpoint: Option<String>,

    /// HTTP model name.
    pub model: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,

    /// API key, resolved from `api_key_env`. Never read from the TOML file.
    pub api_key: Option<String>,

    pub temperature: f64,

    pub max_tokens: u32,

    /// Overrides `dispatch.timeout` for this participant.
    pub timeout: Option<Duration>,

    /// Overrides `dispatch.calls_per_minute` for this participant.
    pub calls_per_minute: Option<u32>,
}

impl ParticipantConfig {
    /// A mock participant with the given strategy.
    pub fn mock(id: &str, strategy: &str, latency_ms: u64, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            kind: AgentKind::Mock,
            strategy: strategy.to_string(),
            latency: Duration::from_millis(latency_ms),
            seed,
            endpoint: None,
            model: None,
            api_key_env: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
            timeout: None,
            calls_per_minute: None,
        }
    }
}

/// The four simulated agents used when no participants are configured.
fn default_participants() -> Vec<ParticipantConfig> {
    vec![
        ParticipantConfig::mock("mock-conservative", "conservative", 150, 1),
        ParticipantConfig::mock("mock-aggressive", "aggressive", 80, 2),
        ParticipantConfig::mock("mock-trend", "trend_following", 120, 3),
        ParticipantConfig::mock("mock-random", "random", 100, 4),
    ]
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            session: SessionConfig::default(),
            execution: ExecutionConfig::default(),
            risk: RiskConfig::default(),
            dispatch: DispatchConfig::default(),
            persistence: PersistenceConfig::default(),
            participants: default_participants(),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Self::try_from(file)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ARENA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(symbol) = std::env::var("ARENA_SYMBOL") {
            self.session.symbol = symbol;
        }
        if let Ok(secs) = std::env::var("ARENA_ROUND_INTERVAL_SECS")
            && let Ok(secs) = secs.parse::<u64>()
        {
            self.session.round_interval = Duration::from_secs(secs);
        }
        if let Ok(rounds) = std::env::var("ARENA_MAX_ROUNDS")
            && let Ok(rounds) = rounds.parse::<u64>()
        {
            self.session.max_rounds = Some(rounds);
        }
        if let Ok(dir) = std::env::var("ARENA_CHECKPOINT_DIR") {
            self.persistence.checkpoint_dir = PathBuf::from(dir);
        }

        // API keys are only ever taken from the environment
        for participant in &mut self.participants {
            if let Some(var) = &participant.api_key_env
                && let Ok(key) = std::env::var(var)
            {
                participant.api_key = Some(key);
            }
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(
        &mut self,
        symbol: Option<String>,
        max_rounds: Option<u64>,
        interval_secs: Option<u64>,
    ) {
        if let Some(symbol) = symbol
            && !symbol.is_empty()
        {
            self.session.symbol = symbol;
        }

        if let Some(rounds) = max_rounds {
            self.session.max_rounds = Some(rounds);
        }

        if let Some(secs) = interval_secs {
            self.session.round_interval = Duration::from_secs(secs);
        }
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        // Session
        if self.session.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if self.session.round_interval.is_zero() {
            bail!("round_interval_secs must be positive");
        }
        if self.session.starting_capital <= Decimal::ZERO {
            bail!("starting_capital must be positive");
        }
        if self.session.checkpoint_every == 0 {
            bail!("checkpoint_every must be at least 1");
        }
        if self.session.round_deadline.is_some_and(|d| d.is_zero()) {
            bail!("round_deadline_secs must be positive");
        }
        if self.session.max_snapshot_failures == 0 {
            bail!("max_snapshot_failures must be at least 1");
        }

        // Execution
        if self.execution.slippage < Decimal::ZERO || self.execution.slippage >= Decimal::ONE {
            bail!("slippage must be in [0, 1)");
        }
        if self.execution.commission_rate < Decimal::ZERO
            || self.execution.commission_rate >= Decimal::ONE
        {
            bail!("commission_rate must be in [0, 1)");
        }
        if self.execution.min_order_size < Decimal::ZERO {
            bail!("min_order_size must not be negative");
        }

        // Risk
        if self.risk.max_position_fraction <= Decimal::ZERO
            || self.risk.max_position_fraction > Decimal::ONE
        {
            bail!("max_position_fraction must be in (0, 1]");
        }
        if self.risk.max_cumulative_loss_fraction <= Decimal::ZERO
            || self.risk.max_cumulative_loss_fraction > Decimal::ONE
        {
            bail!("max_cumulative_loss_fraction must be in (0, 1]");
        }

        // Dispatch
        if self.dispatch.timeout.is_zero() {
            bail!("dispatch timeout must be positive");
        }
        if self.dispatch.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.dispatch.multiplier < 1.0 {
            bail!("backoff multiplier must be at least 1.0");
        }
        if self.dispatch.calls_per_minute == 0 {
            bail!("calls_per_minute must be at least 1");
        }

        // Participants
        if self.participants.is_empty() {
            bail!("At least one participant must be configured");
        }
        let mut seen = HashSet::new();
        for participant in &self.participants {
            if participant.id.trim().is_empty() {
                bail!("participant id must not be empty");
            }
            if !seen.insert(participant.id.as_str()) {
                bail!("duplicate participant id: {}", participant.id);
            }
            if participant.kind == AgentKind::Http {
                if participant.endpoint.is_none() {
                    bail!("http participant {} requires an endpoint", participant.id);
                }
                if participant.model.is_none() {
                    bail!("http participant {} requires a model", participant.id);
                }
            }
            if participant.calls_per_minute == Some(0) {
                bail!("participant {} calls_per_minute must be at least 1", participant.id);
            }
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    session: SessionToml,
    #[serde(default)]
    execution: ExecutionToml,
    #[serde(default)]
    risk: RiskToml,
    #[serde(default)]
    dispatch: DispatchToml,
    #[serde(default)]
    persistence: PersistenceToml,
    #[serde(default)]
    participants: Vec<ParticipantToml>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SessionToml {
    symbol: String,
    round_interval_secs: u64,
    max_rounds: Option<u64>,
    max_duration_secs: Option<u64>,
    starting_capital: f64,
    checkpoint_every: u64,
    round_deadline_secs: Option<u64>,
    max_snapshot_failures: u32,
}

impl Default for SessionToml {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            round_interval_secs: 180,
            max_rounds: None,
            max_duration_secs: None,
            starting_capital: 100.0,
            checkpoint_every: 1,
            round_deadline_secs: None,
            max_snapshot_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ExecutionToml {
    slippage: f64,
    commission_rate: f64,
    min_order_size: f64,
}

impl Default for ExecutionToml {
    fn default() -> Self {
        Self {
            slippage: 0.001,
            commission_rate: 0.001,
            min_order_size: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RiskToml {
    max_position_fraction: f64,
    max_cumulative_loss_fraction: f64,
    breaker_scope: String,
}

impl Default for RiskToml {
    fn default() -> Self {
        Self {
            max_position_fraction: 0.5,
            max_cumulative_loss_fraction: 0.05,
            breaker_scope: "session".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DispatchToml {
    timeout_secs: u64,
    max_attempts: u32,
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    calls_per_minute: u32,
    degraded_after_failures: u32,
}

impl Default for DispatchToml {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 8000,
            calls_per_minute: 100,
            degraded_after_failures: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PersistenceToml {
    checkpoint_dir: String,
    results_dir: String,
    keep_last: usize,
}

impl Default for PersistenceToml {
    fn default() -> Self {
        Self {
            checkpoint_dir: "data/checkpoints".to_string(),
            results_dir: "data/results".to_string(),
            keep_last: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ParticipantToml {
    id: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default = "default_latency_ms")]
    latency_ms: u64,
    #[serde(default)]
    seed: u64,
    endpoint: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    timeout_secs: Option<u64>,
    calls_per_minute: Option<u32>,
}

fn default_kind() -> String {
    "mock".to_string()
}

fn default_strategy() -> String {
    "random".to_string()
}

fn default_latency_ms() -> u64 {
    100
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

/// Convert a TOML float to Decimal, rejecting NaN, infinities and
/// magnitudes Decimal cannot hold.
fn f64_to_decimal(field: &str, val: f64) -> Result<Decimal> {
    Decimal::try_from(val).with_context(|| format!("{} is not a representable decimal: {}", field, val))
}

impl TryFrom<TomlConfig> for ArenaConfig {
    type Error = anyhow::Error;

    fn try_from(toml: TomlConfig) -> Result<Self> {
        let Some(breaker_scope) = BreakerScope::from_str(&toml.risk.breaker_scope) else {
            bail!("unknown breaker_scope: {}", toml.risk.breaker_scope);
        };

        let participants = if toml.participants.is_empty() {
            default_participants()
        } else {
            toml.participants
                .into_iter()
                .map(|p| {
                    let Some(kind) = AgentKind::from_str(&p.kind) else {
                        bail!("unknown participant kind {:?} for {}", p.kind, p.id);
                    };
                    Ok(ParticipantConfig {
                        id: p.id,
                        kind,
                        strategy: p.strategy,
                        latency: Duration::from_millis(p.latency_ms),
                        seed: p.seed,
                        endpoint: p.endpoint,
                        model: p.model,
                        api_key_env: p.api_key_env,
                        api_key: None, // Set via env var
                        temperature: p.temperature,
                        max_tokens: p.max_tokens,
                        timeout: p.timeout_secs.map(Duration::from_secs),
                        calls_per_minute: p.calls_per_minute,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            log_level: toml.general.log_level,
            session: SessionConfig {
                symbol: toml.session.symbol,
                round_interval: Duration::from_secs(toml.session.round_interval_secs),
                max_rounds: toml.session.max_rounds,
                max_duration: toml.session.max_duration_secs.map(Duration::from_secs),
                starting_capital: f64_to_decimal("starting_capital", toml.session.starting_capital)?,
                checkpoint_every: toml.session.checkpoint_every,
                round_deadline: toml.session.round_deadline_secs.map(Duration::from_secs),
                max_snapshot_failures: toml.session.max_snapshot_failures,
            },
            execution: ExecutionConfig {
                slippage: f64_to_decimal("slippage", toml.execution.slippage)?,
                commission_rate: f64_to_decimal("commission_rate", toml.execution.commission_rate)?,
                min_order_size: f64_to_decimal("min_order_size", toml.execution.min_order_size)?,
            },
            risk: RiskConfig {
                max_position_fraction: f64_to_decimal("max_position_fraction", toml.risk.max_position_fraction)?,
                max_cumulative_loss_fraction: f64_to_decimal(
                    "max_cumulative_loss_fraction",
                    toml.risk.max_cumulative_loss_fraction,
                )?,
                breaker_scope,
            },
            dispatch: DispatchConfig {
                timeout: Duration::from_secs(toml.dispatch.timeout_secs),
                max_attempts: toml.dispatch.max_attempts,
                base_delay: Duration::from_millis(toml.dispatch.base_delay_ms),
                multiplier: toml.dispatch.multiplier,
                max_delay: Duration::from_millis(toml.dispatch.max_delay_ms),
                calls_per_minute: toml.dispatch.calls_per_minute,
                degraded_after_failures: toml.dispatch.degraded_after_failures,
            },
            persistence: PersistenceConfig {
                checkpoint_dir: PathBuf::from(toml.persistence.checkpoint_dir),
                results_dir: PathBuf::from(toml.persistence.results_dir),
                keep_last: toml.persistence.keep_last,
            },
            participants,
        })
    }
}
