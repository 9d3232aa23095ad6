//! Durable session snapshots for crash-resume.
//!
//! A checkpoint is taken at a round boundary and holds everything needed to
//! continue the session: ledgers, stats, round history and the round counter.
//!
//! ## File layout
//!
//! ```text
//! {checkpoint_dir}/{session_id}/round-00000001.json
//! {checkpoint_dir}/{session_id}/round-00000002.json
//! ```
//!
//! Files are written to a temporary name and renamed into place, so a crash
//! mid-write never leaves a truncated checkpoint behind.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use arena_common::{ParticipantId, SessionStatus};

use crate::arena::session::RoundRecord;
use crate::portfolio::{ParticipantStats, PortfolioLedger};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "round-";
const FILE_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".json.tmp";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Session-level fields of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub symbol: String,
    pub round_interval_ms: u64,
    pub started_at: DateTime<Utc>,
    /// Rounds completed.
    pub round: u64,
    pub status: SessionStatus,
    /// Time spent running (paused time excluded).
    pub active_ms: u64,
}

/// One participant's state in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub ledger: PortfolioLedger,
    pub stats: ParticipantStats,
}

/// Full, consistent snapshot of a session at a round boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub session: SessionSnapshot,
    pub participants: Vec<ParticipantSnapshot>,
    pub history: Vec<RoundRecord>,
    /// Execution and risk parameters the ledgers were produced under.
    pub config_fingerprint: String,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantSnapshot> {
        self.participants.iter().find(|p| &p.id == id)
    }

    fn check_version(self) -> Result<Self, CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(self)
    }
}

/// Durable storage for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` as the state after `round`. Returns where it was written.
    async fn save(
        &self,
        session_id: Uuid,
        round: u64,
        checkpoint: &Checkpoint,
    ) -> Result<String, CheckpointError>;

    /// Most recent checkpoint for the session, if any.
    async fn load_latest(&self, session_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError>;
}

// =============================================================================
// File store
// =============================================================================

/// JSON files, one per checkpointed round.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
    /// Files kept per session (0 = keep all).
    keep_last: usize,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>, keep_last: usize) -> Self {
        Self {
            root: root.into(),
            keep_last,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn file_name(round: u64) -> String {
        format!("{FILE_PREFIX}{round:08}{FILE_SUFFIX}")
    }

    fn parse_round(name: &str) -> Option<u64> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Checkpointed rounds for a session, ascending.
    pub async fn list_rounds(&self, session_id: Uuid) -> Result<Vec<u64>, CheckpointError> {
        let dir = self.session_dir(session_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rounds = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(round) = entry.file_name().to_str().and_then(Self::parse_round) {
                rounds.push(round);
            }
        }
        rounds.sort_unstable();
        Ok(rounds)
    }

    async fn prune(&self, session_id: Uuid) -> Result<(), CheckpointError> {
        if self.keep_last == 0 {
            return Ok(());
        }
        let rounds = self.list_rounds(session_id).await?;
        if rounds.len() <= self.keep_last {
            return Ok(());
        }

        let dir = self.session_dir(session_id);
        for round in &rounds[..rounds.len() - self.keep_last] {
            let path = dir.join(Self::file_name(*round));
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to prune checkpoint");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        session_id: Uuid,
        round: u64,
        checkpoint: &Checkpoint,
    ) -> Result<String, CheckpointError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(checkpoint)?;
        let path = dir.join(Self::file_name(round));
        let temp = dir.join(format!("{FILE_PREFIX}{round:08}{TEMP_SUFFIX}"));

        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &path).await?;
        debug!(path = ?path, bytes = json.len(), "Checkpoint saved");

        self.prune(session_id).await?;
        Ok(path.display().to_string())
    }

    async fn load_latest(&self, session_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(&round) = self.list_rounds(session_id).await?.last() else {
            return Ok(None);
        };

        let path = self.session_dir(session_id).join(Self::file_name(round));
        let bytes = tokio::fs::read(&path).await?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.check_version().map(Some)
    }
}

// =============================================================================
// Memory store
// =============================================================================

/// In-process store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<Uuid, BTreeMap<u64, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpointed rounds for a session, ascending.
    pub fn rounds(&self, session_id: Uuid) -> Vec<u64> {
        self.sessions
            .lock()
            .get(&session_id)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, session_id: Uuid, round: u64) -> Option<Checkpoint> {
        self.sessions
            .lock()
            .get(&session_id)
            .and_then(|s| s.get(&round).cloned())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        session_id: Uuid,
        round: u64,
        checkpoint: &Checkpoint,
    ) -> Result<String, CheckpointError> {
        self.sessions
            .lock()
            .entry(session_id)
            .or_default()
            .insert(round, checkpoint.clone());
        Ok(format!("memory://{session_id}/{round}"))
    }

    async fn load_latest(&self, session_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError> {
        let latest = self
            .sessions
            .lock()
            .get(&session_id)
            .and_then(|s| s.values().next_back().cloned());
        latest.map(Checkpoint::check_version).transpose()
    }
}
