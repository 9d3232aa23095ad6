//! Final results export.
//!
//! Writes two files per session into the results directory:
//! - `{session_id}.json`: summary, final leaderboard and every round
//! - `{session_id}_leaderboard.csv`: final leaderboard, one row per participant

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::arena::session::SessionSummary;
use crate::leaderboard::LeaderboardEntry;

/// CSV row for the exported leaderboard.
#[derive(Debug, Serialize)]
struct LeaderboardRow<'a> {
    rank: usize,
    participant: &'a str,
    account_value: Decimal,
    return_pct: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    trades: u32,
    win_rate: Decimal,
    errors: u64,
    fallbacks: u64,
    degraded: bool,
    avg_latency_ms: u64,
}

impl<'a> From<&'a LeaderboardEntry> for LeaderboardRow<'a> {
    fn from(e: &'a LeaderboardEntry) -> Self {
        Self {
            rank: e.rank,
            participant: e.participant.as_str(),
            account_value: e.account_value.round_dp(8),
            return_pct: e.return_pct.round_dp(4),
            realized_pnl: e.realized_pnl.round_dp(8),
            unrealized_pnl: e.unrealized_pnl.round_dp(8),
            trades: e.trades,
            win_rate: e.win_rate.round_dp(4),
            errors: e.errors,
            fallbacks: e.fallbacks,
            degraded: e.degraded,
            avg_latency_ms: e.avg_latency_ms,
        }
    }
}

/// Final leaderboard as CSV bytes, header first. Empty when no round completed.
fn leaderboard_csv(summary: &SessionSummary) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if let Some(leaderboard) = &summary.leaderboard {
        for entry in &leaderboard.entries {
            writer.serialize(LeaderboardRow::from(entry))?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finish CSV: {}", e.error()))
}

/// Paths written by [`ResultsExporter::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub json: PathBuf,
    pub leaderboard_csv: PathBuf,
}

/// Writes session results to a directory.
#[derive(Debug, Clone)]
pub struct ResultsExporter {
    output_dir: PathBuf,
}

impl ResultsExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn export(&self, summary: &SessionSummary) -> Result<ExportedFiles> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create results directory: {:?}", self.output_dir))?;

        let json_path = self.output_dir.join(format!("{}.json", summary.session_id));
        let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
        tokio::fs::write(&json_path, json)
            .await
            .with_context(|| format!("Failed to write results: {:?}", json_path))?;

        let csv_path = self
            .output_dir
            .join(format!("{}_leaderboard.csv", summary.session_id));
        let csv = leaderboard_csv(summary)?;
        tokio::fs::write(&csv_path, csv)
            .await
            .with_context(|| format!("Failed to write CSV file: {:?}", csv_path))?;

        info!(
            json = ?json_path,
            csv = ?csv_path,
            rounds = summary.rounds_completed,
            "Results exported"
        );

        Ok(ExportedFiles {
            json: json_path,
            leaderboard_csv: csv_path,
        })
    }
}
