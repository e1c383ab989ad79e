// Error Types
//
// Error taxonomy for admission, process supervision and telemetry.

use crate::types::{SessionId, SessionState};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("mining consent has not been granted")]
    ConsentRequired,

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("{coin} on {pool} is already being mined to this wallet by session {existing}")]
    DuplicateSession {
        coin: String,
        pool: String,
        existing: SessionId,
    },

    #[error("thread budget exceeded: {requested} threads requested, budget is {budget}")]
    BudgetExceeded { requested: u32, budget: u32 },

    #[error("miner binary not found: {}", .0.display())]
    BinaryMissing(PathBuf),

    #[error("miner binary checksum mismatch: {}", .0.display())]
    BinaryChecksumMismatch(PathBuf),

    #[error("miner binary is not executable: {}", .0.display())]
    BinaryNotExecutable(PathBuf),

    #[error("failed to spawn miner: {reason}")]
    SpawnFailed {
        session_id: Option<SessionId>,
        reason: String,
    },

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error("miner exited unexpectedly: {0}")]
    UnexpectedExit(String),

    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("miner process {pid} could not be confirmed terminated")]
    OrphanedProcess { pid: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MinerError {
    /// Stable machine-readable name for the presentation layer
    pub fn kind(&self) -> &'static str {
        match self {
            MinerError::ConsentRequired => "consent_required",
            MinerError::InvalidConfig(_) => "invalid_config",
            MinerError::DuplicateSession { .. } => "duplicate_session",
            MinerError::BudgetExceeded { .. } => "budget_exceeded",
            MinerError::BinaryMissing(_) => "binary_missing",
            MinerError::BinaryChecksumMismatch(_) => "binary_checksum_mismatch",
            MinerError::BinaryNotExecutable(_) => "binary_not_executable",
            MinerError::SpawnFailed { .. } => "spawn_failed",
            MinerError::NotFound(_) => "not_found",
            MinerError::InvalidTransition { .. } => "invalid_transition",
            MinerError::UnexpectedExit(_) => "unexpected_exit",
            MinerError::TelemetryUnavailable(_) => "telemetry_unavailable",
            MinerError::OrphanedProcess { .. } => "orphaned_process",
            MinerError::Io(_) => "io",
            MinerError::Json(_) => "json",
            MinerError::Http(_) => "http",
        }
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;
