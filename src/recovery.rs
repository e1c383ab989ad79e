// Crash Recovery Store
//
// Single-slot record of the last session that entered Running. The record is
// cleared on clean shutdown, so finding one at startup means the previous run
// ended uncleanly. Nothing is ever restarted from it automatically.

use crate::config::APP_DIR_NAME;
use crate::error::Result;
use crate::supervisor::process::lock;
use crate::types::{current_timestamp, SessionConfig, SessionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const RECORD_FILE_NAME: &str = "session.lock";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Minimal description of a session, enough to offer resumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub session_id: SessionId,
    pub coin: String,
    pub symbol: String,
    pub algorithm: String,
    pub pool: String,
    pub wallet: String,
    pub worker: String,
    pub started_at: u64,
    pub supervisor_pid: u32,
}

impl RecoveryRecord {
    pub fn from_config(session_id: &str, config: &SessionConfig) -> Self {
        Self {
            session_id: session_id.to_string(),
            coin: config.coin_id.clone(),
            symbol: config.symbol.clone(),
            algorithm: config.algorithm.clone(),
            pool: config.pool_url.clone(),
            wallet: config.wallet.clone(),
            worker: config.worker.clone(),
            started_at: current_timestamp(),
            supervisor_pid: std::process::id(),
        }
    }
}

/// Persisted state layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrashRecoveryState {
    pub had_unclean_shutdown: bool,
    pub last_session: Option<RecoveryRecord>,
}

/// Clones share one write lock; temp files are unique per write, so even
/// separate stores on the same path never collide mid-rename.
#[derive(Debug, Clone)]
pub struct CrashRecoveryStore {
    path: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl CrashRecoveryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Store under `<data_dir>/session.lock`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(RECORD_FILE_NAME))
    }

    /// `<data_local_dir>/hashwarden/session.lock`
    pub fn default_location() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);
        Self::in_dir(&dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the single slot with `record`
    pub fn record(&self, record: &RecoveryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let state = CrashRecoveryState {
            had_unclean_shutdown: true,
            last_session: Some(record.clone()),
        };
        let body = serde_json::to_vec_pretty(&state)?;

        // Write-then-rename so a crash mid-write never leaves a torn record.
        let tmp = self.path.with_extension(format!(
            "lock.{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _guard = lock(&self.writes);
        fs::write(&tmp, body)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(session = %record.session_id, "recovery record written");
        Ok(())
    }

    /// Remove the record (clean shutdown)
    pub fn clear(&self) -> Result<()> {
        let _guard = lock(&self.writes);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("recovery record cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Inspect the slot at startup. Never starts anything.
    pub fn check(&self) -> CrashRecoveryState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return CrashRecoveryState::default(),
        };

        match serde_json::from_str::<CrashRecoveryState>(&content) {
            Ok(state) => {
                if let Some(last) = &state.last_session {
                    info!(
                        coin = %last.coin,
                        pool = %last.pool,
                        "unclean shutdown detected, previous session was still running"
                    );
                }
                CrashRecoveryState {
                    had_unclean_shutdown: true,
                    last_session: state.last_session,
                }
            }
            Err(e) => {
                // The file only exists while mining, so even a garbled one means unclean.
                warn!("unreadable recovery record: {}", e);
                CrashRecoveryState {
                    had_unclean_shutdown: true,
                    last_session: None,
                }
            }
        }
    }
}
