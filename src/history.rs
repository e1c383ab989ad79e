// Session History
//
// Finalized per-session records handed to durable storage when a session is
// removed. The core only writes; it never reads or aggregates history.

use crate::error::Result;
use crate::types::{SessionConfig, SessionId};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const HISTORY_FILE_NAME: &str = "history.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub session_id: SessionId,
    pub coin: String,
    pub symbol: String,
    pub pool: String,
    pub wallet: String,
    pub worker: String,
    pub algorithm: String,
    pub started_at: u64,
    pub ended_at: u64,
    pub duration_secs: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub avg_hashrate: f64,
}

impl HistoryRecord {
    pub fn new(
        session_id: &str,
        config: &SessionConfig,
        started_at: u64,
        ended_at: u64,
        accepted: u64,
        rejected: u64,
        avg_hashrate: f64,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            coin: config.coin_id.clone(),
            symbol: config.symbol.clone(),
            pool: config.pool_url.clone(),
            wallet: config.wallet.clone(),
            worker: config.worker.clone(),
            algorithm: config.algorithm.clone(),
            started_at,
            ended_at,
            duration_secs: ended_at.saturating_sub(started_at),
            accepted,
            rejected,
            avg_hashrate,
        }
    }
}

/// Durable storage collaborator
pub trait HistorySink: Send + Sync {
    fn record(&self, record: &HistoryRecord) -> Result<()>;
}

/// Discards records
#[derive(Debug, Default)]
pub struct NullHistory;

impl HistorySink for NullHistory {
    fn record(&self, _record: &HistoryRecord) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line
#[derive(Debug)]
pub struct JsonlHistorySink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for JsonlHistorySink {
    fn record(&self, record: &HistoryRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MinerKind, PerformancePreset, SessionRequest};
    use tempfile::TempDir;

    fn config() -> SessionConfig {
        let request = SessionRequest {
            coin_id: "raptoreum".into(),
            symbol: "RTM".into(),
            algorithm: "gr".into(),
            miner_kind: None,
            pool_url: "pool.example.com:3008".into(),
            wallet: "Rwallet".into(),
            worker: "".into(),
            preset: PerformancePreset::Max,
            threads_hint: 4,
        };
        SessionConfig::from_request(&request, "gr".into(), MinerKind::Xmrig, 4)
    }

    #[test]
    fn test_record_duration() {
        let record = HistoryRecord::new("s1", &config(), 100, 160, 5, 1, 1200.0);
        assert_eq!(record.duration_secs, 60);
        let backwards = HistoryRecord::new("s1", &config(), 200, 100, 0, 0, 0.0);
        assert_eq!(backwards.duration_secs, 0);
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlHistorySink::in_dir(dir.path());
        sink.record(&HistoryRecord::new("s1", &config(), 1, 2, 3, 0, 10.0))
            .unwrap();
        sink.record(&HistoryRecord::new("s2", &config(), 5, 9, 7, 1, 20.0))
            .unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let records: Vec<HistoryRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].session_id, "s2");
        assert_eq!(records[1].accepted, 7);
        assert_eq!(records[0].algorithm, "gr");
    }
}
