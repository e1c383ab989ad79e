// Shared Types
//
// Session configuration, lifecycle state and telemetry snapshot types shared
// by the supervisor, telemetry and session modules.

use crate::error::{MinerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque session identifier (UUID v4, never reused)
pub type SessionId = String;

/// Miner binary family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinerKind {
    Xmrig,
    CpuminerOpt,
}

/// Where a miner's metrics come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMode {
    Structured, // HTTP stats endpoint
    LogParse,   // console output only
}

impl MinerKind {
    pub fn telemetry_mode(self) -> TelemetryMode {
        match self {
            MinerKind::Xmrig => TelemetryMode::Structured,
            MinerKind::CpuminerOpt => TelemetryMode::LogParse,
        }
    }

    /// Executable file name without platform suffix
    pub fn binary_stem(self) -> &'static str {
        match self {
            MinerKind::Xmrig => "xmrig",
            MinerKind::CpuminerOpt => "cpuminer-opt",
        }
    }
}

/// Named CPU usage policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformancePreset {
    Eco,
    #[default]
    Balanced,
    Max,
}

impl PerformancePreset {
    /// Share of logical cores this preset may use
    pub fn core_factor(self) -> f64 {
        match self {
            PerformancePreset::Eco => 0.5,
            PerformancePreset::Balanced => 0.8,
            PerformancePreset::Max => 1.0,
        }
    }
}

/// Start request as received from the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub coin_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub miner_kind: Option<MinerKind>,
    pub pool_url: String,
    pub wallet: String,
    #[serde(default)]
    pub worker: String,
    #[serde(default)]
    pub preset: PerformancePreset,
    #[serde(default)]
    pub threads_hint: u32, // 0 = derive from budget
}

impl SessionRequest {
    /// Reject requests that cannot produce a usable miner command line
    pub fn validate(&self) -> Result<()> {
        check_field("coin", &self.coin_id, true)?;
        check_field("pool", &self.pool_url, true)?;
        check_field("wallet", &self.wallet, true)?;
        check_field("worker", &self.worker, false)?;
        check_field("algorithm", &self.algorithm, false)?;
        Ok(())
    }
}

fn check_field(name: &str, value: &str, required: bool) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        if required {
            return Err(MinerError::InvalidConfig(format!("missing {}", name)));
        }
        return Ok(());
    }
    // Values become separate argv entries; a leading dash would be read as a flag.
    if value.starts_with('-') {
        return Err(MinerError::InvalidConfig(format!("{} must not start with '-'", name)));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MinerError::InvalidConfig(format!("{} contains whitespace", name)));
    }
    Ok(())
}

/// Immutable session configuration snapshot taken at start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub coin_id: String,
    pub symbol: String,
    pub algorithm: String,
    pub miner_kind: MinerKind,
    pub pool_url: String,
    pub wallet: String,
    pub worker: String,
    pub preset: PerformancePreset,
    pub threads_hint: u32,
    pub created_at: u64,
}

impl SessionConfig {
    pub fn from_request(
        request: &SessionRequest,
        algorithm: String,
        miner_kind: MinerKind,
        threads: u32,
    ) -> Self {
        let symbol = if request.symbol.trim().is_empty() {
            request.coin_id.to_uppercase()
        } else {
            request.symbol.trim().to_string()
        };

        Self {
            coin_id: request.coin_id.trim().to_string(),
            symbol,
            algorithm,
            miner_kind,
            pool_url: request.pool_url.trim().to_string(),
            wallet: request.wallet.trim().to_string(),
            worker: request.worker.trim().to_string(),
            preset: request.preset,
            threads_hint: threads.max(1),
            created_at: current_timestamp(),
        }
    }

    /// (coin, pool, wallet) key used for duplicate detection
    pub fn identity_key(&self) -> (String, String, String) {
        (
            self.coin_id.to_lowercase(),
            normalize_pool(&self.pool_url),
            self.wallet.clone(),
        )
    }
}

/// Strip the scheme and trailing slash so `stratum+tcp://host:3333` and
/// `host:3333/` compare equal
pub fn normalize_pool(url: &str) -> String {
    let url = url.trim();
    let without_scheme = match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    };
    without_scheme.trim_end_matches('/').to_lowercase()
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Suspended,
    Stopping,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Suspended => "suspended",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }

    /// States in which exactly one OS process is attached
    pub fn has_live_process(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Suspended
        )
    }

    /// Allowed edges of the session state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Error)
                | (Running, Suspended)
                | (Running, Stopping)
                | (Running, Error)
                | (Suspended, Running)
                | (Suspended, Stopping)
                | (Suspended, Error)
                | (Error, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool connection phase as far as telemetry can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Connected,
    Subscribed,
    Authorized,
    #[default]
    Unknown,
}

/// How trustworthy the current stats are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

/// Latest telemetry snapshot for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub hashrate_current: f64, // H/s
    pub hashrate_avg60: Option<f64>,
    pub accepted: u64,
    pub rejected: u64,
    pub difficulty: Option<f64>,
    pub last_share_at: Option<u64>,
    pub uptime_secs: u64,
    pub connection: ConnectionPhase,
    pub confidence: Confidence,
    pub reason: String,
    pub last_error: Option<String>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            hashrate_current: 0.0,
            hashrate_avg60: None,
            accepted: 0,
            rejected: 0,
            difficulty: None,
            last_share_at: None,
            uptime_secs: 0,
            connection: ConnectionPhase::Unknown,
            confidence: Confidence::Unknown,
            reason: "no metrics received yet".to_string(),
            last_error: None,
        }
    }
}

/// What "suspended" actually did to the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendMode {
    PausedViaApi,    // miner paused its workers through its control API
    PausedViaSignal, // SIGSTOP to the process group
    TelemetryOnly,   // polling suppressed, process keeps mining
}

/// Point-in-time view of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub config: SessionConfig,
    pub state: SessionState,
    pub stats: SessionStats,
    pub pid: Option<u32>,
    pub started_at: Option<u64>,
    pub suspend_mode: Option<SuspendMode>,
    pub error: Option<String>,
    pub diagnostics: Vec<String>,
    pub warnings: Vec<String>,
}

/// Per-session failure inside `stop_all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopFailure {
    pub session_id: SessionId,
    pub kind: String,
    pub message: String,
}

/// Outcome of `stop_all`; failures are reported one by one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAllReport {
    pub stopped: Vec<SessionId>,
    pub failed: Vec<StopFailure>,
}

impl StopAllReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Get current Unix timestamp (seconds)
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Get current Unix timestamp (milliseconds)
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
