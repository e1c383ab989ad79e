// Session State
//
// One registry slot per session: the immutable config plus a locked cell
// holding everything that changes. Every state change goes through
// `SessionCell::transition`.

use super::log_ring::LogRing;
use crate::error::{MinerError, Result};
use crate::launcher::LaunchSpec;
use crate::notification::TriggerDetector;
use crate::supervisor::process::{lock, ProcessHandle};
use crate::telemetry::{StatsProbe, TelemetryCollector};
use crate::types::{SessionConfig, SessionId, SessionState, SessionSummary, SuspendMode};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;

/// Registry entry; `config` never changes after creation
pub struct SessionSlot {
    pub id: SessionId,
    pub config: SessionConfig,
    cell: Mutex<SessionCell>,
}

/// Mutable per-session state, guarded by the slot's lock
pub struct SessionCell {
    pub state: SessionState,
    pub telemetry: TelemetryCollector,
    pub logs: LogRing,
    pub process: Option<Arc<ProcessHandle>>,
    pub exited_group: Option<u32>, // group of a miner that died on its own
    pub launch: Option<LaunchSpec>,
    pub probe: Option<Arc<dyn StatsProbe>>,
    pub started_at: Option<u64>,
    pub started_instant: Option<Instant>,
    pub suspend_mode: Option<SuspendMode>,
    pub stop_requested: bool,
    pub error: Option<String>,
    pub diagnostics: Vec<String>,
    pub warnings: Vec<String>,
    pub open_streams: u8, // reader threads still attached
    pub triggers: TriggerDetector,
}

impl SessionSlot {
    /// New slot in `Starting`; the caller inserts it into the registry
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        telemetry: TelemetryCollector,
        log_capacity: usize,
        triggers: TriggerDetector,
        warnings: Vec<String>,
    ) -> Self {
        let cell = SessionCell {
            state: SessionState::Starting,
            telemetry,
            logs: LogRing::new(log_capacity),
            process: None,
            exited_group: None,
            launch: None,
            probe: None,
            started_at: None,
            started_instant: None,
            suspend_mode: None,
            stop_requested: false,
            error: None,
            diagnostics: Vec::new(),
            warnings,
            open_streams: 0,
            triggers,
        };
        Self {
            id,
            config,
            cell: Mutex::new(cell),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionCell> {
        lock(&self.cell)
    }

    /// Consistent snapshot of this session
    pub fn summary(&self, cell: &SessionCell) -> SessionSummary {
        let mut stats = cell.telemetry.stats().clone();
        stats.uptime_secs = stats.uptime_secs.max(cell.uptime_secs());
        SessionSummary {
            id: self.id.clone(),
            config: self.config.clone(),
            state: cell.state,
            stats,
            pid: cell.process.as_ref().map(|p| p.pid()),
            started_at: cell.started_at,
            suspend_mode: cell.suspend_mode,
            error: cell.error.clone(),
            diagnostics: cell.diagnostics.clone(),
            warnings: cell.warnings.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSummary {
        let cell = self.lock();
        self.summary(&cell)
    }
}

impl SessionCell {
    /// Move along an allowed edge of the state machine
    pub fn transition(&mut self, next: SessionState, action: &'static str) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MinerError::InvalidTransition {
                from: self.state,
                action,
            });
        }
        debug!(from = %self.state, to = %next, action, "session transition");
        self.state = next;
        if next != SessionState::Suspended {
            self.suspend_mode = None;
        }
        Ok(())
    }

    /// Seconds since the process was spawned
    pub fn uptime_secs(&self) -> u64 {
        self.started_instant
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Threads this session holds against the budget
    pub fn holds_budget(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Suspended)
    }
}
