// hashwarden
//
// Supervisor for local CPU miner processes: several concurrent sessions with
// their own lifecycle, telemetry, bounded logs and a shared thread budget.

pub mod budget;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod launcher;
pub mod notification;
pub mod recovery;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod testing;

pub use budget::{BudgetMode, BudgetStatus, ThreadBudget};
pub use commands::{dispatch, Command, Response};
pub use config::ManagerConfig;
pub use error::{MinerError, Result};
pub use event::{SessionEvent, Subscription};
pub use recovery::{CrashRecoveryState, CrashRecoveryStore};
pub use session::{LogPage, LogRing, SessionManager, SessionManagerBuilder};
pub use supervisor::{ProcessHandle, ProcessSupervisor};
pub use telemetry::TelemetryCollector;
pub use types::{SessionConfig, SessionId, SessionRequest, SessionState, SessionStats, SessionSummary};
