// Session Module - mining session orchestration
//
// Registry, state machine, per-session log ring and worker threads.

pub mod log_ring;
pub mod manager;
pub mod state;
mod worker;

pub use log_ring::{LogEntry, LogGap, LogPage, LogRing};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use state::{SessionCell, SessionSlot};
