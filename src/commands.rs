// Commands
//
// Presentation-layer bridge: JSON commands in, JSON responses out. Every
// command maps onto one SessionManager operation; errors become
// `{ "ok": false, "error": { "kind", "message" } }`.

use crate::error::MinerError;
use crate::session::SessionManager;
use crate::types::{SessionId, SessionRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const DEFAULT_LOG_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    GrantConsent,
    RevokeConsent,
    Start {
        request: SessionRequest,
    },
    Stop {
        session_id: SessionId,
    },
    Suspend {
        session_id: SessionId,
    },
    Resume {
        session_id: SessionId,
    },
    StopAll,
    List,
    Get {
        session_id: SessionId,
    },
    GetLogs {
        session_id: SessionId,
        #[serde(default)]
        cursor: u64,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetBudgetStatus,
    GetCrashRecovery,
    ClearCrashRecovery,
    IsMining,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GrantConsent => "grant_consent",
            Command::RevokeConsent => "revoke_consent",
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::Suspend { .. } => "suspend",
            Command::Resume { .. } => "resume",
            Command::StopAll => "stop_all",
            Command::List => "list",
            Command::Get { .. } => "get",
            Command::GetLogs { .. } => "get_logs",
            Command::GetBudgetStatus => "get_budget_status",
            Command::GetCrashRecovery => "get_crash_recovery",
            Command::ClearCrashRecovery => "clear_crash_recovery",
            Command::IsMining => "is_mining",
        }
    }

    /// Commands after which the persisted consent flag must be rewritten
    pub fn changes_consent(&self) -> bool {
        matches!(self, Command::GrantConsent | Command::RevokeConsent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::failure(&MinerError::Json(e)),
        }
    }

    pub fn failure(error: &MinerError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Reply for a line that did not parse as a command
    pub fn malformed(error: &serde_json::Error) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: "malformed_command".to_string(),
                message: error.to_string(),
            }),
        }
    }
}

fn reply<T: Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(data) => Response::success(data),
        Err(e) => Response::failure(&e),
    }
}

/// Run one command against the manager
pub fn dispatch(manager: &SessionManager, command: Command) -> Response {
    debug!(cmd = command.name(), "dispatching command");
    match command {
        Command::GrantConsent => {
            manager.grant_consent();
            Response::success(true)
        }
        Command::RevokeConsent => Response::success(manager.revoke_consent()),
        Command::Start { request } => reply(manager.start(request)),
        Command::Stop { session_id } => reply(manager.stop(&session_id)),
        Command::Suspend { session_id } => reply(manager.suspend(&session_id)),
        Command::Resume { session_id } => reply(manager.resume(&session_id)),
        Command::StopAll => Response::success(manager.stop_all()),
        Command::List => Response::success(manager.list()),
        Command::Get { session_id } => reply(manager.get(&session_id)),
        Command::GetLogs {
            session_id,
            cursor,
            limit,
        } => reply(manager.get_logs(&session_id, cursor, limit.unwrap_or(DEFAULT_LOG_LIMIT))),
        Command::GetBudgetStatus => Response::success(manager.budget_status()),
        Command::GetCrashRecovery => Response::success(manager.recovery_state()),
        Command::ClearCrashRecovery => reply(manager.clear_recovery()),
        Command::IsMining => Response::success(manager.is_mining()),
    }
}

/// Parse and run one JSON line
pub fn dispatch_line(manager: &SessionManager, line: &str) -> Response {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => dispatch(manager, command),
        Err(e) => Response::malformed(&e),
    }
}
