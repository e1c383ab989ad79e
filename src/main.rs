// hashwarden
//
// Headless bridge around the session manager. One JSON command per stdin
// line, one JSON response per stdout line; session events are interleaved on
// stdout as `{"event": ..., "payload": ...}` lines. Diagnostics go to stderr.

use hashwarden::commands::{self, Response};
use hashwarden::config::ManagerConfig;
use hashwarden::event::{SessionEvent, Subscription};
use hashwarden::session::SessionManager;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hashwarden=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Serialize one value as a single stdout line
fn write_line<T: Serialize>(value: &T) -> io::Result<()> {
    let line = serde_json::to_string(value)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", line)?;
    out.flush()
}

fn forward_events(events: Receiver<SessionEvent>) {
    for event in events {
        if let Err(e) = write_line(&event) {
            warn!("event stream closed: {}", e);
            break;
        }
    }
}

fn persist_consent(path: Option<&PathBuf>, manager: &SessionManager) {
    let Some(path) = path else { return };
    let mut config = manager.config().clone();
    config.consent = manager.consent_granted();
    if let Err(e) = config.save_to(path) {
        warn!(path = %path.display(), "failed to persist consent: {}", e);
    }
}

const EVENT_DRAIN_WAIT: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    init_logging();

    // Optional first argument overrides the config location
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(ManagerConfig::default_path);
    let config = match &config_path {
        Some(path) => ManagerConfig::load_from(path),
        None => Ok(ManagerConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager = match SessionManager::builder(config).build() {
        Ok(manager) => manager,
        Err(e) => {
            error!("failed to start session manager: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let recovery = manager.recovery_state();
    if recovery.had_unclean_shutdown {
        warn!("previous run did not shut down cleanly");
    }
    if let Err(e) = write_line(&Response::success(&recovery)) {
        error!("stdout unavailable: {}", e);
        return ExitCode::FAILURE;
    }

    let events = manager.subscribe(Subscription::All);
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let forwarder = thread::Builder::new()
        .name("event-forwarder".into())
        .spawn(move || {
            forward_events(events);
            let _ = done_tx.send(());
        });
    if let Err(e) = forwarder {
        warn!("event forwarding disabled: {}", e);
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<commands::Command>(&line) {
            Ok(command) => {
                let changes_consent = command.changes_consent();
                let response = commands::dispatch(&manager, command);
                if changes_consent && response.ok {
                    persist_consent(config_path.as_ref(), &manager);
                }
                response
            }
            Err(e) => Response::malformed(&e),
        };
        if let Err(e) = write_line(&response) {
            warn!("stdout closed: {}", e);
            break;
        }
    }

    info!("input closed, shutting down");
    let report = manager.shutdown();
    if let Err(e) = manager.clear_recovery() {
        warn!("failed to clear crash recovery record: {}", e);
    }
    for failure in &report.failed {
        error!(session = %failure.session_id, kind = %failure.kind, "{}", failure.message);
    }

    // The forwarder ends once every bus handle is gone; a reader thread still
    // draining a pipe may hold one, so the wait is bounded.
    drop(manager);
    let _ = done_rx.recv_timeout(EVENT_DRAIN_WAIT);

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
