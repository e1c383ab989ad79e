// Session Workers
//
// Per-session background threads: one reader per output pipe feeding the
// LogRing and telemetry, and one monitor that polls the stats endpoint,
// detects unexpected exits and drives notification triggers.

use super::manager::Inner;
use super::state::SessionSlot;
use crate::error::MinerError;
use crate::event::EventBus;
use crate::notification::{triggers, TriggerKind};
use crate::supervisor::{describe_exit, spawn_line_reader, ProcessHandle, StreamEvent, StreamKind};
use crate::telemetry::parser::last_error_line;
use crate::types::{current_millis, SessionState, SessionStats};
use serde_json::json;
use std::io::Read;
use std::process::ExitStatus;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const DIAGNOSTIC_LINES: usize = 8; // tail kept on an Error session
const STREAM_DRAIN_WAIT: Duration = Duration::from_millis(500);

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

/// Start a reader thread for one pipe of the session's process
pub(crate) fn attach_stream<R>(slot: &Arc<SessionSlot>, bus: &EventBus, kind: StreamKind, reader: R)
where
    R: Read + Send + 'static,
{
    slot.lock().open_streams += 1;

    let weak = Arc::downgrade(slot);
    let bus = bus.clone();
    let label = format!("m-{}", &slot.id[..6.min(slot.id.len())]);
    let spawned = spawn_line_reader(&label, kind, reader, move |event| {
        on_stream_event(&weak, &bus, event)
    });

    if let Err(e) = spawned {
        let mut cell = slot.lock();
        cell.open_streams = cell.open_streams.saturating_sub(1);
        warn!(session = %slot.id, stream = kind.as_str(), "failed to start reader: {}", e);
    }
}

fn on_stream_event(slot: &Weak<SessionSlot>, bus: &EventBus, event: StreamEvent) {
    // The reader keeps draining after the session is gone so the child never
    // blocks on a full pipe.
    let Some(slot) = slot.upgrade() else { return };
    let mut cell = slot.lock();
    match event {
        StreamEvent::Line(line) => {
            let now = current_millis();
            cell.telemetry.ingest_line(&line, now);
            let seq = cell.logs.append(now, line.clone());
            // Emitted under the cell lock so log-line events keep ring order.
            bus.emit_log_line(&slot.id, seq, now, line);
        }
        StreamEvent::Closed => {
            cell.open_streams = cell.open_streams.saturating_sub(1);
        }
    }
}

/// Start the monitor thread; dropping or signalling the returned sender stops it
pub(crate) fn spawn_monitor(inner: &Arc<Inner>, slot: Arc<SessionSlot>) -> std::io::Result<Sender<()>> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let weak = Arc::downgrade(inner);
    let interval = inner.config.poll_interval();

    thread::Builder::new()
        .name(format!("mon-{}", short_id(&slot.id)))
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(inner) = weak.upgrade() else { break };
                if !monitor_tick(&inner, &slot) {
                    break;
                }
            }
            debug!(session = %slot.id, "monitor exiting");
        })?;

    Ok(stop_tx)
}

/// One monitoring pass. Returns false once there is nothing left to watch.
fn monitor_tick(inner: &Inner, slot: &SessionSlot) -> bool {
    let (process, probe) = {
        let cell = slot.lock();
        if cell.stop_requested {
            return true;
        }
        if !cell.state.has_live_process() {
            return false;
        }
        let probe = match cell.state {
            SessionState::Running => cell.probe.clone(),
            _ => None,
        };
        (cell.process.clone(), probe)
    };
    let Some(process) = process else { return false };

    match process.try_wait() {
        Ok(Some(status)) => {
            handle_unexpected_exit(inner, slot, &process, &status);
            return false;
        }
        Ok(None) => {}
        Err(e) => warn!(session = %slot.id, "exit check failed: {}", e),
    }

    // HTTP happens outside the cell lock
    let poll = probe.map(|probe| probe.poll());

    let now = current_millis();
    let mut cell = slot.lock();
    if cell.stop_requested || !cell.state.has_live_process() {
        return true;
    }
    if let Some(result) = poll {
        // A stop or suspend that landed during the poll wins.
        if cell.state == SessionState::Running {
            if let Err(e) = &result {
                debug!(session = %slot.id, "stats poll failed: {}", e);
            }
            cell.telemetry.record_poll(result, now);
        }
    }
    let uptime = cell.uptime_secs();
    cell.telemetry.tick(now, uptime);

    let fired: Vec<(TriggerKind, String, SessionStats)> = if cell.state == SessionState::Running {
        let stats = cell.telemetry.stats().clone();
        let pool_up = cell.telemetry.pool_up();
        cell.triggers
            .observe(&stats, pool_up)
            .into_iter()
            .map(|kind| {
                let message = triggers::describe(kind, &slot.config.pool_url, &stats);
                (kind, message, stats.clone())
            })
            .collect()
    } else {
        Vec::new()
    };

    inner.batcher.submit(slot.summary(&cell));
    drop(cell);

    for (kind, message, stats) in fired {
        let data = json!({
            "pool": slot.config.pool_url,
            "hashrate_current": stats.hashrate_current,
            "hashrate_avg60": stats.hashrate_avg60,
        });
        inner.notify(kind, slot, message, data);
    }
    true
}

/// The process died without a stop request: Error state with diagnostics
fn handle_unexpected_exit(inner: &Inner, slot: &SessionSlot, process: &ProcessHandle, status: &ExitStatus) {
    // Whatever the miner forked dies with it
    process.sweep_group();

    // Let the readers deliver the final lines first
    let deadline = Instant::now() + STREAM_DRAIN_WAIT;
    while slot.lock().open_streams > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    let exit = describe_exit(status);
    let (summary, message) = {
        let mut cell = slot.lock();
        if cell.stop_requested || !cell.state.has_live_process() {
            return;
        }
        let tail = cell.logs.tail(DIAGNOSTIC_LINES);
        let last_error = last_error_line(cell.telemetry.parser().as_ref(), &tail)
            .or_else(|| cell.telemetry.stats().last_error.clone());
        let detail = match last_error {
            Some(line) => format!("{}; last error: {}", exit, line),
            None => exit.clone(),
        };
        let message = MinerError::UnexpectedExit(detail).to_string();

        if let Err(e) = cell.transition(SessionState::Error, "report exit of") {
            warn!(session = %slot.id, "{}", e);
            return;
        }
        cell.error = Some(message.clone());
        cell.diagnostics = tail;
        cell.process = None;
        cell.exited_group = Some(process.pid());
        cell.probe = None;
        (slot.summary(&cell), message)
    };

    error!(session = %slot.id, coin = %slot.config.coin_id, "{}", message);
    inner.notify(
        TriggerKind::MinerCrash,
        slot,
        message,
        json!({ "exit": exit, "diagnostics": summary.diagnostics }),
    );
    inner.batcher.submit(summary.clone());
    inner.bus.emit_session_updated(summary);
    inner.refresh_recovery();
}
