// Batch Emitter
//
// Coalesces per-session updates into one `session-batch-updated` event per
// interval. Only the newest summary of each session survives a window, so a
// chatty session cannot flood the UI.

use super::bus::EventBus;
use crate::supervisor::process::lock;
use crate::types::{SessionId, SessionSummary};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

type Pending = Arc<Mutex<HashMap<SessionId, SessionSummary>>>;

pub struct BatchEmitter {
    bus: EventBus,
    pending: Pending,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BatchEmitter {
    /// Start the flush thread; `interval` is the coalescing window
    pub fn start(bus: EventBus, interval: Duration) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_bus = bus.clone();
        let thread_pending = pending.clone();
        let worker = thread::Builder::new()
            .name("session-batcher".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => flush_pending(&thread_bus, &thread_pending),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Updates are still delivered through explicit flushes.
                warn!("failed to start batch thread: {}", e);
                None
            }
        };

        Self {
            bus,
            pending,
            stop_tx: Some(stop_tx),
            worker,
        }
    }

    /// Queue the latest summary of a session, replacing any older one
    pub fn submit(&self, summary: SessionSummary) {
        lock(&self.pending).insert(summary.id.clone(), summary);
    }

    /// Drop a pending update, used once a session is gone
    pub fn forget(&self, session_id: &str) {
        lock(&self.pending).remove(session_id);
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Emit whatever is queued right now
    pub fn flush(&self) {
        flush_pending(&self.bus, &self.pending);
    }
}

fn flush_pending(bus: &EventBus, pending: &Pending) {
    let mut batch: Vec<SessionSummary> = {
        let mut pending = lock(pending);
        if pending.is_empty() {
            return;
        }
        pending.drain().map(|(_, summary)| summary).collect()
    };
    batch.sort_by(|a, b| {
        a.config
            .created_at
            .cmp(&b.config.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    debug!(sessions = batch.len(), "flushing batch update");
    bus.emit_session_batch_updated(batch);
}

impl Drop for BatchEmitter {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::bus::{SessionEvent, Subscription};
    use crate::testing::summary;
    use crate::types::SessionState;

    #[test]
    fn test_latest_summary_wins() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Subscription::Batches);
        let batcher = BatchEmitter::start(bus, Duration::from_secs(3600));

        let mut first = summary("a");
        first.state = SessionState::Starting;
        batcher.submit(first);
        batcher.submit(summary("a"));
        batcher.submit(summary("b"));
        batcher.submit(summary("gone"));
        batcher.forget("gone");
        assert_eq!(batcher.pending_len(), 2);

        batcher.flush();
        match rx.try_recv().unwrap() {
            SessionEvent::SessionBatchUpdated(batch) => {
                assert_eq!(batch.len(), 2);
                let a = batch.iter().find(|s| s.id == "a").unwrap();
                assert_eq!(a.state, SessionState::Running);
            }
            other => panic!("unexpected event {}", other.name()),
        }

        // nothing queued, nothing emitted
        batcher.flush();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_periodic_flush() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Subscription::Batches);
        let batcher = BatchEmitter::start(bus, Duration::from_millis(50));

        batcher.submit(summary("kept"));

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            SessionEvent::SessionBatchUpdated(batch) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].id, "kept");
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }
}
