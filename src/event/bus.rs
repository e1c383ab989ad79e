// Event Bus
//
// Publish/subscribe fan-out of session events to the presentation layer.
// Subscribers pick a scope: everything, one session, or the coalesced batch
// channel with lifecycle events.

use crate::supervisor::process::lock;
use crate::types::{SessionId, SessionSummary, StopAllReport};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct LogLineEvent {
    pub session_id: SessionId,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub line: String,
}

/// Event names follow the kebab-case wire names (`session-created`, ...)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionCreated(SessionSummary),
    SessionUpdated(SessionSummary),
    SessionBatchUpdated(Vec<SessionSummary>),
    SessionStopped(SessionSummary),
    SessionAllStopped(StopAllReport),
    LogLine(LogLineEvent),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated(_) => "session-created",
            SessionEvent::SessionUpdated(_) => "session-updated",
            SessionEvent::SessionBatchUpdated(_) => "session-batch-updated",
            SessionEvent::SessionStopped(_) => "session-stopped",
            SessionEvent::SessionAllStopped(_) => "session-all-stopped",
            SessionEvent::LogLine(_) => "log-line",
        }
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionCreated(s)
            | SessionEvent::SessionUpdated(s)
            | SessionEvent::SessionStopped(s) => Some(&s.id),
            SessionEvent::LogLine(l) => Some(&l.session_id),
            SessionEvent::SessionBatchUpdated(_) | SessionEvent::SessionAllStopped(_) => None,
        }
    }

    fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionCreated(_)
                | SessionEvent::SessionStopped(_)
                | SessionEvent::SessionAllStopped(_)
        )
    }
}

/// What a subscriber wants to receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Every event including raw log lines
    All,
    /// Single updates, lifecycle events and log lines of one session
    Session(SessionId),
    /// Coalesced batch updates plus lifecycle events
    Batches,
}

impl Subscription {
    fn wants(&self, event: &SessionEvent) -> bool {
        match self {
            Subscription::All => true,
            Subscription::Session(id) => match event.session_id() {
                Some(sid) => sid == id,
                None => matches!(event, SessionEvent::SessionAllStopped(_)),
            },
            Subscription::Batches => {
                event.is_lifecycle() || matches!(event, SessionEvent::SessionBatchUpdated(_))
            }
        }
    }
}

struct Subscriber {
    scope: Subscription,
    tx: Sender<SessionEvent>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, scope: Subscription) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(Subscriber { scope, tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Deliver to every interested subscriber, dropping disconnected ones
    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|sub| {
            if !sub.scope.wants(&event) {
                return true;
            }
            let alive = sub.tx.send(event.clone()).is_ok();
            if !alive {
                debug!(event = event.name(), "subscriber disconnected");
            }
            alive
        });
    }

    pub fn emit_session_created(&self, summary: SessionSummary) {
        self.publish(SessionEvent::SessionCreated(summary));
    }

    pub fn emit_session_updated(&self, summary: SessionSummary) {
        self.publish(SessionEvent::SessionUpdated(summary));
    }

    pub fn emit_session_batch_updated(&self, summaries: Vec<SessionSummary>) {
        self.publish(SessionEvent::SessionBatchUpdated(summaries));
    }

    pub fn emit_session_stopped(&self, summary: SessionSummary) {
        self.publish(SessionEvent::SessionStopped(summary));
    }

    pub fn emit_session_all_stopped(&self, report: StopAllReport) {
        self.publish(SessionEvent::SessionAllStopped(report));
    }

    pub fn emit_log_line(&self, session_id: &str, seq: u64, timestamp_ms: u64, line: String) {
        // Skip the clone-per-subscriber work when nobody listens to logs.
        let interested = lock(&self.subscribers).iter().any(|s| {
            matches!(&s.scope, Subscription::All)
                || matches!(&s.scope, Subscription::Session(id) if id == session_id)
        });
        if !interested {
            return;
        }
        self.publish(SessionEvent::LogLine(LogLineEvent {
            session_id: session_id.to_string(),
            seq,
            timestamp_ms,
            line,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::summary;

    #[test]
    fn test_scopes() {
        let bus = EventBus::new();
        let all = bus.subscribe(Subscription::All);
        let one = bus.subscribe(Subscription::Session("a".into()));
        let batches = bus.subscribe(Subscription::Batches);

        bus.emit_session_created(summary("a"));
        bus.emit_session_updated(summary("b"));
        bus.emit_log_line("a", 0, 1, "hello".into());
        bus.emit_session_batch_updated(vec![summary("a"), summary("b")]);
        bus.emit_session_all_stopped(StopAllReport::default());

        let names = |rx: &Receiver<SessionEvent>| -> Vec<&'static str> {
            rx.try_iter().map(|e| e.name()).collect()
        };
        assert_eq!(
            names(&all),
            vec![
                "session-created",
                "session-updated",
                "log-line",
                "session-batch-updated",
                "session-all-stopped"
            ]
        );
        assert_eq!(
            names(&one),
            vec!["session-created", "log-line", "session-all-stopped"]
        );
        assert_eq!(
            names(&batches),
            vec!["session-created", "session-batch-updated", "session-all-stopped"]
        );
    }

    #[test]
    fn test_disconnected_subscribers_are_dropped() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Subscription::All);
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        bus.emit_session_updated(summary("a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_wire_format() {
        let event = SessionEvent::LogLine(LogLineEvent {
            session_id: "a".into(),
            seq: 3,
            timestamp_ms: 10,
            line: "hi".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "log-line");
        assert_eq!(json["payload"]["seq"], 3);

        let json = serde_json::to_value(SessionEvent::SessionAllStopped(StopAllReport::default()))
            .unwrap();
        assert_eq!(json["event"], "session-all-stopped");
    }
}
