// Notification Module - user-facing alerts
//
// Detects pool, hashrate, crash and orphan conditions per session and hands
// them to a pluggable notifier.

pub mod triggers;

pub use triggers::{LogNotifier, NotificationTrigger, Notifier, TriggerDetector, TriggerKind};
