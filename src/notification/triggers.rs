// Notification Triggers
//
// Edge-triggered detection of conditions worth telling the user about:
// pool connection lost/recovered, hashrate drops, crashes and orphaned
// processes. Delivery is left to a `Notifier`.

use crate::types::{current_timestamp, SessionId, SessionStats};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PoolDown,
    PoolRecovered,
    HashrateDrop,
    MinerCrash,
    OrphanedProcess,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::PoolDown => "pool_down",
            TriggerKind::PoolRecovered => "pool_recovered",
            TriggerKind::HashrateDrop => "hashrate_drop",
            TriggerKind::MinerCrash => "miner_crash",
            TriggerKind::OrphanedProcess => "orphaned_process",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            TriggerKind::PoolDown => "Pool Connection Lost",
            TriggerKind::PoolRecovered => "Pool Reconnected",
            TriggerKind::HashrateDrop => "Hashrate Drop Detected",
            TriggerKind::MinerCrash => "Miner Stopped Unexpectedly",
            TriggerKind::OrphanedProcess => "Miner Could Not Be Stopped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTrigger {
    pub kind: TriggerKind,
    pub session_id: SessionId,
    pub symbol: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: u64,
}

impl NotificationTrigger {
    pub fn new(
        kind: TriggerKind,
        session_id: &str,
        symbol: &str,
        message: String,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.to_string(),
            symbol: symbol.to_string(),
            message,
            data,
            timestamp: current_timestamp(),
        }
    }
}

/// Receives triggers; implementations must not block the caller for long
pub trait Notifier: Send + Sync {
    fn notify(&self, trigger: &NotificationTrigger);
}

/// Writes triggers to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, trigger: &NotificationTrigger) {
        match trigger.kind {
            TriggerKind::PoolRecovered => info!(
                session = %trigger.session_id,
                kind = trigger.kind.as_str(),
                "{}: {}",
                trigger.kind.title(),
                trigger.message
            ),
            _ => warn!(
                session = %trigger.session_id,
                kind = trigger.kind.as_str(),
                "{}: {}",
                trigger.kind.title(),
                trigger.message
            ),
        }
    }
}

/// Per-session edge detector for telemetry driven triggers
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    threshold_pct: f64,
    pool_down: bool,
    hashrate_dropped: bool,
}

impl TriggerDetector {
    pub fn new(threshold_pct: f64) -> Self {
        Self {
            threshold_pct: threshold_pct.clamp(1.0, 99.0),
            pool_down: false,
            hashrate_dropped: false,
        }
    }

    /// Compare against the previous observation; returns kinds that just fired
    pub fn observe(&mut self, stats: &SessionStats, pool_up: Option<bool>) -> Vec<TriggerKind> {
        let mut fired = Vec::new();

        match pool_up {
            Some(false) if !self.pool_down => {
                self.pool_down = true;
                fired.push(TriggerKind::PoolDown);
            }
            Some(true) if self.pool_down => {
                self.pool_down = false;
                fired.push(TriggerKind::PoolRecovered);
            }
            _ => {}
        }

        if let Some(avg) = stats.hashrate_avg60.filter(|avg| *avg > 0.0) {
            let floor = avg * (1.0 - self.threshold_pct / 100.0);
            let below = stats.hashrate_current < floor;
            if below && !self.hashrate_dropped {
                self.hashrate_dropped = true;
                fired.push(TriggerKind::HashrateDrop);
            } else if !below {
                self.hashrate_dropped = false;
            }
        }

        fired
    }

    /// Drop percentage of current against the rolling average
    pub fn drop_pct(stats: &SessionStats) -> f64 {
        match stats.hashrate_avg60 {
            Some(avg) if avg > 0.0 => ((avg - stats.hashrate_current) / avg * 100.0).max(0.0),
            _ => 0.0,
        }
    }
}

/// Human message for a telemetry trigger
pub fn describe(kind: TriggerKind, pool: &str, stats: &SessionStats) -> String {
    match kind {
        TriggerKind::PoolDown => format!("Lost connection to {}", pool),
        TriggerKind::PoolRecovered => format!("Connected to {}", pool),
        TriggerKind::HashrateDrop => format!(
            "Current: {:.1} H/s (down {:.0}%)",
            stats.hashrate_current,
            TriggerDetector::drop_pct(stats)
        ),
        TriggerKind::MinerCrash | TriggerKind::OrphanedProcess => kind.title().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(current: f64, avg: Option<f64>) -> SessionStats {
        SessionStats {
            hashrate_current: current,
            hashrate_avg60: avg,
            ..SessionStats::default()
        }
    }

    #[test]
    fn test_pool_edges() {
        let mut detector = TriggerDetector::new(30.0);
        let s = stats(0.0, None);
        assert!(detector.observe(&s, None).is_empty());
        assert!(detector.observe(&s, Some(true)).is_empty());
        assert_eq!(detector.observe(&s, Some(false)), vec![TriggerKind::PoolDown]);
        // still down: no repeat
        assert!(detector.observe(&s, Some(false)).is_empty());
        assert_eq!(detector.observe(&s, Some(true)), vec![TriggerKind::PoolRecovered]);
        assert!(detector.observe(&s, Some(true)).is_empty());
    }

    #[test]
    fn test_hashrate_drop_rearms() {
        let mut detector = TriggerDetector::new(30.0);
        assert!(detector.observe(&stats(1000.0, Some(1000.0)), None).is_empty());
        // 750 is above the 700 floor
        assert!(detector.observe(&stats(750.0, Some(1000.0)), None).is_empty());
        assert_eq!(
            detector.observe(&stats(500.0, Some(1000.0)), None),
            vec![TriggerKind::HashrateDrop]
        );
        assert!(detector.observe(&stats(400.0, Some(1000.0)), None).is_empty());
        assert!(detector.observe(&stats(950.0, Some(1000.0)), None).is_empty());
        assert_eq!(
            detector.observe(&stats(100.0, Some(1000.0)), None),
            vec![TriggerKind::HashrateDrop]
        );
    }

    #[test]
    fn test_no_average_no_drop() {
        let mut detector = TriggerDetector::new(30.0);
        assert!(detector.observe(&stats(0.0, None), None).is_empty());
        assert!(detector.observe(&stats(0.0, Some(0.0)), None).is_empty());
    }

    #[test]
    fn test_describe_drop() {
        let msg = describe(TriggerKind::HashrateDrop, "pool", &stats(500.0, Some(1000.0)));
        assert_eq!(msg, "Current: 500.0 H/s (down 50%)");
        assert_eq!(
            serde_json::to_value(TriggerKind::OrphanedProcess).unwrap(),
            "orphaned_process"
        );
    }
}
