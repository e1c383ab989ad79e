// Telemetry Collector
//
// Turns structured polls and raw log lines into one `SessionStats` snapshot
// with a confidence tier. Malformed input only lowers confidence; nothing
// here can fail a session.

use super::parser::{LineMetrics, LogParser};
use super::probe::StructuredSample;
use super::window::RollingWindow;
use crate::error::MinerError;
use crate::types::{Confidence, ConnectionPhase, SessionStats, TelemetryMode};
use std::sync::Arc;

/// Failed polls after a success before values stop counting as "recent"
const STALE_AFTER_FAILURES: u32 = 3;

pub struct TelemetryCollector {
    mode: TelemetryMode,
    parser: Arc<dyn LogParser>,
    window: RollingWindow,
    stats: SessionStats,
    // structured source
    poll_ok_once: bool,
    poll_fresh: bool,
    poll_failures: u32,
    last_poll_error: Option<String>,
    // log source
    log_hashrate_seen: bool,
    log_shares_seen: bool,
    unparsed_lines: u64,
    pool_up: Option<bool>,
    lifetime_sum: f64,
    lifetime_samples: u64,
}

impl TelemetryCollector {
    pub fn new(mode: TelemetryMode, parser: Arc<dyn LogParser>) -> Self {
        let mut collector = Self {
            mode,
            parser,
            window: RollingWindow::default(),
            stats: SessionStats::default(),
            poll_ok_once: false,
            poll_fresh: false,
            poll_failures: 0,
            last_poll_error: None,
            log_hashrate_seen: false,
            log_shares_seen: false,
            unparsed_lines: 0,
            pool_up: None,
            lifetime_sum: 0.0,
            lifetime_samples: 0,
        };
        collector.refresh_confidence();
        collector
    }

    pub fn mode(&self) -> TelemetryMode {
        self.mode
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn parser(&self) -> &Arc<dyn LogParser> {
        &self.parser
    }

    /// Pool reachability as last reported: Some(false) after a connection-loss marker
    pub fn pool_up(&self) -> Option<bool> {
        self.pool_up
    }

    /// Mean of every hashrate sample seen over the session lifetime
    pub fn lifetime_average(&self) -> f64 {
        if self.lifetime_samples == 0 {
            return 0.0;
        }
        self.lifetime_sum / self.lifetime_samples as f64
    }

    /// Feed one raw output line
    pub fn ingest_line(&mut self, line: &str, now_ms: u64) -> LineMetrics {
        let metrics = self.parser.parse(line);

        if metrics.unparsed_metric {
            self.unparsed_lines += 1;
        }
        if let Some(shares) = metrics.shares {
            self.log_shares_seen = true;
            self.merge_shares(shares.accepted, shares.rejected, now_ms);
        }
        if let Some(difficulty) = metrics.difficulty {
            self.stats.difficulty = Some(difficulty);
        }
        if let Some(phase) = metrics.connection {
            self.stats.connection = phase;
        }
        if metrics.pool_lost {
            self.pool_up = Some(false);
        } else if matches!(
            metrics.connection,
            Some(ConnectionPhase::Connected | ConnectionPhase::Authorized)
        ) {
            self.pool_up = Some(true);
        }
        if let Some(error) = &metrics.error {
            self.stats.last_error = Some(error.clone());
        }
        if let Some(hashrate) = metrics.hashrate {
            self.log_hashrate_seen = true;
            // A fresh API reading beats a console estimate.
            if !self.poll_fresh {
                self.record_hashrate(hashrate, now_ms);
            }
        }

        self.refresh_confidence();
        metrics
    }

    /// Feed the outcome of one structured poll
    pub fn record_poll(&mut self, result: Result<StructuredSample, MinerError>, now_ms: u64) {
        match result {
            Ok(sample) => {
                self.poll_ok_once = true;
                self.poll_fresh = true;
                self.poll_failures = 0;
                self.last_poll_error = None;

                self.record_hashrate(sample.hashrate_current, now_ms);
                self.merge_shares(sample.accepted, Some(sample.rejected), now_ms);
                if sample.difficulty.is_some() {
                    self.stats.difficulty = sample.difficulty;
                }
                self.stats.uptime_secs = sample.uptime_secs;
                if sample.pool_connected {
                    self.stats.connection = ConnectionPhase::Authorized;
                    self.pool_up = Some(true);
                } else if self.pool_up == Some(true) {
                    self.stats.connection = ConnectionPhase::Connecting;
                    self.pool_up = Some(false);
                }
            }
            Err(e) => {
                self.poll_fresh = false;
                self.poll_failures = self.poll_failures.saturating_add(1);
                self.last_poll_error = Some(e.to_string());
            }
        }
        self.refresh_confidence();
    }

    /// Periodic housekeeping: age the window and refresh uptime
    pub fn tick(&mut self, now_ms: u64, uptime_secs: u64) {
        self.window.prune(now_ms);
        self.stats.hashrate_avg60 = self.window.average();
        if !self.poll_fresh {
            self.stats.uptime_secs = uptime_secs;
        }
        self.refresh_confidence();
    }

    fn record_hashrate(&mut self, hashrate: f64, now_ms: u64) {
        if !hashrate.is_finite() || hashrate < 0.0 {
            return;
        }
        self.stats.hashrate_current = hashrate;
        self.window.push(now_ms, hashrate);
        self.stats.hashrate_avg60 = self.window.average();
        self.lifetime_sum += hashrate;
        self.lifetime_samples += 1;
    }

    fn merge_shares(&mut self, accepted: u64, rejected: Option<u64>, now_ms: u64) {
        if accepted > self.stats.accepted {
            self.stats.accepted = accepted;
            self.stats.last_share_at = Some(now_ms / 1000);
        }
        if let Some(rejected) = rejected {
            self.stats.rejected = self.stats.rejected.max(rejected);
        }
    }

    fn log_metrics_seen(&self) -> bool {
        self.log_hashrate_seen || self.log_shares_seen
    }

    fn unparsed_note(&self) -> String {
        match self.unparsed_lines {
            0 => String::new(),
            1 => "; 1 metric-like line could not be parsed".to_string(),
            n => format!("; {} metric-like lines could not be parsed", n),
        }
    }

    fn refresh_confidence(&mut self) {
        let (confidence, reason) = match self.mode {
            TelemetryMode::Structured => self.structured_confidence(),
            TelemetryMode::LogParse => self.log_confidence(),
        };
        self.stats.confidence = confidence;
        self.stats.reason = reason;
    }

    fn structured_confidence(&self) -> (Confidence, String) {
        let poll_error = self.last_poll_error.as_deref().unwrap_or("no answer yet");

        if self.poll_fresh {
            return (Confidence::High, "live stats from miner API".to_string());
        }
        if self.poll_ok_once && self.poll_failures <= STALE_AFTER_FAILURES {
            return (
                Confidence::Medium,
                format!(
                    "miner API missed {} poll(s), showing last known values ({})",
                    self.poll_failures, poll_error
                ),
            );
        }
        if self.log_metrics_seen() {
            return (
                Confidence::Low,
                format!(
                    "miner API unavailable ({}), values parsed from console output{}",
                    poll_error,
                    self.unparsed_note()
                ),
            );
        }
        (
            Confidence::Unknown,
            format!("waiting for miner API ({}){}", poll_error, self.unparsed_note()),
        )
    }

    fn log_confidence(&self) -> (Confidence, String) {
        if !self.log_metrics_seen() {
            return (
                Confidence::Unknown,
                format!(
                    "no hashrate or share lines recognized in miner output yet{}",
                    self.unparsed_note()
                ),
            );
        }
        let mut reason = "estimated from miner console output".to_string();
        if !self.log_hashrate_seen {
            reason.push_str("; hashrate not reported yet");
        }
        if !self.log_shares_seen {
            reason.push_str("; no share results yet");
        }
        reason.push_str(&self.unparsed_note());
        (Confidence::Low, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::parser::PatternParser;

    fn collector(mode: TelemetryMode) -> TelemetryCollector {
        TelemetryCollector::new(mode, Arc::new(PatternParser))
    }

    fn sample(hashrate: f64, accepted: u64, rejected: u64) -> StructuredSample {
        StructuredSample {
            hashrate_current: hashrate,
            accepted,
            rejected,
            difficulty: Some(1000.0),
            uptime_secs: 10,
            pool: Some("pool:3333".into()),
            pool_connected: true,
        }
    }

    #[test]
    fn test_starts_unknown_with_reason() {
        for mode in [TelemetryMode::Structured, TelemetryMode::LogParse] {
            let c = collector(mode);
            assert_eq!(c.stats().confidence, Confidence::Unknown);
            assert!(!c.stats().reason.is_empty());
        }
    }

    #[test]
    fn test_log_parse_share_line() {
        let mut c = collector(TelemetryMode::LogParse);
        c.ingest_line("accepted (5/6) diff 1024", 1_000);
        let stats = c.stats();
        assert_eq!(stats.accepted, 5);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.difficulty, Some(1024.0));
        assert_eq!(stats.confidence, Confidence::Low);
        assert!(stats.reason.contains("hashrate not reported"));
        assert_eq!(stats.last_share_at, Some(1));
    }

    #[test]
    fn test_counters_never_decrease() {
        let mut c = collector(TelemetryMode::LogParse);
        c.ingest_line("accepted (9/10)", 1_000);
        c.ingest_line("accepted (3/3)", 2_000);
        assert_eq!(c.stats().accepted, 9);
        assert_eq!(c.stats().rejected, 1);

        let mut c = collector(TelemetryMode::Structured);
        c.record_poll(Ok(sample(100.0, 10, 2)), 1_000);
        c.record_poll(Ok(sample(100.0, 4, 0)), 2_000);
        assert_eq!(c.stats().accepted, 10);
        assert_eq!(c.stats().rejected, 2);
    }

    #[test]
    fn test_structured_confidence_degrades() {
        let mut c = collector(TelemetryMode::Structured);
        c.record_poll(Ok(sample(1500.0, 1, 0)), 1_000);
        assert_eq!(c.stats().confidence, Confidence::High);
        assert!(c.stats().hashrate_current >= 0.0);

        c.record_poll(Err(MinerError::TelemetryUnavailable("timeout".into())), 2_000);
        assert_eq!(c.stats().confidence, Confidence::Medium);
        assert!(c.stats().reason.contains("timeout"));
        assert_eq!(c.stats().hashrate_current, 1500.0);

        for i in 0..3 {
            c.record_poll(Err(MinerError::TelemetryUnavailable("timeout".into())), 3_000 + i);
        }
        assert_eq!(c.stats().confidence, Confidence::Unknown);

        c.ingest_line("speed 10s/60s/15m 900.0 n/a n/a H/s", 10_000);
        assert_eq!(c.stats().confidence, Confidence::Low);
        assert_eq!(c.stats().hashrate_current, 900.0);

        c.record_poll(Ok(sample(1400.0, 2, 0)), 11_000);
        assert_eq!(c.stats().confidence, Confidence::High);
    }

    #[test]
    fn test_fresh_api_beats_console_hashrate() {
        let mut c = collector(TelemetryMode::Structured);
        c.record_poll(Ok(sample(1500.0, 0, 0)), 1_000);
        c.ingest_line("speed 10s/60s/15m 1.0 n/a n/a H/s", 1_500);
        assert_eq!(c.stats().hashrate_current, 1500.0);
    }

    #[test]
    fn test_average_over_window() {
        let mut c = collector(TelemetryMode::Structured);
        c.record_poll(Ok(sample(100.0, 0, 0)), 1_000);
        assert_eq!(c.stats().hashrate_avg60, None);
        c.record_poll(Ok(sample(300.0, 0, 0)), 2_000);
        assert_eq!(c.stats().hashrate_avg60, Some(200.0));

        c.tick(120_000, 120);
        assert_eq!(c.stats().hashrate_avg60, None);
        assert_eq!(c.lifetime_average(), 200.0);
    }

    #[test]
    fn test_unparsed_lines_reported() {
        let mut c = collector(TelemetryMode::LogParse);
        c.ingest_line("rejected share: duplicate", 1_000);
        c.ingest_line("shares ??? garbled", 1_100);
        assert_eq!(c.stats().confidence, Confidence::Unknown);
        assert!(c.stats().reason.contains("2 metric-like lines"));

        c.ingest_line("cpu: 2.5 kH/s", 1_200);
        assert_eq!(c.stats().confidence, Confidence::Low);
        assert!(c.stats().reason.contains("no share results"));
    }

    #[test]
    fn test_pool_state_tracking() {
        let mut c = collector(TelemetryMode::LogParse);
        assert_eq!(c.pool_up(), None);
        c.ingest_line("use pool pool.example.com:3333", 1_000);
        assert_eq!(c.pool_up(), Some(true));
        c.ingest_line("pool.example.com:3333 connection lost", 2_000);
        assert_eq!(c.pool_up(), Some(false));
        assert_eq!(c.stats().connection, ConnectionPhase::Connecting);
    }

    #[test]
    fn test_error_lines_kept() {
        let mut c = collector(TelemetryMode::LogParse);
        c.ingest_line("error: login failed, invalid wallet", 1_000);
        assert!(c.stats().last_error.as_deref().unwrap().contains("invalid wallet"));
    }
}
