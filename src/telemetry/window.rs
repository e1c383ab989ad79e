// Rolling Window
//
// Trailing time window of hashrate samples.

use std::collections::VecDeque;

pub const WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<(u64, f64)>, // (timestamp_ms, H/s)
    span_ms: u64,
}

impl RollingWindow {
    pub fn new(span_ms: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            span_ms,
        }
    }

    /// Record a sample. Samples older than the newest one are dropped so the
    /// window stays ordered.
    pub fn push(&mut self, timestamp_ms: u64, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        if let Some(&(last, _)) = self.samples.back() {
            if timestamp_ms < last {
                return;
            }
        }
        self.samples.push_back((timestamp_ms, value));
        self.prune(timestamp_ms);
    }

    /// Drop samples that fell out of the window
    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.span_ms);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the window; None with fewer than two samples
    pub fn average(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        Some(sum / self.samples.len() as f64)
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(WINDOW_MS)
    }
}
