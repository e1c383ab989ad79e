// Log Line Parser
//
// Best-effort extraction of hashrate, shares, difficulty and pool connection
// markers from miner console output. Output formats drift between miner
// versions, so everything here lives behind the `LogParser` trait.

use crate::types::ConnectionPhase;
use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex"));

// XMRig: "speed 10s/60s/15m 1234.5 1201.0 n/a H/s max 1300.2 H/s"
static XMRIG_SPEED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)speed\s+10s/60s/15m\s+(\S+)\s+(\S+)\s+(\S+)\s+([kmg]?)h/s")
        .expect("valid regex")
});

static RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([kmg]?)h/s").expect("valid regex"));

static TOTAL_RATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)total:\s*(\d+(?:\.\d+)?)\s*([kmg]?)h\b").expect("valid regex")
});

static SHARES_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)accepted\s*\((\d+)/(\d+)\)").expect("valid regex"));

static SHARES_PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)accepted[:\s]+(\d+)/(\d+)").expect("valid regex"));

static SHARES_YAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:yes|yay)!.*?\((\d+)\)").expect("valid regex"));

static DIFFICULTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdiff[a-z]*[:\s]+(\d+(?:\.\d+)?(?:e[-+]?\d+)?)").expect("valid regex")
});

static POOL_LOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)connection (?:lost|refused|reset|interrupted)|disconnected|connect error|stratum connection (?:failed|interrupted)|read error|no active pools|pool .*timed? ?out",
    )
    .expect("valid regex")
});

static ERROR_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:error|failed|fatal|panic|invalid|cannot|unable|segmentation fault|illegal instruction)\b")
        .expect("valid regex")
});

static METRIC_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)h/s|\baccepted\b|\brejected\b|\bshares?\b|\bdiff\b|\bspeed\b")
        .expect("valid regex")
});

const ERROR_MESSAGE_MAX: usize = 240;

/// Everything one line told us
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineMetrics {
    pub hashrate: Option<f64>, // H/s
    pub shares: Option<ShareCount>,
    pub difficulty: Option<f64>,
    pub connection: Option<ConnectionPhase>,
    pub pool_lost: bool,
    pub error: Option<String>,
    /// Looked like a metric line but nothing could be extracted
    pub unparsed_metric: bool,
}

impl LineMetrics {
    pub fn has_metric(&self) -> bool {
        self.hashrate.is_some() || self.shares.is_some() || self.difficulty.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareCount {
    pub accepted: u64,
    pub rejected: Option<u64>,
}

/// Unstructured telemetry capability
pub trait LogParser: Send + Sync {
    fn parse(&self, line: &str) -> LineMetrics;
}

/// Regex patterns for XMRig and cpuminer-opt console output
#[derive(Debug, Default, Clone)]
pub struct PatternParser;

impl LogParser for PatternParser {
    fn parse(&self, line: &str) -> LineMetrics {
        let clean = strip_ansi(line);
        let line = clean.trim();
        let mut metrics = LineMetrics::default();
        if line.is_empty() {
            return metrics;
        }

        metrics.hashrate = extract_hashrate(line);
        metrics.shares = extract_shares(line);
        metrics.difficulty = extract_difficulty(line);

        if POOL_LOST.is_match(line) {
            metrics.pool_lost = true;
            metrics.connection = Some(ConnectionPhase::Connecting);
        } else {
            metrics.connection = extract_connection(line);
        }

        if ERROR_MARKER.is_match(line) {
            metrics.error = Some(truncate(line, ERROR_MESSAGE_MAX));
        }

        metrics.unparsed_metric = !metrics.has_metric() && METRIC_HINT.is_match(line);
        metrics
    }
}

pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "k" => 1_000.0,
        "m" => 1_000_000.0,
        "g" => 1_000_000_000.0,
        _ => 1.0,
    }
}

fn extract_hashrate(line: &str) -> Option<f64> {
    if let Some(caps) = XMRIG_SPEED.captures(line) {
        let multiplier = unit_multiplier(caps.get(4).map_or("", |m| m.as_str()));
        // First window that has a value (10s, then 60s, then 15m)
        return (1..=3)
            .filter_map(|i| caps.get(i)?.as_str().parse::<f64>().ok())
            .next()
            .map(|v| v * multiplier);
    }

    for re in [&*RATE, &*TOTAL_RATE] {
        if let Some(caps) = re.captures(line) {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let multiplier = unit_multiplier(caps.get(2).map_or("", |m| m.as_str()));
            return Some(value * multiplier);
        }
    }
    None
}

/// `X/Y` is X accepted out of Y submitted, so rejected = Y - X
fn extract_shares(line: &str) -> Option<ShareCount> {
    for re in [&*SHARES_PAREN, &*SHARES_PLAIN] {
        if let Some(caps) = re.captures(line) {
            let accepted: u64 = caps.get(1)?.as_str().parse().ok()?;
            let total: u64 = caps.get(2)?.as_str().parse().ok()?;
            return Some(ShareCount {
                accepted,
                rejected: Some(total.saturating_sub(accepted)),
            });
        }
    }

    if let Some(caps) = SHARES_YAY.captures(line) {
        let accepted: u64 = caps.get(1)?.as_str().parse().ok()?;
        return Some(ShareCount {
            accepted,
            rejected: None,
        });
    }
    None
}

fn extract_difficulty(line: &str) -> Option<f64> {
    DIFFICULTY
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

fn extract_connection(line: &str) -> Option<ConnectionPhase> {
    let lower = line.to_lowercase();
    if lower.contains("authorized") || lower.contains("logged in") || lower.contains("new job") {
        Some(ConnectionPhase::Authorized)
    } else if lower.contains("subscribed") || lower.contains("stratum session id") {
        Some(ConnectionPhase::Subscribed)
    } else if lower.contains("use pool") || lower.contains("connected to") {
        Some(ConnectionPhase::Connected)
    } else if lower.contains("connecting") || lower.contains("starting stratum") {
        Some(ConnectionPhase::Connecting)
    } else {
        None
    }
}

fn truncate(line: &str, max: usize) -> String {
    if line.len() <= max {
        return line.to_string();
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

/// Most recent error-looking line among `lines`
pub fn last_error_line(parser: &dyn LogParser, lines: &[String]) -> Option<String> {
    lines.iter().rev().find_map(|l| parser.parse(l).error)
}
