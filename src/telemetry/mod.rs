// Telemetry Module
//
// Structured (HTTP) and log-parse metric sources feeding a per-session
// collector with confidence tiers.

pub mod collector;
pub mod parser;
pub mod probe;
pub mod window;

pub use collector::TelemetryCollector;
pub use parser::{LineMetrics, LogParser, PatternParser};
pub use probe::{HttpProbeFactory, ProbeFactory, StatsProbe, StructuredSample, XmrigApiProbe};
