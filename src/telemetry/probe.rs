// Stats Probe
//
// Structured telemetry source: the miner's own HTTP API. XMRig serves
// `/2/summary` for stats and `/json_rpc` for pause/resume.

use crate::error::{MinerError, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One successful structured poll
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredSample {
    pub hashrate_current: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub difficulty: Option<f64>,
    pub uptime_secs: u64,
    pub pool: Option<String>,
    pub pool_connected: bool,
}

/// Machine-readable stats and control interface of a running miner
pub trait StatsProbe: Send + Sync {
    fn poll(&self) -> Result<StructuredSample>;

    /// Ask the miner to stop hashing without exiting
    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct XmrigSummary {
    uptime: u64,
    hashrate: XmrigHashrate,
    results: XmrigResults,
    connection: XmrigConnection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct XmrigHashrate {
    total: Vec<Option<f64>>, // 10s, 60s, 15m
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct XmrigResults {
    diff_current: Option<f64>,
    shares_good: u64,
    shares_total: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct XmrigConnection {
    pool: String,
    uptime: u64,
    diff: Option<f64>,
}

impl XmrigSummary {
    fn into_sample(self) -> StructuredSample {
        let hashrate_current = self
            .hashrate
            .total
            .iter()
            .flatten()
            .copied()
            .next()
            .unwrap_or(0.0);
        let pool = Some(self.connection.pool).filter(|p| !p.is_empty());

        StructuredSample {
            hashrate_current,
            accepted: self.results.shares_good,
            rejected: self
                .results
                .shares_total
                .saturating_sub(self.results.shares_good),
            difficulty: self
                .results
                .diff_current
                .or(self.connection.diff)
                .filter(|d| *d > 0.0),
            uptime_secs: self.uptime,
            pool_connected: pool.is_some() && self.connection.uptime > 0,
            pool,
        }
    }
}

/// XMRig HTTP API client
pub struct XmrigApiProbe {
    client: Client,
    summary_url: String,
    control_url: Option<String>,
}

impl XmrigApiProbe {
    pub fn new(summary_url: String, control_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            summary_url,
            control_url,
        })
    }

    fn rpc(&self, method: &str) -> Result<()> {
        let url = self.control_url.as_deref().ok_or_else(|| {
            MinerError::TelemetryUnavailable("miner has no control endpoint".to_string())
        })?;
        debug!(%url, method, "sending json-rpc");
        self.client
            .post(url)
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method }))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl StatsProbe for XmrigApiProbe {
    fn poll(&self) -> Result<StructuredSample> {
        let summary: XmrigSummary = self
            .client
            .get(&self.summary_url)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(summary.into_sample())
    }

    fn pause(&self) -> Result<()> {
        self.rpc("pause")
    }

    fn resume(&self) -> Result<()> {
        self.rpc("resume")
    }
}

/// Creates a probe for a freshly launched miner
pub trait ProbeFactory: Send + Sync {
    fn connect(
        &self,
        stats_url: &str,
        control_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn StatsProbe>>;
}

/// Default factory: XMRig-compatible HTTP API
pub struct HttpProbeFactory;

impl ProbeFactory for HttpProbeFactory {
    fn connect(
        &self,
        stats_url: &str,
        control_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn StatsProbe>> {
        let probe = XmrigApiProbe::new(
            stats_url.to_string(),
            control_url.map(str::to_string),
            timeout,
        )?;
        Ok(Arc::new(probe))
    }
}
