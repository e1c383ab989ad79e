// Miner Launcher
//
// Builds the command line for a session: binary location, miner arguments
// and the loopback API port for structured telemetry.

use crate::error::{MinerError, Result};
use crate::supervisor::process::lock;
use crate::types::{MinerKind, PerformancePreset, SessionConfig};
use std::collections::HashSet;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

pub const API_PORT_BASE: u16 = 45580;
pub const API_PORT_RANGE: u16 = 20;

/// Everything needed to spawn one miner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stats_endpoint: Option<String>,
    pub control_endpoint: Option<String>,
    pub api_port: Option<u16>,
}

pub trait MinerLauncher: Send + Sync {
    fn launch_spec(&self, config: &SessionConfig) -> Result<LaunchSpec>;

    /// Give back resources reserved by `launch_spec`
    fn release(&self, _spec: &LaunchSpec) {}
}

/// Launches miners from one directory of binaries
pub struct BinaryDirLauncher {
    bin_dir: PathBuf,
    reserved_ports: Mutex<HashSet<u16>>,
}

impl BinaryDirLauncher {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            reserved_ports: Mutex::new(HashSet::new()),
        }
    }

    pub fn binary_path(&self, kind: MinerKind) -> PathBuf {
        let name = format!("{}{}", kind.binary_stem(), std::env::consts::EXE_SUFFIX);
        self.bin_dir.join(name)
    }

    /// First port in range that is neither reserved nor bound by someone else
    fn allocate_port(&self) -> Result<u16> {
        let mut reserved = lock(&self.reserved_ports);
        for port in API_PORT_BASE..API_PORT_BASE + API_PORT_RANGE {
            if reserved.contains(&port) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                reserved.insert(port);
                debug!(port, "reserved miner API port");
                return Ok(port);
            }
        }
        Err(MinerError::SpawnFailed {
            session_id: None,
            reason: format!(
                "no free API port in {}-{}",
                API_PORT_BASE,
                API_PORT_BASE + API_PORT_RANGE - 1
            ),
        })
    }
}

impl MinerLauncher for BinaryDirLauncher {
    fn launch_spec(&self, config: &SessionConfig) -> Result<LaunchSpec> {
        let program = self.binary_path(config.miner_kind);
        match config.miner_kind {
            MinerKind::Xmrig => {
                let port = self.allocate_port()?;
                Ok(LaunchSpec {
                    program,
                    args: xmrig_args(config, port),
                    env: Vec::new(),
                    stats_endpoint: Some(format!("http://127.0.0.1:{}/2/summary", port)),
                    control_endpoint: Some(format!("http://127.0.0.1:{}/json_rpc", port)),
                    api_port: Some(port),
                })
            }
            MinerKind::CpuminerOpt => Ok(LaunchSpec {
                program,
                args: cpuminer_args(config),
                env: Vec::new(),
                stats_endpoint: None,
                control_endpoint: None,
                api_port: None,
            }),
        }
    }

    fn release(&self, spec: &LaunchSpec) {
        if let Some(port) = spec.api_port {
            lock(&self.reserved_ports).remove(&port);
        }
    }
}

fn cpu_priority(preset: PerformancePreset) -> u8 {
    match preset {
        PerformancePreset::Eco => 1,
        PerformancePreset::Balanced => 2,
        PerformancePreset::Max => 5,
    }
}

pub fn xmrig_args(config: &SessionConfig, api_port: u16) -> Vec<String> {
    let password = if config.worker.is_empty() {
        "x"
    } else {
        config.worker.as_str()
    };
    let mut args = Vec::new();
    push_pair(&mut args, "-o", &config.pool_url);
    push_pair(&mut args, "-u", &config.wallet);
    push_pair(&mut args, "-p", password);
    push_pair(&mut args, "-a", &config.algorithm);
    push_pair(&mut args, "-t", &config.threads_hint.to_string());
    push_pair(&mut args, "--cpu-priority", &cpu_priority(config.preset).to_string());
    args.push("--http-enabled".to_string());
    push_pair(&mut args, "--http-host", "127.0.0.1");
    push_pair(&mut args, "--http-port", &api_port.to_string());
    args.push("--no-color".to_string());
    args
}

pub fn cpuminer_args(config: &SessionConfig) -> Vec<String> {
    let pool = if config.pool_url.contains("://") {
        config.pool_url.clone()
    } else {
        format!("stratum+tcp://{}", config.pool_url)
    };
    let user = if config.worker.is_empty() {
        config.wallet.clone()
    } else {
        format!("{}.{}", config.wallet, config.worker)
    };
    let priority = match config.preset {
        PerformancePreset::Eco => "0",
        PerformancePreset::Balanced => "1",
        PerformancePreset::Max => "2",
    };

    let mut args = Vec::new();
    push_pair(&mut args, "-a", &config.algorithm);
    push_pair(&mut args, "-o", &pool);
    push_pair(&mut args, "-u", &user);
    push_pair(&mut args, "-p", "x");
    push_pair(&mut args, "-t", &config.threads_hint.to_string());
    push_pair(&mut args, "--cpu-priority", priority);
    args
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}
