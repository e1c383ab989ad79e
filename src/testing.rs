// Test Support
//
// Fake miner API server, script-backed launcher and a recording notifier
// shared by the unit tests.

use crate::error::Result;
use crate::launcher::{LaunchSpec, MinerLauncher};
use crate::notification::{NotificationTrigger, Notifier, TriggerKind};
use crate::supervisor::process::lock;
use crate::types::{
    current_timestamp, MinerKind, PerformancePreset, SessionConfig, SessionId, SessionRequest,
    SessionState, SessionStats, SessionSummary,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Minimal HTTP server imitating the XMRig API
pub struct StatsServer {
    port: u16,
    body: Arc<Mutex<String>>,
    failing: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StatsServer {
    pub fn start(body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(Mutex::new(body.to_string()));
        let failing = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let (t_body, t_failing, t_requests, t_stop) =
            (body.clone(), failing.clone(), requests.clone(), stop.clone());
        let worker = thread::spawn(move || {
            for stream in listener.incoming() {
                if t_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(mut stream) = stream else { continue };
                let Ok(request) = read_request(&mut stream) else { continue };
                lock(&t_requests).push(request.clone());

                let (status, payload) = if t_failing.load(Ordering::SeqCst) {
                    ("500 Internal Server Error", "{}".to_string())
                } else if request.starts_with("POST") {
                    ("200 OK", r#"{"id":1,"jsonrpc":"2.0","result":{"status":"OK"}}"#.to_string())
                } else {
                    ("200 OK", lock(&t_body).clone())
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        Self {
            port,
            body,
            failing,
            requests,
            stop,
            worker: Some(worker),
        }
    }

    pub fn summary_url(&self) -> String {
        format!("http://127.0.0.1:{}/2/summary", self.port)
    }

    pub fn control_url(&self) -> String {
        format!("http://127.0.0.1:{}/json_rpc", self.port)
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    pub fn set_body(&self, body: &str) {
        *lock(&self.body) = body.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Launches `/bin/sh -c <script>` instead of a real miner
pub struct ScriptLauncher {
    script: String,
    stats_endpoint: Option<String>,
    control_endpoint: Option<String>,
    released: AtomicUsize,
}

impl ScriptLauncher {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            stats_endpoint: None,
            control_endpoint: None,
            released: AtomicUsize::new(0),
        }
    }

    pub fn with_endpoints(mut self, stats: String, control: Option<String>) -> Self {
        self.stats_endpoint = Some(stats);
        self.control_endpoint = control;
        self
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl MinerLauncher for ScriptLauncher {
    fn launch_spec(&self, _config: &SessionConfig) -> Result<LaunchSpec> {
        Ok(LaunchSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), self.script.clone()],
            env: Vec::new(),
            stats_endpoint: self.stats_endpoint.clone(),
            control_endpoint: self.control_endpoint.clone(),
            api_port: None,
        })
    }

    fn release(&self, _spec: &LaunchSpec) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    triggers: Mutex<Vec<NotificationTrigger>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<TriggerKind> {
        lock(&self.triggers).iter().map(|t| t.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, trigger: &NotificationTrigger) {
        lock(&self.triggers).push(trigger.clone());
    }
}

pub fn request(coin: &str, kind: MinerKind) -> SessionRequest {
    SessionRequest {
        coin_id: coin.to_string(),
        symbol: String::new(),
        algorithm: match kind {
            MinerKind::Xmrig => "rx/0".to_string(),
            MinerKind::CpuminerOpt => "yespower".to_string(),
        },
        miner_kind: Some(kind),
        pool_url: format!("stratum+tcp://{}.pool.example.com:3333", coin),
        wallet: "wallet1".to_string(),
        worker: "rig".to_string(),
        preset: PerformancePreset::Balanced,
        threads_hint: 2,
    }
}

pub fn summary(id: &str) -> SessionSummary {
    let req = request("monero", MinerKind::Xmrig);
    SessionSummary {
        id: SessionId::from(id),
        config: SessionConfig::from_request(&req, req.algorithm.clone(), MinerKind::Xmrig, 2),
        state: SessionState::Running,
        stats: SessionStats::default(),
        pid: Some(1),
        started_at: Some(current_timestamp()),
        suspend_mode: None,
        error: None,
        diagnostics: Vec::new(),
        warnings: Vec::new(),
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

/// Alive and not a zombie; orphans may sit unreaped when init is lazy
pub fn process_running(pid: u32) -> bool {
    let mut sys = sysinfo::System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return false;
    }
    sys.process(pid)
        .map(|process| process.status() != sysinfo::ProcessStatus::Zombie)
        .unwrap_or(false)
}
