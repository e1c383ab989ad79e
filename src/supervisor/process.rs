// Process Supervisor
//
// Owns the OS side of a miner: spawn with captured pipes, signals to the
// child's process group, graceful-then-forced shutdown and exit detection.
// A `ProcessHandle` kills its process group on drop, so no exit path leaves
// a miner or anything it forked running.

use super::integrity::BinaryVerifier;
use crate::error::{MinerError, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const GROUP_CLEAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Freshly spawned child with its output pipes
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub graceful: bool,
    pub exit: String,
}

struct SpawnRequest {
    binary: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    reply: Sender<Result<SpawnedProcess>>,
}

/// Spawns and stops miner processes.
///
/// Children are forked from one long-lived thread owned by the supervisor. On
/// Linux the parent-death signal is bound to the forking thread, so miners die
/// together with the supervisor rather than with whichever caller started them.
pub struct ProcessSupervisor {
    verifier: Arc<dyn BinaryVerifier>,
    spawner: Mutex<Sender<SpawnRequest>>,
}

impl ProcessSupervisor {
    pub fn new(verifier: Arc<dyn BinaryVerifier>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<SpawnRequest>();
        thread::Builder::new()
            .name("miner-spawner".to_string())
            .spawn(move || {
                for request in rx {
                    let result = spawn_child(&request.binary, &request.args, &request.env);
                    let _ = request.reply.send(result);
                }
                debug!("spawner thread exiting");
            })?;

        Ok(Self {
            verifier,
            spawner: Mutex::new(tx),
        })
    }

    /// Consult the integrity collaborator
    pub fn verify(&self, binary: &Path) -> Result<()> {
        self.verifier.verify(binary)
    }

    /// Verify, then spawn
    pub fn spawn(
        &self,
        binary: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<SpawnedProcess> {
        self.verify(binary)?;
        self.launch(binary, args, env)
    }

    /// Spawn an already verified binary
    pub fn launch(
        &self,
        binary: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<SpawnedProcess> {
        let (reply, response) = mpsc::channel();
        let request = SpawnRequest {
            binary: binary.to_path_buf(),
            args: args.to_vec(),
            env: env.to_vec(),
            reply,
        };
        let spawner_gone = || MinerError::SpawnFailed {
            session_id: None,
            reason: "spawner thread is not running".to_string(),
        };
        lock(&self.spawner).send(request).map_err(|_| spawner_gone())?;
        response.recv().map_err(|_| spawner_gone())?
    }

    /// Graceful termination bounded by `timeout`, then forced kill
    pub fn shutdown(&self, handle: &ProcessHandle, timeout: Duration) -> Result<ShutdownReport> {
        handle.shutdown(timeout)
    }

    /// SIGKILL whatever is left in the group of an already reaped miner and
    /// wait until no live member remains
    pub fn clear_group(&self, pgid: u32, timeout: Duration) -> Result<()> {
        clear_group(pgid, timeout)
    }
}

fn spawn_child(binary: &Path, args: &[String], env: &[(String, String)]) -> Result<SpawnedProcess> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Miners look for their config and resource files next to the binary.
    if let Some(dir) = binary.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(target_os = "linux")]
    set_parent_death_signal(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| MinerError::SpawnFailed {
        session_id: None,
        reason: format!("{}: {}", binary.display(), e),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pid = child.id();
    info!(pid, binary = %binary.display(), "miner spawned");

    Ok(SpawnedProcess {
        handle: ProcessHandle::new(child),
        stdout,
        stderr,
    })
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    let parent = std::process::id() as libc::pid_t;
    // SAFETY: runs in the forked child before exec and only makes
    // async-signal-safe libc calls.
    unsafe {
        cmd.pre_exec(move || {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Parent already gone between fork and prctl
            if libc::getppid() != parent {
                return Err(std::io::Error::from_raw_os_error(libc::ESRCH));
            }
            Ok(())
        });
    }
}

struct ChildSlot {
    child: Child,
    status: Option<ExitStatus>,
}

/// Kill guard for one child process
pub struct ProcessHandle {
    pid: u32,
    slot: Mutex<ChildSlot>,
    paused: AtomicBool,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            slot: Mutex::new(ChildSlot {
                child,
                status: None,
            }),
            paused: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Non-blocking exit check; the status is remembered once seen
    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        let mut slot = lock(&self.slot);
        if let Some(status) = slot.status {
            return Ok(Some(status));
        }
        let status = slot.child.try_wait()?;
        slot.status = status;
        Ok(status)
    }

    /// Stop the process group in place (SIGSTOP)
    #[cfg(unix)]
    pub fn pause(&self) -> Result<()> {
        signal_group(self.pid, Signal::SIGSTOP)?;
        self.paused.store(true, Ordering::SeqCst);
        debug!(pid = self.pid, "miner paused");
        Ok(())
    }

    #[cfg(unix)]
    pub fn resume(&self) -> Result<()> {
        signal_group(self.pid, Signal::SIGCONT)?;
        self.paused.store(false, Ordering::SeqCst);
        debug!(pid = self.pid, "miner resumed");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn pause(&self) -> Result<()> {
        Err(MinerError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process suspension needs unix signals",
        )))
    }

    #[cfg(not(unix))]
    pub fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Terminate, wait up to `timeout`, force-kill, then confirm the
    /// process is gone from the OS process table
    pub fn shutdown(&self, timeout: Duration) -> Result<ShutdownReport> {
        let (status, graceful) = match self.try_wait()? {
            Some(status) => (status, true),
            None => {
                self.request_termination()?;
                match self.wait_for_exit(timeout)? {
                    Some(status) => (status, true),
                    None => {
                        warn!(pid = self.pid, ?timeout, "miner ignored termination, killing");
                        (self.force_kill()?, false)
                    }
                }
            }
        };

        self.confirm_gone()?;
        clear_group(self.pid, GROUP_CLEAR_TIMEOUT)?;

        let exit = describe_exit(&status);
        info!(pid = self.pid, graceful, %exit, "miner stopped");
        Ok(ShutdownReport { graceful, exit })
    }

    #[cfg(unix)]
    fn request_termination(&self) -> Result<()> {
        signal_group(self.pid, Signal::SIGTERM)?;
        // A stopped process only acts on SIGTERM once continued.
        if self.paused.swap(false, Ordering::SeqCst) {
            signal_group(self.pid, Signal::SIGCONT)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_termination(&self) -> Result<()> {
        let mut slot = lock(&self.slot);
        match slot.child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn force_kill(&self) -> Result<ExitStatus> {
        let mut slot = lock(&self.slot);
        if let Some(status) = slot.status {
            return Ok(status);
        }
        #[cfg(unix)]
        let _ = signal_group(self.pid, Signal::SIGKILL);
        if let Err(e) = slot.child.kill() {
            debug!(pid = self.pid, "kill after SIGKILL: {}", e);
        }
        let status = slot.child.wait()?;
        slot.status = Some(status);
        Ok(status)
    }

    /// Kill anything the miner left behind in its process group
    pub fn sweep_group(&self) {
        #[cfg(unix)]
        let _ = signal_group(self.pid, Signal::SIGKILL);
    }

    fn confirm_gone(&self) -> Result<()> {
        let mut sys = System::new();
        if sys.refresh_process(sysinfo::Pid::from_u32(self.pid)) {
            error!(pid = self.pid, "miner still in process table after kill");
            return Err(MinerError::OrphanedProcess { pid: self.pid });
        }
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let pid = self.pid;
        // Descendants outlive a reaped leader, so the group is always swept.
        #[cfg(unix)]
        let _ = signal_group(pid, Signal::SIGKILL);
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if slot.status.is_some() {
            return;
        }
        if let Ok(Some(_)) = slot.child.try_wait() {
            return;
        }
        warn!(pid, "process handle dropped with miner alive, killing");
        let _ = slot.child.kill();
        let _ = slot.child.wait();
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(MinerError::Io(std::io::Error::from(e))),
    }
}

#[cfg(unix)]
fn clear_group(pgid: u32, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        signal_group(pgid, Signal::SIGKILL)?;
        let survivors = live_group_members(pgid);
        let Some(&first) = survivors.first() else {
            return Ok(());
        };
        if Instant::now() >= deadline {
            error!(pgid, ?survivors, "process group survived SIGKILL");
            return Err(MinerError::OrphanedProcess { pid: first });
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(not(unix))]
fn clear_group(_pgid: u32, _timeout: Duration) -> Result<()> {
    Ok(())
}

/// Members of the group that are not zombies waiting for their new parent
#[cfg(unix)]
fn live_group_members(pgid: u32) -> Vec<u32> {
    let group = Pid::from_raw(pgid as i32);
    if let Err(nix::errno::Errno::ESRCH) = killpg(group, None::<Signal>) {
        return Vec::new();
    }
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .iter()
        .filter(|(_, process)| process.status() != sysinfo::ProcessStatus::Zombie)
        .map(|(pid, _)| pid.as_u32())
        .filter(|pid| nix::unistd::getpgid(Some(Pid::from_raw(*pid as i32))) == Ok(group))
        .collect()
}

/// Human-readable exit status
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return match Signal::try_from(sig) {
                Ok(signal) => format!("killed by {}", signal.as_str()),
                Err(_) => format!("killed by signal {}", sig),
            };
        }
    }
    "exited".to_string()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
