// Session Manager
//
// Registry of mining sessions and the only place their state changes.
// Admission (consent, validation, duplicates, thread budget) is serialized;
// each session then has its own lock, reader threads and monitor.
//

use super::log_ring::LogPage;
use super::state::SessionSlot;
use super::worker;
use crate::budget::{BudgetStatus, ThreadBudget};
use crate::catalog::{AlgorithmRouter, CoinCatalog, CoinProfile};
use crate::config::{DuplicatePolicy, ManagerConfig};
use crate::error::{MinerError, Result};
use crate::event::{BatchEmitter, EventBus, SessionEvent, Subscription};
use crate::history::{HistoryRecord, HistorySink, JsonlHistorySink};
use crate::launcher::{BinaryDirLauncher, MinerLauncher};
use crate::notification::{LogNotifier, NotificationTrigger, Notifier, TriggerDetector, TriggerKind};
use crate::recovery::{CrashRecoveryState, CrashRecoveryStore, RecoveryRecord};
use crate::supervisor::process::lock;
use crate::supervisor::{
    BinaryVerifier, ChecksumVerifier, PresenceVerifier, ProcessSupervisor, SpawnedProcess,
    StreamKind,
};
use crate::telemetry::{HttpProbeFactory, LogParser, PatternParser, ProbeFactory, TelemetryCollector};
use crate::types::{
    current_timestamp, SessionConfig, SessionId, SessionRequest, SessionState, SessionSummary,
    StopAllReport, StopFailure, SuspendMode,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_LOG_PAGE: usize = 2000;

/// Multi-session orchestration core
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: ManagerConfig,
    consent: AtomicBool,
    registry: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    admission: Mutex<()>,
    monitors: Mutex<HashMap<SessionId, Sender<()>>>,
    supervisor: ProcessSupervisor,
    launcher: Arc<dyn MinerLauncher>,
    catalog: Arc<dyn CoinCatalog>,
    history: Arc<dyn HistorySink>,
    notifier: Arc<dyn Notifier>,
    recovery: CrashRecoveryStore,
    budget: ThreadBudget,
    parser: Arc<dyn LogParser>,
    probes: Arc<dyn ProbeFactory>,
    pub(crate) bus: EventBus,
    pub(crate) batcher: BatchEmitter,
    startup_recovery: Mutex<CrashRecoveryState>,
}

/// Collaborators default to the production implementations
pub struct SessionManagerBuilder {
    config: ManagerConfig,
    launcher: Option<Arc<dyn MinerLauncher>>,
    catalog: Option<Arc<dyn CoinCatalog>>,
    history: Option<Arc<dyn HistorySink>>,
    notifier: Option<Arc<dyn Notifier>>,
    recovery: Option<CrashRecoveryStore>,
    budget: Option<ThreadBudget>,
    verifier: Option<Arc<dyn BinaryVerifier>>,
    parser: Option<Arc<dyn LogParser>>,
    probes: Option<Arc<dyn ProbeFactory>>,
}

impl SessionManagerBuilder {
    pub fn launcher(mut self, launcher: Arc<dyn MinerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CoinCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn recovery(mut self, recovery: CrashRecoveryStore) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn budget(mut self, budget: ThreadBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn BinaryVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn LogParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn probes(mut self, probes: Arc<dyn ProbeFactory>) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        let config = self.config.normalized();
        let data_dir = config.data_dir();

        let verifier: Arc<dyn BinaryVerifier> = match (self.verifier, &config.checksums_file) {
            (Some(verifier), _) => verifier,
            (None, Some(path)) => Arc::new(ChecksumVerifier::from_file(path)?),
            (None, None) => Arc::new(PresenceVerifier),
        };
        let recovery = self
            .recovery
            .unwrap_or_else(|| CrashRecoveryStore::in_dir(&data_dir));
        let startup_recovery = recovery.check();

        let bus = EventBus::new();
        let batcher = BatchEmitter::start(bus.clone(), config.batch_interval());

        let inner = Inner {
            consent: AtomicBool::new(config.consent),
            registry: RwLock::new(HashMap::new()),
            admission: Mutex::new(()),
            monitors: Mutex::new(HashMap::new()),
            supervisor: ProcessSupervisor::new(verifier)?,
            launcher: self
                .launcher
                .unwrap_or_else(|| Arc::new(BinaryDirLauncher::new(config.bin_dir()))),
            catalog: self.catalog.unwrap_or_else(|| Arc::new(AlgorithmRouter)),
            history: self
                .history
                .unwrap_or_else(|| Arc::new(JsonlHistorySink::in_dir(&data_dir))),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            recovery,
            budget: self.budget.unwrap_or_else(ThreadBudget::detect),
            parser: self.parser.unwrap_or_else(|| Arc::new(PatternParser)),
            probes: self.probes.unwrap_or_else(|| Arc::new(HttpProbeFactory)),
            bus,
            batcher,
            startup_recovery: Mutex::new(startup_recovery),
            config,
        };

        info!(
            cores = inner.budget.cores(),
            budget_mode = ?inner.config.budget.mode,
            consent = inner.config.consent,
            "session manager ready"
        );
        Ok(SessionManager {
            inner: Arc::new(inner),
        })
    }
}

impl SessionManager {
    pub fn builder(config: ManagerConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            launcher: None,
            catalog: None,
            history: None,
            notifier: None,
            recovery: None,
            budget: None,
            verifier: None,
            parser: None,
            probes: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    // ---- consent ----

    pub fn grant_consent(&self) {
        self.inner.consent.store(true, Ordering::SeqCst);
        info!("mining consent granted");
    }

    /// Withdraw consent; every running session is stopped
    pub fn revoke_consent(&self) -> StopAllReport {
        self.inner.consent.store(false, Ordering::SeqCst);
        info!("mining consent revoked, stopping all sessions");
        self.stop_all()
    }

    pub fn consent_granted(&self) -> bool {
        self.inner.consent.load(Ordering::SeqCst)
    }

    // ---- lifecycle ----

    /// Admit and spawn a new session
    pub fn start(&self, request: SessionRequest) -> Result<SessionId> {
        let inner = &self.inner;
        if !self.consent_granted() {
            warn!(coin = %request.coin_id, "start rejected: no consent");
            return Err(MinerError::ConsentRequired);
        }
        request.validate()?;
        let profile = self.resolve_profile(&request)?;

        let _admission = lock(&inner.admission);

        let mut active_keys = Vec::new();
        let mut requests = Vec::new();
        for slot in inner.slots() {
            let cell = slot.lock();
            if cell.state.has_live_process() {
                active_keys.push((slot.config.identity_key(), slot.id.clone()));
            }
            if cell.holds_budget() {
                requests.push(slot.config.threads_hint);
            }
        }

        let mode = inner.config.budget.mode;
        let preset = inner.config.budget.preset;
        let threads = inner
            .budget
            .resolve_hint(mode, request.preset, requests.len(), request.threads_hint);
        let config = SessionConfig::from_request(
            &request,
            profile.algorithm,
            profile.miner_kind,
            threads,
        );

        let mut warnings: Vec<String> = profile.warning.into_iter().collect();
        let key = config.identity_key();
        if let Some((_, existing)) = active_keys.iter().find(|(k, _)| *k == key) {
            match inner.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(coin = %config.coin_id, %existing, "start rejected: duplicate session");
                    return Err(MinerError::DuplicateSession {
                        coin: config.coin_id.clone(),
                        pool: config.pool_url.clone(),
                        existing: existing.clone(),
                    });
                }
                DuplicatePolicy::Warn => warnings.push(format!(
                    "session {} already mines {} on {} with this wallet",
                    existing, config.coin_id, config.pool_url
                )),
            }
        }

        if let Err(e) = inner.budget.admit(mode, preset, &requests, threads) {
            warn!(coin = %config.coin_id, threads, "start rejected: {}", e);
            return Err(e);
        }
        requests.push(threads);
        let status = inner.budget.status(preset, &requests);
        if status.is_overcommitted {
            warnings.push(format!(
                "CPU overcommitted: {} threads requested, budget is {}",
                status.total_requested, status.budget_threads
            ));
        }

        let spec = inner.launcher.launch_spec(&config)?;
        if let Err(e) = inner.supervisor.verify(&spec.program) {
            inner.launcher.release(&spec);
            warn!(binary = %spec.program.display(), "start rejected: {}", e);
            return Err(e);
        }

        // Everything checked; only now does the session get an identity.
        let id: SessionId = Uuid::new_v4().to_string();
        let telemetry =
            TelemetryCollector::new(config.miner_kind.telemetry_mode(), inner.parser.clone());
        let slot = Arc::new(SessionSlot::new(
            id.clone(),
            config,
            telemetry,
            inner.config.log_capacity,
            TriggerDetector::new(inner.config.hashrate_drop_threshold_pct),
            warnings,
        ));
        inner.write_registry().insert(id.clone(), slot.clone());

        let spawned = match inner.supervisor.launch(&spec.program, &spec.args, &spec.env) {
            Ok(spawned) => spawned,
            Err(e) => {
                let reason = match e {
                    MinerError::SpawnFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                inner.launcher.release(&spec);
                inner.record_spawn_failure(&slot, &reason);
                return Err(MinerError::SpawnFailed {
                    session_id: Some(id),
                    reason,
                });
            }
        };

        let probe = match &spec.stats_endpoint {
            Some(url) => match inner.probes.connect(
                url,
                spec.control_endpoint.as_deref(),
                inner.config.http_timeout(),
            ) {
                Ok(probe) => Some(probe),
                Err(e) => {
                    warn!(session = %id, "stats endpoint unusable, falling back to logs: {}", e);
                    None
                }
            },
            None => None,
        };

        let SpawnedProcess {
            handle,
            stdout,
            stderr,
        } = spawned;
        let process = Arc::new(handle);
        let pid = process.pid();

        let summary = {
            let mut cell = slot.lock();
            if let Err(e) = cell.transition(SessionState::Running, "start") {
                // stopped while the process was being spawned
                drop(cell);
                let _ = process.shutdown(inner.config.shutdown_timeout());
                inner.launcher.release(&spec);
                return Err(e);
            }
            cell.process = Some(process);
            cell.launch = Some(spec);
            cell.probe = probe;
            cell.started_at = Some(current_timestamp());
            cell.started_instant = Some(Instant::now());
            slot.summary(&cell)
        };

        if let Some(stdout) = stdout {
            worker::attach_stream(&slot, &inner.bus, StreamKind::Stdout, stdout);
        }
        if let Some(stderr) = stderr {
            worker::attach_stream(&slot, &inner.bus, StreamKind::Stderr, stderr);
        }
        match worker::spawn_monitor(&self.inner, slot.clone()) {
            Ok(stop_tx) => {
                lock(&inner.monitors).insert(id.clone(), stop_tx);
            }
            Err(e) => error!(session = %id, "failed to start monitor: {}", e),
        }

        if let Err(e) = inner
            .recovery
            .record(&RecoveryRecord::from_config(&id, &slot.config))
        {
            warn!("failed to write crash recovery record: {}", e);
        }

        info!(
            session = %id,
            coin = %slot.config.coin_id,
            algorithm = %slot.config.algorithm,
            pid,
            threads,
            "session started"
        );
        inner.bus.emit_session_created(summary);
        Ok(id)
    }

    fn resolve_profile(&self, request: &SessionRequest) -> Result<CoinProfile> {
        let catalog = &self.inner.catalog;
        match request.miner_kind {
            // A pinned miner bypasses routing when the algorithm is given.
            Some(kind) if !request.algorithm.trim().is_empty() => Ok(CoinProfile {
                algorithm: request.algorithm.trim().to_lowercase(),
                miner_kind: kind,
                warning: None,
            }),
            Some(kind) => {
                let mut profile = catalog.resolve(&request.coin_id, &request.algorithm)?;
                profile.miner_kind = kind;
                Ok(profile)
            }
            None => catalog.resolve(&request.coin_id, &request.algorithm),
        }
    }

    /// Graceful stop, then removal from the registry
    pub fn stop(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let slot = inner
            .slot(id)
            .ok_or_else(|| MinerError::NotFound(id.to_string()))?;

        let (process, exited_group, summary) = {
            let mut cell = slot.lock();
            if cell.state == SessionState::Stopping {
                debug!(session = %id, "stop already in progress");
                return Ok(());
            }
            cell.transition(SessionState::Stopping, "stop")?;
            cell.stop_requested = true;
            (cell.process.clone(), cell.exited_group, slot.summary(&cell))
        };
        inner.stop_monitor(id);
        inner.bus.emit_session_updated(summary);

        // A crashed miner has no handle left, only its process group
        let timeout = inner.config.shutdown_timeout();
        let outcome = match (&process, exited_group) {
            (Some(process), _) => inner.supervisor.shutdown(process, timeout).map(|_| ()),
            (None, Some(pgid)) => inner.supervisor.clear_group(pgid, timeout),
            (None, None) => Ok(()),
        };
        if let Err(e) = outcome {
            let pid = process.as_ref().map(|p| p.pid()).or(exited_group);
            let message = format!("miner could not be stopped: {}", e);
            let summary = {
                let mut cell = slot.lock();
                let _ = cell.transition(SessionState::Error, "stop");
                cell.error = Some(message.clone());
                cell.stop_requested = false;
                slot.summary(&cell)
            };
            error!(session = %id, ?pid, "{}", message);
            inner.notify(TriggerKind::OrphanedProcess, &slot, message, json!({ "pid": pid }));
            inner.bus.emit_session_updated(summary);
            return Err(e);
        }
        drop(process);

        let (summary, record, launch) = {
            let mut cell = slot.lock();
            cell.transition(SessionState::Stopped, "stop")?;
            cell.process = None;
            cell.exited_group = None;
            cell.probe = None;
            let stats = cell.telemetry.stats();
            let record = cell.started_at.map(|started| {
                HistoryRecord::new(
                    id,
                    &slot.config,
                    started,
                    current_timestamp(),
                    stats.accepted,
                    stats.rejected,
                    cell.telemetry.lifetime_average(),
                )
            });
            let launch = cell.launch.take();
            (slot.summary(&cell), record, launch)
        };

        inner.write_registry().remove(id);
        inner.batcher.forget(id);
        if let Some(spec) = launch {
            inner.launcher.release(&spec);
        }
        if let Some(record) = record {
            if let Err(e) = inner.history.record(&record) {
                warn!(session = %id, "failed to write history record: {}", e);
            }
        }
        inner.refresh_recovery();

        info!(session = %id, accepted = summary.stats.accepted, "session stopped");
        inner.bus.emit_session_stopped(summary);
        Ok(())
    }

    /// Running -> Suspended. A real pause where the miner supports one,
    /// otherwise only telemetry polling stops.
    pub fn suspend(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let slot = inner
            .slot(id)
            .ok_or_else(|| MinerError::NotFound(id.to_string()))?;

        let (control, process) = {
            let mut cell = slot.lock();
            cell.transition(SessionState::Suspended, "suspend")?;
            cell.suspend_mode = Some(SuspendMode::TelemetryOnly);
            let has_control = cell
                .launch
                .as_ref()
                .is_some_and(|l| l.control_endpoint.is_some());
            let control = if has_control { cell.probe.clone() } else { None };
            (control, cell.process.clone())
        };

        let mut warning = None;
        let mode = if let Some(probe) = control {
            match probe.pause() {
                Ok(()) => Some(SuspendMode::PausedViaApi),
                Err(e) => {
                    warning = Some(format!("pause request failed, miner keeps hashing: {}", e));
                    None
                }
            }
        } else if inner.config.suspend_with_signal {
            match process.as_ref().map(|p| p.pause()) {
                Some(Ok(())) => Some(SuspendMode::PausedViaSignal),
                Some(Err(e)) => {
                    warning = Some(format!("could not stop process, miner keeps hashing: {}", e));
                    None
                }
                None => None,
            }
        } else {
            None
        };

        let summary = {
            let mut cell = slot.lock();
            if cell.state == SessionState::Suspended {
                if let Some(mode) = mode {
                    cell.suspend_mode = Some(mode);
                }
                if let Some(warning) = &warning {
                    cell.warnings.push(warning.clone());
                }
            }
            slot.summary(&cell)
        };
        if let Some(warning) = warning {
            warn!(session = %id, "{}", warning);
        }

        info!(session = %id, mode = ?summary.suspend_mode, "session suspended");
        inner.batcher.submit(summary.clone());
        inner.bus.emit_session_updated(summary);
        Ok(())
    }

    /// Suspended -> Running, undoing whatever the suspend did
    pub fn resume(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let slot = inner
            .slot(id)
            .ok_or_else(|| MinerError::NotFound(id.to_string()))?;

        let (mode, probe, process) = {
            let cell = slot.lock();
            if cell.state != SessionState::Suspended {
                return Err(MinerError::InvalidTransition {
                    from: cell.state,
                    action: "resume",
                });
            }
            (cell.suspend_mode, cell.probe.clone(), cell.process.clone())
        };

        match mode {
            Some(SuspendMode::PausedViaApi) => {
                if let Some(probe) = probe {
                    probe.resume()?;
                }
            }
            Some(SuspendMode::PausedViaSignal) => {
                if let Some(process) = process {
                    process.resume()?;
                }
            }
            Some(SuspendMode::TelemetryOnly) | None => {}
        }

        let summary = {
            let mut cell = slot.lock();
            cell.transition(SessionState::Running, "resume")?;
            slot.summary(&cell)
        };
        if let Err(e) = inner
            .recovery
            .record(&RecoveryRecord::from_config(id, &slot.config))
        {
            warn!("failed to write crash recovery record: {}", e);
        }

        info!(session = %id, "session resumed");
        inner.batcher.submit(summary.clone());
        inner.bus.emit_session_updated(summary);
        Ok(())
    }

    /// Stop every session concurrently; failures are reported per session
    pub fn stop_all(&self) -> StopAllReport {
        let ids: Vec<SessionId> = self.inner.read_registry().keys().cloned().collect();

        let results: Vec<(SessionId, thread::Result<Result<()>>)> = thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| (id.clone(), scope.spawn(move || self.stop(id))))
                .collect();
            handles
                .into_iter()
                .map(|(id, handle)| (id, handle.join()))
                .collect()
        });

        let mut report = StopAllReport::default();
        for (id, result) in results {
            match result {
                Ok(Ok(())) | Ok(Err(MinerError::NotFound(_))) => report.stopped.push(id),
                Ok(Err(e)) => report.failed.push(StopFailure {
                    session_id: id,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
                Err(_) => report.failed.push(StopFailure {
                    session_id: id,
                    kind: "internal".to_string(),
                    message: "stop panicked".to_string(),
                }),
            }
        }

        if report.is_clean() {
            if let Err(e) = self.inner.recovery.clear() {
                warn!("failed to clear crash recovery record: {}", e);
            }
        }
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "all sessions stopped"
        );
        self.inner.bus.emit_session_all_stopped(report.clone());
        report
    }

    /// Graceful exit: stop everything and flush pending updates
    pub fn shutdown(&self) -> StopAllReport {
        let report = self.stop_all();
        self.inner.batcher.flush();
        report
    }

    // ---- queries ----

    /// Point-in-time snapshot of every session, oldest first
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = {
            let registry = self.inner.read_registry();
            registry.values().map(|slot| slot.snapshot()).collect()
        };
        summaries.sort_by(|a, b| {
            a.config
                .created_at
                .cmp(&b.config.created_at)
                .then_with(|| a.started_at.cmp(&b.started_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    pub fn get(&self, id: &str) -> Result<SessionSummary> {
        self.inner
            .slot(id)
            .map(|slot| slot.snapshot())
            .ok_or_else(|| MinerError::NotFound(id.to_string()))
    }

    /// Incremental log tail; `cursor` comes from the previous page
    pub fn get_logs(&self, id: &str, cursor: u64, limit: usize) -> Result<LogPage> {
        let slot = self
            .inner
            .slot(id)
            .ok_or_else(|| MinerError::NotFound(id.to_string()))?;
        let cell = slot.lock();
        Ok(cell.logs.read(cursor, limit.clamp(1, MAX_LOG_PAGE)))
    }

    /// Thread budget over Running and Suspended sessions
    pub fn budget_status(&self) -> BudgetStatus {
        let requests: Vec<u32> = self
            .inner
            .slots()
            .iter()
            .filter(|slot| slot.lock().holds_budget())
            .map(|slot| slot.config.threads_hint)
            .collect();
        self.inner
            .budget
            .status(self.inner.config.budget.preset, &requests)
    }

    /// Single-session compatibility view: any live session
    pub fn is_mining(&self) -> bool {
        self.inner
            .slots()
            .iter()
            .any(|slot| slot.lock().state.has_live_process())
    }

    pub fn subscribe(&self, scope: Subscription) -> Receiver<SessionEvent> {
        self.inner.bus.subscribe(scope)
    }

    /// What the recovery slot said at startup
    pub fn recovery_state(&self) -> CrashRecoveryState {
        lock(&self.inner.startup_recovery).clone()
    }

    /// Acknowledge an unclean-shutdown report
    pub fn clear_recovery(&self) -> Result<()> {
        *lock(&self.inner.startup_recovery) = CrashRecoveryState::default();
        match self.inner.latest_live_slot() {
            Some(slot) => self
                .inner
                .recovery
                .record(&RecoveryRecord::from_config(&slot.id, &slot.config)),
            None => self.inner.recovery.clear(),
        }
    }
}

impl Inner {
    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.read_registry().get(id).cloned()
    }

    fn slots(&self) -> Vec<Arc<SessionSlot>> {
        self.read_registry().values().cloned().collect()
    }

    fn stop_monitor(&self, id: &str) {
        if let Some(stop_tx) = lock(&self.monitors).remove(id) {
            let _ = stop_tx.send(());
        }
    }

    fn latest_live_slot(&self) -> Option<Arc<SessionSlot>> {
        self.slots()
            .into_iter()
            .filter(|slot| slot.lock().state.has_live_process())
            .max_by_key(|slot| slot.config.created_at)
    }

    /// Park a session whose miner never spawned in Error. Returns false when
    /// a concurrent stop already claimed it; nothing is announced then.
    pub(crate) fn record_spawn_failure(&self, slot: &SessionSlot, reason: &str) -> bool {
        let summary = {
            let mut cell = slot.lock();
            if cell.stop_requested {
                debug!(session = %slot.id, "spawn failed after stop request");
                return false;
            }
            if let Err(e) = cell.transition(SessionState::Error, "start") {
                debug!(session = %slot.id, "{}", e);
                return false;
            }
            cell.error = Some(format!("failed to start miner: {}", reason));
            slot.summary(&cell)
        };
        error!(session = %slot.id, "miner spawn failed: {}", reason);
        self.bus.emit_session_created(summary);
        true
    }

    /// Keep the recovery slot pointing at a live session, or clear it
    pub(crate) fn refresh_recovery(&self) {
        let result = match self.latest_live_slot() {
            Some(slot) => self
                .recovery
                .record(&RecoveryRecord::from_config(&slot.id, &slot.config)),
            None => self.recovery.clear(),
        };
        if let Err(e) = result {
            warn!("failed to update crash recovery record: {}", e);
        }
    }

    pub(crate) fn notify(
        &self,
        kind: TriggerKind,
        slot: &SessionSlot,
        message: String,
        data: serde_json::Value,
    ) {
        let trigger =
            NotificationTrigger::new(kind, &slot.id, &slot.config.symbol, message, data);
        self.notifier.notify(&trigger);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in registry.values() {
            // Dropping the last handle kills the process group.
            let process = slot.lock().process.take();
            drop(process);
        }
    }
}
