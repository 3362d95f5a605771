//! Experiment orchestration: sequences prior-state cleanup, reset,
//! injection, traffic trigger, and collection, and guarantees anomaly
//! cleanup on every path that reached injection.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::catalog::{self, AnomalyEntry, AnomalyKey, InjectionKind};
use crate::collector::{CollectMode, Collector, ScriptCollector};
use crate::config::{Config, TimingConfig};
use crate::engine::{BladeEngine, FaultAction, FaultEngine};
use crate::error::{ExperimentError, Result};
use crate::monitor::{EndpointProbeMonitor, MonitorTask, ResponseMonitor};
use crate::registry::{FaultHandle, FaultHandleRegistry};
use crate::runtime::{DockerComposeRuntime, ServiceRuntime};
use crate::traffic::{LoadDriver, ReplayDriver, TrafficDriver, TriggerMode};

/// Correlation record for one experiment. `experiment_name` is the key
/// threaded through every collector invocation; nothing outlives the run
/// beyond logs and collected artifacts.
#[derive(Debug, Clone)]
pub struct ExperimentRecord {
    pub key: AnomalyKey,
    pub display_name: &'static str,
    pub started_at: DateTime<Utc>,
    pub experiment_name: String,
}

impl ExperimentRecord {
    fn new(entry: &AnomalyEntry) -> Self {
        let started_at = Utc::now();
        let experiment_name = format!("{}_{}", entry.key, started_at.format("%Y%m%d_%H%M%S"));
        Self {
            key: entry.key,
            display_name: entry.display_name,
            started_at,
            experiment_name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub mode: TriggerMode,
    pub iterations: u32,
    pub inter_iteration_delay_secs: u64,
    pub timing: TimingConfig,
    pub service_name_pattern: String,
    pub network_interface: String,
    pub cache_port: u16,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.trigger.mode,
            iterations: config.trigger.iterations,
            inter_iteration_delay_secs: config.trigger.inter_iteration_delay_secs,
            timing: config.timing.clone(),
            service_name_pattern: config.service_name_pattern.clone(),
            network_interface: config.network_interface.clone(),
            cache_port: config.cache_port,
        }
    }
}

/// Best-effort destroy of the engine fault if the runner unwinds before the
/// explicit cleanup step disarms it. The normal path never relies on this.
struct FaultTeardownGuard {
    engine: Arc<dyn FaultEngine>,
    handle: Option<FaultHandle>,
}

impl FaultTeardownGuard {
    fn new(engine: Arc<dyn FaultEngine>) -> Self {
        Self {
            engine,
            handle: None,
        }
    }

    fn arm(&mut self, handle: FaultHandle) {
        self.handle = Some(handle);
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for FaultTeardownGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(fault = %handle.id, "teardown guard destroying fault after abnormal exit");
            let _ = self
                .engine
                .destroy(&handle.id, handle.requires_elevated_destroy);
        }
    }
}

pub struct ExperimentRunner {
    runtime: Arc<dyn ServiceRuntime>,
    engine: Arc<dyn FaultEngine>,
    collector: Arc<dyn Collector>,
    driver: Arc<dyn TrafficDriver>,
    monitor: Option<Arc<dyn ResponseMonitor>>,
    settings: RunnerSettings,
    registry: FaultHandleRegistry,
}

impl ExperimentRunner {
    pub fn new(
        runtime: Arc<dyn ServiceRuntime>,
        engine: Arc<dyn FaultEngine>,
        collector: Arc<dyn Collector>,
        driver: Arc<dyn TrafficDriver>,
        monitor: Option<Arc<dyn ResponseMonitor>>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runtime,
            engine,
            collector,
            driver,
            monitor,
            settings,
            registry: FaultHandleRegistry::new(),
        }
    }

    /// Builds a runner with the production adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let runtime = Arc::new(DockerComposeRuntime::new(
            config.service_dir.clone(),
            config.compose_file.clone(),
            config.seed_command.clone(),
        ));
        let engine = Arc::new(BladeEngine::new(config.engine_bin.clone()));
        let collector = Arc::new(ScriptCollector::new(config.collector_script.clone()));
        let driver: Arc<dyn TrafficDriver> = match config.trigger.mode {
            TriggerMode::ScriptedReplay => Arc::new(ReplayDriver::new(
                config.replay_command.clone(),
                config.service_dir.clone(),
            )),
            TriggerMode::RateControlledLoad => {
                Arc::new(LoadDriver::new(config.trigger.load.clone()))
            }
        };
        let monitor: Option<Arc<dyn ResponseMonitor>> = if config.monitor.enabled {
            Some(Arc::new(EndpointProbeMonitor::new(
                config.monitor.endpoints.clone(),
                Duration::from_secs(config.monitor.sample_interval_secs),
                config.output_dir.clone(),
            )))
        } else {
            None
        };
        Ok(Self::new(
            runtime,
            engine,
            collector,
            driver,
            monitor,
            RunnerSettings::from_config(config),
        ))
    }

    pub fn active_fault(&self) -> Option<&FaultHandle> {
        self.registry.active()
    }

    /// Runs one full experiment. Cleanup executes exactly once on every path
    /// that reached injection; a reset failure aborts before anything was
    /// injected, so nothing needs cleaning.
    pub fn run_experiment(&mut self, key: AnomalyKey) -> Result<ExperimentRecord> {
        let entry = catalog::entry(key);
        info!(anomaly = %entry.key, name = entry.display_name, "starting experiment");

        self.clean_prior_state();
        self.reset()?;

        let record = ExperimentRecord::new(entry);
        let mut guard = FaultTeardownGuard::new(Arc::clone(&self.engine));
        let phases = self.run_faulted_phases(entry, &record, &mut guard);
        self.cleanup(entry);
        guard.disarm();

        match phases {
            Ok(()) => {
                info!(experiment = %record.experiment_name, "experiment completed");
                Ok(record)
            }
            Err(err) => {
                error!(experiment = %record.experiment_name, "experiment failed: {err}");
                Err(err)
            }
        }
    }

    fn run_faulted_phases(
        &mut self,
        entry: &AnomalyEntry,
        record: &ExperimentRecord,
        guard: &mut FaultTeardownGuard,
    ) -> Result<()> {
        self.inject(entry, guard)?;
        self.trigger(record)?;
        self.collect(record)
    }

    /// Destroys faults leaked by a previous, improperly-terminated run and
    /// restores containers a code-level anomaly may have left stopped.
    fn clean_prior_state(&mut self) {
        match self.engine.list_active() {
            Ok(faults) => {
                for fault in faults.iter().filter(|f| f.is_live()) {
                    info!(fault = %fault.id, status = %fault.status, "destroying leftover fault");
                    if let Err(first) = self.engine.destroy(&fault.id, false) {
                        if let Err(second) = self.engine.destroy(&fault.id, true) {
                            warn!(fault = %fault.id, "leftover destroy failed: {first}; elevated retry failed: {second}");
                        }
                    }
                }
            }
            Err(err) => warn!("could not query engine for leftover faults: {err}"),
        }
        for entry in catalog::catalog() {
            if let InjectionKind::ContainerStop { containers } = entry.kind {
                for container in containers {
                    if let Err(err) = self.runtime.start_process(container) {
                        warn!(container, "restore failed: {err}");
                    }
                }
            }
        }
        self.registry.clear();
    }

    /// Stop topology, prune volumes (best-effort), start topology, poll for
    /// readiness, then seed baseline data.
    fn reset(&self) -> Result<()> {
        info!("resetting service topology");
        self.runtime.stop_topology()?;
        if let Err(err) = self.runtime.prune_volumes() {
            warn!("volume prune failed (ignored): {err}");
        }
        self.runtime.start_topology()?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.runtime.list_running(&self.settings.service_name_pattern) {
                Ok(names) if !names.is_empty() => {
                    info!(running = names.len(), attempts, "services ready");
                    break;
                }
                Ok(_) => {}
                Err(err) => warn!(attempts, "readiness probe failed: {err}"),
            }
            if attempts >= self.settings.timing.readiness_retries {
                return Err(ExperimentError::ResetTimeout { attempts });
            }
            self.pause(self.settings.timing.readiness_backoff_secs);
        }

        self.runtime.seed_baseline()?;
        Ok(())
    }

    fn inject(&mut self, entry: &AnomalyEntry, guard: &mut FaultTeardownGuard) -> Result<()> {
        match &entry.kind {
            InjectionKind::None => {
                info!("baseline experiment: nothing to inject");
            }
            InjectionKind::ContainerStop { containers } => {
                for container in *containers {
                    info!(container, "stopping application process");
                    self.runtime.stop_process(container).map_err(|e| {
                        ExperimentError::InjectionFailed {
                            key: entry.key,
                            output: e.to_string(),
                        }
                    })?;
                }
            }
            InjectionKind::CpuLoad { percent } => {
                let action = FaultAction::CpuLoad {
                    percent: *percent,
                    timeout_secs: self.settings.timing.fault_timeout_secs,
                };
                self.create_and_record(entry, &action, guard)?;
            }
            InjectionKind::NetworkLoss { percent } => {
                let action = FaultAction::NetworkLoss {
                    interface: self.settings.network_interface.clone(),
                    percent: *percent,
                    timeout_secs: self.settings.timing.fault_timeout_secs,
                };
                self.create_and_record(entry, &action, guard)?;
            }
            InjectionKind::DiskBurn => {
                let action = FaultAction::DiskBurn {
                    timeout_secs: self.settings.timing.fault_timeout_secs,
                };
                self.create_and_record(entry, &action, guard)?;
            }
            InjectionKind::ProcessKill { process } => {
                let action = FaultAction::ProcessKill {
                    process: process.to_string(),
                    signal: 9,
                };
                self.create_and_record(entry, &action, guard)?;
            }
            InjectionKind::CacheLimit {
                container, percent, ..
            } => {
                let ip = self.runtime.container_address(container).map_err(|e| {
                    ExperimentError::InjectionFailed {
                        key: entry.key,
                        output: e.to_string(),
                    }
                })?;
                let action = FaultAction::CacheLimit {
                    address: format!("{ip}:{}", self.settings.cache_port),
                    percent: *percent,
                    timeout_secs: self.settings.timing.fault_timeout_secs,
                };
                self.create_and_record(entry, &action, guard)?;
            }
        }
        // Anomalies are not instantaneously effective.
        self.pause(self.settings.timing.settle_secs);
        Ok(())
    }

    fn create_and_record(
        &mut self,
        entry: &AnomalyEntry,
        action: &FaultAction,
        guard: &mut FaultTeardownGuard,
    ) -> Result<()> {
        let id = self
            .engine
            .create(action)
            .map_err(|e| ExperimentError::InjectionFailed {
                key: entry.key,
                output: e.to_string(),
            })?;
        info!(fault = %id, anomaly = %entry.key, "fault injected");
        let handle = FaultHandle {
            id,
            requires_elevated_destroy: entry.requires_elevated_destroy(),
        };
        guard.arm(handle.clone());
        self.registry.record(handle);
        Ok(())
    }

    fn trigger(&self, record: &ExperimentRecord) -> Result<()> {
        let monitor_task = match (&self.monitor, self.settings.mode) {
            (Some(monitor), TriggerMode::ScriptedReplay) => Some(MonitorTask::spawn(
                Arc::clone(monitor),
                record.experiment_name.clone(),
            )),
            _ => None,
        };
        let result = self.run_trigger_loop();
        // Join before collection even when the trigger failed.
        if let Some(task) = monitor_task {
            task.stop_and_join();
        }
        result
    }

    fn run_trigger_loop(&self) -> Result<()> {
        let total = self.settings.iterations;
        for iteration in 1..=total {
            info!(iteration, total, driver = self.driver.name(), "traffic iteration");
            let code = self
                .driver
                .run_once()
                .map_err(|e| ExperimentError::TriggerFailed(e.to_string()))?;
            if code != 0 {
                if self.driver.tolerates_failure() {
                    warn!(
                        iteration,
                        code, "traffic iteration failed (expected under fault conditions)"
                    );
                } else {
                    return Err(ExperimentError::TriggerFailed(format!(
                        "{} exited with {code} at iteration {iteration}",
                        self.driver.name()
                    )));
                }
            }
            if iteration < total {
                self.pause(self.settings.inter_iteration_delay_secs);
            }
        }
        Ok(())
    }

    fn collect(&self, record: &ExperimentRecord) -> Result<()> {
        info!(experiment = %record.experiment_name, "collecting multimodal data");
        self.collector
            .collect(&record.experiment_name, CollectMode::CollectOnly)
    }

    /// The unconditional final step: destroys the active handle if any,
    /// restores directly-manipulated processes, and always leaves the
    /// registry empty. Failures are logged, never escalated, to avoid
    /// masking the original experiment failure.
    fn cleanup(&mut self, entry: &AnomalyEntry) {
        if let Some(handle) = self.registry.active().cloned() {
            self.destroy_handle(&handle);
            self.pause(self.settings.timing.destroy_settle_secs);
        }
        match &entry.kind {
            InjectionKind::ContainerStop { containers } => {
                for container in *containers {
                    match self.runtime.start_process(container) {
                        Ok(()) => info!(container, "application process restarted"),
                        Err(err) => warn!(container, "restart failed: {err}"),
                    }
                }
            }
            InjectionKind::ProcessKill { process } => self.await_auto_restart(process),
            InjectionKind::CacheLimit {
                container,
                restore: Some(restore),
                ..
            } => {
                // Engine destroy removes the fault process; the cache keeps
                // whatever memory bound was last applied.
                let command: Vec<String> = restore.iter().map(|s| s.to_string()).collect();
                match self.runtime.exec_in(container, &command) {
                    Ok(()) => info!(container, "cache memory bound restored"),
                    Err(err) => warn!(container, "cache restore failed: {err}"),
                }
            }
            _ => {}
        }
        self.registry.clear();
    }

    fn destroy_handle(&self, handle: &FaultHandle) {
        let first = self
            .engine
            .destroy(&handle.id, handle.requires_elevated_destroy);
        match first {
            Ok(()) => info!(fault = %handle.id, "fault destroyed"),
            Err(first_err) => {
                warn!(fault = %handle.id, "destroy failed: {first_err}; retrying with elevation");
                if let Err(second_err) = self.engine.destroy(&handle.id, true) {
                    let err = ExperimentError::CleanupFailed(format!(
                        "fault {} may still be active: {second_err}",
                        handle.id
                    ));
                    warn!("{err}");
                }
            }
        }
    }

    /// The runtime restarts killed service processes on its own; wait until
    /// one matching the name is visible again.
    fn await_auto_restart(&self, process: &str) {
        for _ in 0..self.settings.timing.restart_checks {
            match self.runtime.list_running(process) {
                Ok(names) if !names.is_empty() => {
                    info!(process, "service auto-restarted");
                    return;
                }
                Ok(_) => {}
                Err(err) => warn!(process, "restart probe failed: {err}"),
            }
            self.pause(self.settings.timing.restart_backoff_secs);
        }
        warn!(process, "service did not auto-restart within the wait budget");
    }

    pub(crate) fn quiesce(&self) {
        info!(
            secs = self.settings.timing.quiesce_secs,
            "quiescing before next experiment"
        );
        self.pause(self.settings.timing.quiesce_secs);
    }

    fn pause(&self, secs: u64) {
        if secs > 0 {
            thread::sleep(Duration::from_secs(secs));
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock collaborators shared by runner and campaign tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::EngineFault;

    #[derive(Default)]
    pub struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn push(&self, event: impl Into<String>) {
            self.events
                .lock()
                .expect("recorder lock")
                .push(event.into());
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().expect("recorder lock").clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.events()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }

        pub fn position(&self, prefix: &str) -> Option<usize> {
            self.events().iter().position(|e| e.starts_with(prefix))
        }
    }

    pub struct MockRuntime {
        pub rec: Arc<Recorder>,
        pub ready: bool,
    }

    impl ServiceRuntime for MockRuntime {
        fn stop_topology(&self) -> Result<()> {
            self.rec.push("stop_topology");
            Ok(())
        }

        fn start_topology(&self) -> Result<()> {
            self.rec.push("start_topology");
            Ok(())
        }

        fn prune_volumes(&self) -> Result<()> {
            self.rec.push("prune_volumes");
            Ok(())
        }

        fn list_running(&self, pattern: &str) -> Result<Vec<String>> {
            self.rec.push(format!("list_running:{pattern}"));
            if self.ready {
                Ok(vec![pattern.to_string()])
            } else {
                Ok(Vec::new())
            }
        }

        fn stop_process(&self, name: &str) -> Result<()> {
            self.rec.push(format!("stop:{name}"));
            Ok(())
        }

        fn start_process(&self, name: &str) -> Result<()> {
            self.rec.push(format!("start:{name}"));
            Ok(())
        }

        fn container_address(&self, name: &str) -> Result<String> {
            self.rec.push(format!("address:{name}"));
            Ok("172.18.0.9".to_string())
        }

        fn exec_in(&self, container: &str, _command: &[String]) -> Result<()> {
            self.rec.push(format!("exec:{container}"));
            Ok(())
        }

        fn seed_baseline(&self) -> Result<()> {
            self.rec.push("seed");
            Ok(())
        }
    }

    pub struct MockEngine {
        pub rec: Arc<Recorder>,
        pub fail_create: bool,
        pub fail_destroy_plain: bool,
        pub fail_destroy_elevated: bool,
        pub leftovers: Vec<EngineFault>,
    }

    impl MockEngine {
        pub fn ok(rec: Arc<Recorder>) -> Self {
            Self {
                rec,
                fail_create: false,
                fail_destroy_plain: false,
                fail_destroy_elevated: false,
                leftovers: Vec::new(),
            }
        }
    }

    impl FaultEngine for MockEngine {
        fn create(&self, action: &FaultAction) -> Result<String> {
            self.rec.push(format!("create:{}", action.args().join(" ")));
            if self.fail_create {
                Err(ExperimentError::CommandFailed(
                    "simulated create failure".to_string(),
                ))
            } else {
                Ok("fault-1".to_string())
            }
        }

        fn destroy(&self, id: &str, elevated: bool) -> Result<()> {
            self.rec.push(format!("destroy:{id}:{elevated}"));
            let fail = if elevated {
                self.fail_destroy_elevated
            } else {
                self.fail_destroy_plain
            };
            if fail {
                Err(ExperimentError::CommandFailed(
                    "simulated destroy failure".to_string(),
                ))
            } else {
                Ok(())
            }
        }

        fn list_active(&self) -> Result<Vec<EngineFault>> {
            self.rec.push("list_active");
            Ok(self.leftovers.clone())
        }
    }

    pub struct MockDriver {
        pub rec: Arc<Recorder>,
        pub tolerates: bool,
        pub codes: Mutex<VecDeque<i32>>,
    }

    impl MockDriver {
        pub fn with_codes(rec: Arc<Recorder>, tolerates: bool, codes: &[i32]) -> Self {
            Self {
                rec,
                tolerates,
                codes: Mutex::new(codes.iter().copied().collect()),
            }
        }
    }

    impl TrafficDriver for MockDriver {
        fn name(&self) -> &'static str {
            "mock traffic"
        }

        fn tolerates_failure(&self) -> bool {
            self.tolerates
        }

        fn run_once(&self) -> Result<i32> {
            self.rec.push("run_once");
            Ok(self
                .codes
                .lock()
                .expect("codes lock")
                .pop_front()
                .unwrap_or(0))
        }
    }

    pub struct MockCollector {
        pub rec: Arc<Recorder>,
        pub fail: bool,
    }

    impl Collector for MockCollector {
        fn collect(&self, experiment_name: &str, mode: CollectMode) -> Result<()> {
            self.rec.push(format!("collect:{experiment_name}:{mode:?}"));
            if self.fail {
                Err(ExperimentError::CollectionFailed(
                    "simulated collector failure".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }

    pub struct MockMonitor {
        pub rec: Arc<Recorder>,
    }

    impl ResponseMonitor for MockMonitor {
        fn run(&self, _experiment_name: &str, stop: &AtomicBool) -> Result<()> {
            self.rec.push("monitor_start");
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            self.rec.push("monitor_done");
            Ok(())
        }
    }

    pub fn fast_timing() -> TimingConfig {
        TimingConfig {
            fault_timeout_secs: 300,
            settle_secs: 0,
            destroy_settle_secs: 0,
            quiesce_secs: 0,
            readiness_retries: 3,
            readiness_backoff_secs: 0,
            restart_checks: 1,
            restart_backoff_secs: 0,
        }
    }

    pub fn settings(mode: TriggerMode, iterations: u32) -> RunnerSettings {
        RunnerSettings {
            mode,
            iterations,
            inter_iteration_delay_secs: 0,
            timing: fast_timing(),
            service_name_pattern: "socialnetwork".to_string(),
            network_interface: "docker0".to_string(),
            cache_port: 6379,
        }
    }

    pub struct Harness {
        pub rec: Arc<Recorder>,
        pub runner: ExperimentRunner,
    }

    pub fn harness_with(
        engine: MockEngine,
        collector_fail: bool,
        driver: Option<MockDriver>,
        monitor: bool,
        mode: TriggerMode,
    ) -> Harness {
        let rec = engine.rec.clone();
        let driver = driver.unwrap_or_else(|| MockDriver::with_codes(rec.clone(), true, &[]));
        let monitor: Option<Arc<dyn ResponseMonitor>> = if monitor {
            Some(Arc::new(MockMonitor { rec: rec.clone() }))
        } else {
            None
        };
        let runner = ExperimentRunner::new(
            Arc::new(MockRuntime {
                rec: rec.clone(),
                ready: true,
            }),
            Arc::new(engine),
            Arc::new(MockCollector {
                rec: rec.clone(),
                fail: collector_fail,
            }),
            Arc::new(driver),
            monitor,
            settings(mode, 1),
        );
        Harness { rec, runner }
    }

    pub fn harness(rec: Arc<Recorder>) -> Harness {
        harness_with(
            MockEngine::ok(rec),
            false,
            None,
            false,
            TriggerMode::ScriptedReplay,
        )
    }
}
