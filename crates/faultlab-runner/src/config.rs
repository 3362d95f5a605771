//! Configuration surface: every external path, binary, and tunable the
//! controller needs, with documented defaults. `validate` is the precondition
//! gate -- the controller refuses to start while any required value is unset.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ExperimentError, Result};
use crate::traffic::TriggerMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the target application's compose topology. REQUIRED.
    pub service_dir: PathBuf,
    /// Compose file name inside `service_dir`.
    pub compose_file: String,
    /// Substring identifying the application's containers in `docker ps`.
    pub service_name_pattern: String,
    /// Fault-injection engine binary (chaosblade-style). REQUIRED.
    pub engine_bin: PathBuf,
    /// Multimodal collector script, invoked per experiment. REQUIRED.
    pub collector_script: PathBuf,
    /// Scripted regression replay command, e.g. ["python3", "replay.py"].
    /// REQUIRED when trigger mode is scripted_replay.
    pub replay_command: Vec<String>,
    /// Host command seeding baseline data after a topology restart; skipped
    /// when empty.
    pub seed_command: Vec<String>,
    /// Bridge interface used for the network-loss anomaly.
    pub network_interface: String,
    /// Port appended to resolved cache container addresses.
    pub cache_port: u16,
    /// Directory for response-monitor artifacts.
    pub output_dir: PathBuf,
    pub trigger: TriggerConfig,
    pub timing: TimingConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    pub mode: TriggerMode,
    /// Traffic repetitions per experiment.
    pub iterations: u32,
    pub inter_iteration_delay_secs: u64,
    pub load: LoadParameters,
}

/// Rate-controlled load generator parameters (wrk2-style).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadParameters {
    /// Load generator binary. REQUIRED when trigger mode is
    /// rate_controlled_load (a bare name is resolved via PATH).
    pub bin: String,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u64,
    pub rate: u32,
    /// Request arrival distribution flag, e.g. "exp".
    pub distribution: String,
    /// Request-mix script. REQUIRED when trigger mode is rate_controlled_load.
    pub script: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Upper bound passed to every engine-backed fault so a crashed
    /// controller cannot leave an unbounded fault active.
    pub fault_timeout_secs: u64,
    /// Settle period after injection before traffic starts.
    pub settle_secs: u64,
    /// Settle period after destroying a fault.
    pub destroy_settle_secs: u64,
    /// Quiescence delay between campaign experiments.
    pub quiesce_secs: u64,
    pub readiness_retries: u32,
    pub readiness_backoff_secs: u64,
    /// Poll attempts waiting for the runtime to auto-restart a killed process.
    pub restart_checks: u32,
    pub restart_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Whether the background API-response monitor runs during scripted
    /// replay.
    pub enabled: bool,
    pub sample_interval_secs: u64,
    pub endpoints: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_dir: PathBuf::new(),
            compose_file: "docker-compose.yml".to_string(),
            service_name_pattern: "socialnetwork".to_string(),
            engine_bin: PathBuf::new(),
            collector_script: PathBuf::new(),
            replay_command: Vec::new(),
            seed_command: Vec::new(),
            network_interface: "docker0".to_string(),
            cache_port: 6379,
            output_dir: PathBuf::from("faultlab_out"),
            trigger: TriggerConfig::default(),
            timing: TimingConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::ScriptedReplay,
            iterations: 3,
            inter_iteration_delay_secs: 5,
            load: LoadParameters::default(),
        }
    }
}

impl Default for LoadParameters {
    fn default() -> Self {
        Self {
            bin: "wrk".to_string(),
            threads: 4,
            connections: 64,
            duration_secs: 60,
            rate: 100,
            distribution: "exp".to_string(),
            script: PathBuf::new(),
            url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fault_timeout_secs: 300,
            settle_secs: 10,
            destroy_settle_secs: 3,
            quiesce_secs: 30,
            readiness_retries: 30,
            readiness_backoff_secs: 2,
            restart_checks: 10,
            restart_backoff_secs: 2,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let base = "http://localhost:8080/wrk2-api";
        Self {
            enabled: true,
            sample_interval_secs: 2,
            endpoints: vec![
                format!("{base}/user/register"),
                format!("{base}/user/login"),
                format!("{base}/post/compose"),
                format!("{base}/home-timeline/read"),
                format!("{base}/user-timeline/read"),
                format!("{base}/user/profile"),
            ],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let data = fs::read_to_string(path).map_err(|e| {
            ExperimentError::PreconditionMissing(format!("config {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&data).map_err(|e| {
            ExperimentError::PreconditionMissing(format!("config {}: {}", path.display(), e))
        })
    }

    /// Fails fast before any destructive action if a required path or binary
    /// is unset or absent. Checked per the configured trigger mode so an
    /// operator running only scripted replay does not need a load generator.
    pub fn validate(&self) -> Result<()> {
        require_dir("service_dir", &self.service_dir)?;
        require_file("compose_file", &self.service_dir.join(&self.compose_file))?;
        require_file("engine_bin", &self.engine_bin)?;
        require_file("collector_script", &self.collector_script)?;
        match self.trigger.mode {
            TriggerMode::ScriptedReplay => {
                if self.replay_command.is_empty() {
                    return Err(ExperimentError::PreconditionMissing(
                        "replay_command is not set".to_string(),
                    ));
                }
                if let Some(script) = self.replay_command.iter().find(|p| looks_like_path(p)) {
                    require_file("replay_command script", Path::new(script))?;
                }
            }
            TriggerMode::RateControlledLoad => {
                let load = &self.trigger.load;
                require_binary("load bin", &load.bin)?;
                require_file("load script", &load.script)?;
                if load.url.trim().is_empty() {
                    return Err(ExperimentError::PreconditionMissing(
                        "load url is not set".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn looks_like_path(part: &str) -> bool {
    part.contains('/')
        || part.ends_with(".py")
        || part.ends_with(".sh")
        || part.ends_with(".lua")
        || part.ends_with(".js")
}

fn require_dir(label: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(ExperimentError::PreconditionMissing(format!(
            "{label} is not set"
        )));
    }
    if !path.is_dir() {
        return Err(ExperimentError::PreconditionMissing(format!(
            "{label} not found: {}",
            path.display()
        )));
    }
    Ok(())
}

fn require_file(label: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(ExperimentError::PreconditionMissing(format!(
            "{label} is not set"
        )));
    }
    if !path.is_file() {
        return Err(ExperimentError::PreconditionMissing(format!(
            "{label} not found: {}",
            path.display()
        )));
    }
    Ok(())
}

fn require_binary(label: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ExperimentError::PreconditionMissing(format!(
            "{label} is not set"
        )));
    }
    // Bare names resolve via PATH at spawn time; only explicit paths are
    // checked here.
    if name.contains('/') {
        require_file(label, Path::new(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExperimentError;

    #[test]
    fn default_config_fails_validation_with_unset_paths() {
        let cfg = Config::default();
        let err = cfg.validate().expect_err("defaults must not validate");
        match err {
            ExperimentError::PreconditionMissing(msg) => {
                assert!(msg.contains("service_dir"), "unexpected message: {msg}")
            }
            other => panic!("expected PreconditionMissing, got {other:?}"),
        }
    }

    #[test]
    fn yaml_overrides_merge_onto_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "service_dir: /opt/socialnetwork\ntrigger:\n  mode: rate_controlled_load\n  iterations: 7\n",
        )
        .expect("parse");
        assert_eq!(cfg.service_dir, PathBuf::from("/opt/socialnetwork"));
        assert_eq!(cfg.trigger.mode, TriggerMode::RateControlledLoad);
        assert_eq!(cfg.trigger.iterations, 7);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.timing.fault_timeout_secs, 300);
        assert_eq!(cfg.compose_file, "docker-compose.yml");
    }

    #[test]
    fn replay_mode_requires_a_replay_command() {
        let dir = std::env::temp_dir().join(format!(
            "faultlab_cfg_test_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let compose = dir.join("docker-compose.yml");
        let engine = dir.join("blade");
        let collector = dir.join("collect.sh");
        for f in [&compose, &engine, &collector] {
            std::fs::write(f, "").expect("touch");
        }

        let mut cfg = Config {
            service_dir: dir.clone(),
            engine_bin: engine,
            collector_script: collector,
            ..Config::default()
        };
        let err = cfg.validate().expect_err("missing replay command");
        assert!(err.to_string().contains("replay_command"));

        cfg.replay_command = vec!["python3".to_string(), "-c".to_string(), "pass".to_string()];
        cfg.validate().expect("non-path replay command accepted");
        let _ = std::fs::remove_dir_all(dir);
    }
}
