//! Traffic trigger drivers. Two interchangeable strategies share one
//! contract; they differ in whether a non-zero exit is an expected outcome
//! under fault conditions (scripted replay) or a broken harness
//! (rate-controlled load).

use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;

use crate::config::LoadParameters;
use crate::error::{ExperimentError, Result};
use crate::exec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    ScriptedReplay,
    RateControlledLoad,
}

impl TriggerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMode::ScriptedReplay => "scripted_replay",
            TriggerMode::RateControlledLoad => "rate_controlled_load",
        }
    }
}

pub trait TrafficDriver: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether a non-zero per-iteration exit is tolerated (logged) rather
    /// than fatal.
    fn tolerates_failure(&self) -> bool;
    /// Runs one traffic iteration to completion, returning its exit code.
    fn run_once(&self) -> Result<i32>;
}

/// Scripted regression replay. Request failures are expected while a fault
/// is active, so a non-zero exit never aborts the trigger step.
pub struct ReplayDriver {
    command: Vec<String>,
    workdir: PathBuf,
}

impl ReplayDriver {
    pub fn new(command: Vec<String>, workdir: PathBuf) -> Self {
        Self { command, workdir }
    }
}

impl TrafficDriver for ReplayDriver {
    fn name(&self) -> &'static str {
        "scripted replay"
    }

    fn tolerates_failure(&self) -> bool {
        true
    }

    fn run_once(&self) -> Result<i32> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            ExperimentError::CommandFailed("replay command is empty".to_string())
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(&self.workdir);
        exec::run_streamed(&mut cmd)
    }
}

/// Rate-controlled load generation (wrk2-style). A generator crash indicates
/// a broken harness rather than an application failure under test, so any
/// non-zero exit aborts immediately.
pub struct LoadDriver {
    params: LoadParameters,
}

impl LoadDriver {
    pub fn new(params: LoadParameters) -> Self {
        Self { params }
    }
}

impl TrafficDriver for LoadDriver {
    fn name(&self) -> &'static str {
        "rate-controlled load"
    }

    fn tolerates_failure(&self) -> bool {
        false
    }

    fn run_once(&self) -> Result<i32> {
        let p = &self.params;
        let mut cmd = Command::new(&p.bin);
        cmd.arg("-D").arg(&p.distribution);
        cmd.arg("-t").arg(p.threads.to_string());
        cmd.arg("-c").arg(p.connections.to_string());
        cmd.arg("-d").arg(format!("{}s", p.duration_secs));
        cmd.arg("-R").arg(p.rate.to_string());
        cmd.arg("-L");
        cmd.arg("-s").arg(&p.script);
        cmd.arg(&p.url);
        exec::run_streamed(&mut cmd)
    }
}
