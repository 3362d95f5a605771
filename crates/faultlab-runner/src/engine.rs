//! Fault-injection engine seam and its chaosblade-style adapter. The engine
//! prints a JSON result line per invocation; the identifier parsed out of a
//! `create` response is the handle needed to destroy the fault later.

use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use tracing::debug;

use crate::error::{ExperimentError, Result};
use crate::exec;

/// Engine-side description of a fault to create. Every time-bounded variant
/// carries the controller's fault timeout so a crashed controller cannot
/// leave an unbounded fault active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    CpuLoad {
        percent: u32,
        timeout_secs: u64,
    },
    NetworkLoss {
        interface: String,
        percent: u32,
        timeout_secs: u64,
    },
    DiskBurn {
        timeout_secs: u64,
    },
    ProcessKill {
        process: String,
        signal: u32,
    },
    CacheLimit {
        address: String,
        percent: u32,
        timeout_secs: u64,
    },
}

impl FaultAction {
    pub(crate) fn args(&self) -> Vec<String> {
        let s = |v: &str| v.to_string();
        match self {
            FaultAction::CpuLoad {
                percent,
                timeout_secs,
            } => vec![
                s("create"),
                s("cpu"),
                s("load"),
                s("--cpu-percent"),
                percent.to_string(),
                s("--timeout"),
                timeout_secs.to_string(),
            ],
            FaultAction::NetworkLoss {
                interface,
                percent,
                timeout_secs,
            } => vec![
                s("create"),
                s("network"),
                s("loss"),
                s("--interface"),
                interface.clone(),
                s("--percent"),
                percent.to_string(),
                s("--timeout"),
                timeout_secs.to_string(),
            ],
            FaultAction::DiskBurn { timeout_secs } => vec![
                s("create"),
                s("disk"),
                s("burn"),
                s("--read"),
                s("--write"),
                s("--timeout"),
                timeout_secs.to_string(),
            ],
            FaultAction::ProcessKill { process, signal } => vec![
                s("create"),
                s("process"),
                s("kill"),
                s("--process"),
                process.clone(),
                s("--signal"),
                signal.to_string(),
            ],
            FaultAction::CacheLimit {
                address,
                percent,
                timeout_secs,
            } => vec![
                s("create"),
                s("cache"),
                s("limit"),
                s("--addr"),
                address.clone(),
                s("--percent"),
                percent.to_string(),
                s("--timeout"),
                timeout_secs.to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineFault {
    pub id: String,
    pub status: String,
}

impl EngineFault {
    /// Whether this engine record represents a fault that is still in effect
    /// and must be destroyed.
    pub fn is_live(&self) -> bool {
        self.status.eq_ignore_ascii_case("success") || self.status.eq_ignore_ascii_case("running")
    }
}

pub trait FaultEngine: Send + Sync {
    /// Creates a fault and returns its engine-assigned identifier.
    fn create(&self, action: &FaultAction) -> Result<String>;
    fn destroy(&self, id: &str, elevated: bool) -> Result<()>;
    fn list_active(&self) -> Result<Vec<EngineFault>>;
}

pub struct BladeEngine {
    bin: PathBuf,
}

impl BladeEngine {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    fn command(&self, elevated: bool) -> Command {
        if elevated {
            let mut cmd = Command::new("sudo");
            cmd.arg(&self.bin);
            cmd
        } else {
            Command::new(&self.bin)
        }
    }
}

impl FaultEngine for BladeEngine {
    fn create(&self, action: &FaultAction) -> Result<String> {
        let out = exec::run_capture(self.command(false).args(action.args()))?;
        if !out.success() {
            return Err(ExperimentError::CommandFailed(format!(
                "engine create: exit {}: {}",
                out.status,
                out.stderr_tail()
            )));
        }
        parse_create_result(&out.stdout).ok_or_else(|| {
            ExperimentError::CommandFailed(format!(
                "engine create returned no identifier: {}",
                out.stdout.trim()
            ))
        })
    }

    fn destroy(&self, id: &str, elevated: bool) -> Result<()> {
        let out = exec::run_capture(self.command(elevated).args(["destroy", id]))?;
        if out.success() {
            debug!(fault = id, elevated, "engine destroy succeeded");
            Ok(())
        } else {
            Err(ExperimentError::CommandFailed(format!(
                "engine destroy {id}: exit {}: {}",
                out.status,
                out.stderr_tail()
            )))
        }
    }

    fn list_active(&self) -> Result<Vec<EngineFault>> {
        let out = exec::run_capture(self.command(false).args(["status", "--type", "create"]))?;
        if !out.success() {
            return Err(ExperimentError::CommandFailed(format!(
                "engine status: exit {}: {}",
                out.status,
                out.stderr_tail()
            )));
        }
        Ok(parse_status_result(&out.stdout))
    }
}

/// Extracts the fault identifier from the engine's structured output: the
/// last JSON line with a string `result`, or an object result carrying `uid`.
fn parse_create_result(stdout: &str) -> Option<String> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        match value.get("result") {
            Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
            Some(Value::Object(obj)) => {
                if let Some(id) = obj.get("uid").and_then(|v| v.as_str()) {
                    return Some(id.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_status_result(stdout: &str) -> Vec<EngineFault> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(items) = value.get("result").and_then(|v| v.as_array()) else {
            continue;
        };
        return items
            .iter()
            .filter_map(|item| {
                let id = item
                    .get("Uid")
                    .or_else(|| item.get("uid"))
                    .and_then(|v| v.as_str())?;
                let status = item
                    .get("Status")
                    .or_else(|| item.get("status"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                Some(EngineFault {
                    id: id.to_string(),
                    status: status.to_string(),
                })
            })
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_result_parses_string_identifier() {
        let stdout = r#"{"code":200,"success":true,"result":"8bc8a56b2f4a1d9e"}"#;
        assert_eq!(
            parse_create_result(stdout).as_deref(),
            Some("8bc8a56b2f4a1d9e")
        );
    }

    #[test]
    fn create_result_parses_object_identifier_and_skips_noise() {
        let stdout = "pulling experiment image...\n{\"code\":200,\"success\":true,\"result\":{\"uid\":\"abc123\"}}\n";
        assert_eq!(parse_create_result(stdout).as_deref(), Some("abc123"));
    }

    #[test]
    fn create_result_missing_identifier_is_none() {
        assert!(parse_create_result(r#"{"code":500,"success":false}"#).is_none());
        assert!(parse_create_result("not json at all").is_none());
    }

    #[test]
    fn status_result_lists_faults_with_liveness() {
        let stdout = r#"{"code":200,"result":[{"Uid":"live-1","Status":"Success"},{"Uid":"done-1","Status":"Destroyed"}]}"#;
        let faults = parse_status_result(stdout);
        assert_eq!(faults.len(), 2);
        assert!(faults[0].is_live());
        assert!(!faults[1].is_live());
    }

    #[test]
    fn cpu_action_args_carry_percent_and_timeout() {
        let action = FaultAction::CpuLoad {
            percent: 100,
            timeout_secs: 300,
        };
        assert_eq!(
            action.args(),
            ["create", "cpu", "load", "--cpu-percent", "100", "--timeout", "300"]
        );
    }

    #[test]
    fn kill_action_args_use_signal_nine() {
        let action = FaultAction::ProcessKill {
            process: "compose-post-service".to_string(),
            signal: 9,
        };
        let args = action.args();
        assert!(args.windows(2).any(|w| w == ["--signal", "9"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--process", "compose-post-service"]));
    }
}
