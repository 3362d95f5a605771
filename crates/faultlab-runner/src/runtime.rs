//! Container/service runtime seam and its docker compose adapter.

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::{ExperimentError, Result};
use crate::exec::{self, CommandOutput};

/// Narrow interface onto the runtime that hosts the target application.
pub trait ServiceRuntime: Send + Sync {
    fn stop_topology(&self) -> Result<()>;
    fn start_topology(&self) -> Result<()>;
    /// Best-effort orphaned-volume cleanup; callers ignore failures.
    fn prune_volumes(&self) -> Result<()>;
    /// Names of running containers matching `pattern`.
    fn list_running(&self, pattern: &str) -> Result<Vec<String>>;
    fn stop_process(&self, name: &str) -> Result<()>;
    /// Idempotent: starting an already-running container is a no-op.
    fn start_process(&self, name: &str) -> Result<()>;
    /// Network address of a named container, without port.
    fn container_address(&self, name: &str) -> Result<String>;
    fn exec_in(&self, container: &str, command: &[String]) -> Result<()>;
    /// Seeds baseline application data after a topology restart.
    fn seed_baseline(&self) -> Result<()>;
}

pub struct DockerComposeRuntime {
    service_dir: PathBuf,
    compose_file: String,
    seed_command: Vec<String>,
}

impl DockerComposeRuntime {
    pub fn new(service_dir: PathBuf, compose_file: String, seed_command: Vec<String>) -> Self {
        Self {
            service_dir,
            compose_file,
            seed_command,
        }
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.args(["compose", "-f", &self.compose_file]);
        cmd.current_dir(&self.service_dir);
        cmd
    }

    fn check(out: CommandOutput, what: &str) -> Result<()> {
        if out.success() {
            Ok(())
        } else {
            Err(ExperimentError::CommandFailed(format!(
                "{what}: exit {}: {}",
                out.status,
                out.stderr_tail()
            )))
        }
    }
}

impl ServiceRuntime for DockerComposeRuntime {
    fn stop_topology(&self) -> Result<()> {
        let out = exec::run_capture(self.compose().arg("down"))?;
        Self::check(out, "compose down")
    }

    fn start_topology(&self) -> Result<()> {
        let out = exec::run_capture(self.compose().args(["up", "-d"]))?;
        Self::check(out, "compose up")
    }

    fn prune_volumes(&self) -> Result<()> {
        let out = exec::run_capture(Command::new("docker").args(["volume", "prune", "-f"]))?;
        Self::check(out, "volume prune")
    }

    fn list_running(&self, pattern: &str) -> Result<Vec<String>> {
        let out = exec::run_capture(Command::new("docker").args([
            "ps",
            "--format",
            "{{.Names}}",
        ]))?;
        if !out.success() {
            return Err(ExperimentError::CommandFailed(format!(
                "docker ps: exit {}: {}",
                out.status,
                out.stderr_tail()
            )));
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && name.contains(pattern))
            .map(str::to_string)
            .collect())
    }

    fn stop_process(&self, name: &str) -> Result<()> {
        let out = exec::run_capture(Command::new("docker").args(["stop", name]))?;
        Self::check(out, &format!("docker stop {name}"))
    }

    fn start_process(&self, name: &str) -> Result<()> {
        let out = exec::run_capture(Command::new("docker").args(["start", name]))?;
        Self::check(out, &format!("docker start {name}"))
    }

    fn container_address(&self, name: &str) -> Result<String> {
        let out = exec::run_capture(Command::new("docker").args([
            "inspect",
            "-f",
            "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
            name,
        ]))?;
        if !out.success() {
            return Err(ExperimentError::CommandFailed(format!(
                "docker inspect {name}: exit {}: {}",
                out.status,
                out.stderr_tail()
            )));
        }
        let addr = out.stdout.trim().to_string();
        if addr.is_empty() {
            return Err(ExperimentError::CommandFailed(format!(
                "container {name} has no network address"
            )));
        }
        Ok(addr)
    }

    fn exec_in(&self, container: &str, command: &[String]) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.args(["exec", container]);
        cmd.args(command);
        let out = exec::run_capture(&mut cmd)?;
        Self::check(out, &format!("docker exec {container}"))
    }

    fn seed_baseline(&self) -> Result<()> {
        if self.seed_command.is_empty() {
            debug!("no seed command configured, skipping baseline seeding");
            return Ok(());
        }
        let mut cmd = Command::new(&self.seed_command[0]);
        cmd.args(&self.seed_command[1..]);
        cmd.current_dir(&self.service_dir);
        let code = exec::run_streamed(&mut cmd)?;
        if code == 0 {
            Ok(())
        } else {
            Err(ExperimentError::CommandFailed(format!(
                "seed command exited with {code}"
            )))
        }
    }
}
