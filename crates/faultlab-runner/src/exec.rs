//! Subprocess helpers shared by the runtime, engine, traffic, and collector
//! adapters.

use std::process::Command;

use tracing::debug;

use crate::error::Result;

pub(crate) struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("(no stderr)")
    }
}

pub(crate) fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Runs to completion capturing stdout/stderr. An unlaunchable command is an
/// error; a non-zero exit is reported through `CommandOutput` so callers can
/// classify it.
pub(crate) fn run_capture(cmd: &mut Command) -> Result<CommandOutput> {
    debug!(command = %describe(cmd), "exec (capture)");
    let output = cmd.output()?;
    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Runs to completion with inherited stdio, returning the exit code. Used for
/// traffic generators and the collector, whose own output should stream to
/// the operator console.
pub(crate) fn run_streamed(cmd: &mut Command) -> Result<i32> {
    debug!(command = %describe(cmd), "exec (streamed)");
    let status = cmd.status()?;
    Ok(status.code().unwrap_or(-1))
}
