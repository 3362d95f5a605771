//! Multimodal collector seam. The controller has already performed
//! reset/inject/trigger by collection time, so it always requests
//! collection-only behavior.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{ExperimentError, Result};
use crate::exec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    /// The collector may restart services itself.
    FullReset,
    /// Collection only; the controller owns the service lifecycle.
    CollectOnly,
}

impl CollectMode {
    fn flag(self) -> &'static str {
        match self {
            CollectMode::FullReset => "--full-reset",
            CollectMode::CollectOnly => "--collect-only",
        }
    }
}

pub trait Collector: Send + Sync {
    fn collect(&self, experiment_name: &str, mode: CollectMode) -> Result<()>;
}

pub struct ScriptCollector {
    script: PathBuf,
}

impl ScriptCollector {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }
}

impl Collector for ScriptCollector {
    fn collect(&self, experiment_name: &str, mode: CollectMode) -> Result<()> {
        let mut cmd = Command::new(&self.script);
        cmd.arg(experiment_name).arg(mode.flag());
        let code = exec::run_streamed(&mut cmd)?;
        if code == 0 {
            Ok(())
        } else {
            Err(ExperimentError::CollectionFailed(format!(
                "collector exited with {code} for {experiment_name}"
            )))
        }
    }
}
