use crate::catalog::AnomalyKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Failure taxonomy for the experiment controller. `PreconditionMissing` is
/// fatal before any mutation; `ResetTimeout` aborts an experiment before
/// injection; everything from injection onward routes through cleanup.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("precondition missing: {0}")]
    PreconditionMissing(String),

    #[error("services not ready after {attempts} readiness checks")]
    ResetTimeout { attempts: u32 },

    #[error("injection failed for {key}: {output}")]
    InjectionFailed { key: AnomalyKey, output: String },

    #[error("traffic trigger failed: {0}")]
    TriggerFailed(String),

    #[error("data collection failed: {0}")]
    CollectionFailed(String),

    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
