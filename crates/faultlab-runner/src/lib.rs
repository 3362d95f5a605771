//! Fault-injection experiment controller for a containerized multi-service
//! application: resets the system to a known state, injects one of a catalog
//! of synthetic anomalies, drives traffic, collects multimodal observability
//! data, and guarantees the injected anomaly is removed on every exit path.

pub mod campaign;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod engine;
mod error;
mod exec;
pub mod monitor;
pub mod registry;
pub mod runner;
pub mod runtime;
pub mod traffic;

pub use campaign::{plan, run_campaign, CampaignOutcome, CampaignScope};
pub use catalog::{catalog, AnomalyEntry, AnomalyKey, InjectionKind, Tier};
pub use config::Config;
pub use error::{ExperimentError, Result};
pub use registry::{FaultHandle, FaultHandleRegistry};
pub use runner::{ExperimentRecord, ExperimentRunner, RunnerSettings};
pub use traffic::TriggerMode;
