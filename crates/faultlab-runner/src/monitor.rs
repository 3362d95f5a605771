//! Background API-response monitor. Runs as a fork/join task around the
//! scripted-replay trigger: spawned just before traffic starts, signaled to
//! stop and joined before data collection proceeds.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ExperimentError, Result};

pub trait ResponseMonitor: Send + Sync {
    /// Samples until `stop` is raised, persisting observations keyed by
    /// `experiment_name`.
    fn run(&self, experiment_name: &str, stop: &AtomicBool) -> Result<()>;
}

/// Probes the application's HTTP endpoints at a fixed interval, recording
/// one JSONL line per observation plus a summary with a status-code
/// histogram and latency aggregates.
pub struct EndpointProbeMonitor {
    endpoints: Vec<String>,
    sample_interval: Duration,
    output_dir: PathBuf,
}

impl EndpointProbeMonitor {
    pub fn new(endpoints: Vec<String>, sample_interval: Duration, output_dir: PathBuf) -> Self {
        Self {
            endpoints,
            sample_interval,
            output_dir,
        }
    }
}

struct Observation {
    endpoint: String,
    status: u16,
    latency_ms: f64,
}

impl ResponseMonitor for EndpointProbeMonitor {
    fn run(&self, experiment_name: &str, stop: &AtomicBool) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let responses_path = self
            .output_dir
            .join(format!("{experiment_name}_responses.jsonl"));
        let mut responses = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&responses_path)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExperimentError::CollectionFailed(format!("monitor client: {e}")))?;

        info!(
            experiment = experiment_name,
            endpoints = self.endpoints.len(),
            "response monitor started"
        );
        let mut observations: Vec<Observation> = Vec::new();
        while !stop.load(Ordering::Relaxed) {
            for endpoint in &self.endpoints {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let started = Instant::now();
                let status = match client.get(endpoint).send() {
                    Ok(resp) => resp.status().as_u16(),
                    // Connection failures are data under fault conditions.
                    Err(err) => {
                        debug!(endpoint, "probe failed: {err}");
                        0
                    }
                };
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let line = json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "experiment": experiment_name,
                    "endpoint": endpoint,
                    "status_code": status,
                    "latency_ms": (latency_ms * 100.0).round() / 100.0,
                });
                writeln!(responses, "{line}")?;
                observations.push(Observation {
                    endpoint: endpoint.clone(),
                    status,
                    latency_ms,
                });
            }
            sleep_interruptible(self.sample_interval, stop);
        }

        self.write_summary(experiment_name, &observations)?;
        info!(
            experiment = experiment_name,
            samples = observations.len(),
            "response monitor stopped"
        );
        Ok(())
    }
}

impl EndpointProbeMonitor {
    fn write_summary(&self, experiment_name: &str, observations: &[Observation]) -> Result<()> {
        let mut by_status = std::collections::BTreeMap::new();
        let mut by_endpoint = std::collections::BTreeMap::new();
        for obs in observations {
            *by_status.entry(obs.status.to_string()).or_insert(0u64) += 1;
            *by_endpoint.entry(obs.endpoint.clone()).or_insert(0u64) += 1;
        }
        let max_latency = observations
            .iter()
            .map(|o| o.latency_ms)
            .fold(0.0f64, f64::max);
        let avg_latency = if observations.is_empty() {
            0.0
        } else {
            observations.iter().map(|o| o.latency_ms).sum::<f64>() / observations.len() as f64
        };
        let summary = json!({
            "experiment": experiment_name,
            "generated_at": Utc::now().to_rfc3339(),
            "total_samples": observations.len(),
            "status_codes": by_status,
            "samples_per_endpoint": by_endpoint,
            "latency_ms": { "avg": avg_latency, "max": max_latency },
        });
        let path = self
            .output_dir
            .join(format!("{experiment_name}_response_summary.json"));
        let bytes = serde_json::to_vec_pretty(&summary)
            .map_err(|e| ExperimentError::CollectionFailed(format!("monitor summary: {e}")))?;
        fs::write(&path, bytes)?;
        Ok(())
    }
}

fn sleep_interruptible(total: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(250);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Fork/join handle for a running monitor: the runner must not proceed to
/// data collection until the monitor has been signaled and has exited.
pub struct MonitorTask {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<Result<()>>,
}

impl MonitorTask {
    pub fn spawn(monitor: Arc<dyn ResponseMonitor>, experiment_name: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || monitor.run(&experiment_name, &flag));
        Self { stop, handle }
    }

    /// Signals stop and blocks until the monitor thread has exited. Monitor
    /// failures are logged, never escalated.
    pub fn stop_and_join(self) {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("response monitor failed: {err}"),
            Err(_) => warn!("response monitor thread panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingMonitor {
        ran: Arc<AtomicBool>,
    }

    impl ResponseMonitor for CountingMonitor {
        fn run(&self, _experiment_name: &str, stop: &AtomicBool) -> Result<()> {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            self.ran.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn stop_and_join_waits_for_monitor_exit() {
        let ran = Arc::new(AtomicBool::new(false));
        let monitor = Arc::new(CountingMonitor {
            ran: Arc::clone(&ran),
        });
        let task = MonitorTask::spawn(monitor, "normal_20240101_000000".to_string());
        thread::sleep(Duration::from_millis(20));
        task.stop_and_join();
        assert!(ran.load(Ordering::Relaxed), "join must observe monitor exit");
    }

    #[test]
    fn interruptible_sleep_returns_early_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_interruptible(Duration::from_secs(5), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
