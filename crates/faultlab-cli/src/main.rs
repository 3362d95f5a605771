use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use faultlab_runner::{
    catalog, run_campaign, AnomalyKey, CampaignOutcome, CampaignScope, Config, ExperimentRunner,
    Tier, TriggerMode,
};

#[derive(Parser)]
#[command(name = "faultlab", version = "0.2.0", about = "Fault-injection experiment controller")]
struct Cli {
    /// Configuration file with paths, binaries, and tunables.
    #[arg(long, global = true, default_value = "faultlab.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TriggerArg {
    #[value(name = "scripted_replay")]
    ScriptedReplay,
    #[value(name = "rate_controlled_load")]
    RateControlledLoad,
}

impl From<TriggerArg> for TriggerMode {
    fn from(value: TriggerArg) -> Self {
        match value {
            TriggerArg::ScriptedReplay => TriggerMode::ScriptedReplay,
            TriggerArg::RateControlledLoad => TriggerMode::RateControlledLoad,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the anomaly catalog grouped by tier.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Check every configured path and binary without touching the system.
    Validate {
        #[arg(long)]
        json: bool,
    },
    /// Run a single experiment for one anomaly key.
    Run {
        anomaly: String,
        #[arg(long, value_enum)]
        trigger: Option<TriggerArg>,
        #[arg(long)]
        iterations: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Run a batch of experiments unattended.
    Campaign {
        /// Restrict to one severity tier.
        #[arg(long, conflicts_with_all = ["all", "with_baseline"])]
        tier: Option<String>,
        /// All 12 injectable anomalies.
        #[arg(long, conflicts_with = "with_baseline")]
        all: bool,
        /// All 12 anomalies preceded by a baseline run.
        #[arg(long)]
        with_baseline: bool,
        #[arg(long, value_enum)]
        trigger: Option<TriggerArg>,
        #[arg(long)]
        json: bool,
    },
    /// Write a starter configuration file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(&cli.config, cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(config_path: &PathBuf, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::List { json } => {
            if json {
                let entries: Vec<Value> = catalog()
                    .iter()
                    .map(|e| {
                        json!({
                            "key": e.key.as_str(),
                            "tier": e.tier.as_str(),
                            "display_name": e.display_name,
                            "engine_handle": e.requires_engine_handle(),
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list",
                    "anomalies": entries
                })));
            }
            for tier in [
                Tier::Baseline,
                Tier::Performance,
                Tier::Service,
                Tier::Database,
                Tier::Code,
            ] {
                println!("{tier}:");
                for entry in catalog().iter().filter(|e| e.tier == tier) {
                    println!("  {:24} {}", entry.key.as_str(), entry.display_name);
                }
            }
        }
        Commands::Validate { json } => {
            let config = load_config(config_path)?;
            config.validate()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "validate",
                    "valid": true,
                    "config": config_path.display().to_string()
                })));
            }
            println!("ok");
        }
        Commands::Run {
            anomaly,
            trigger,
            iterations,
            json,
        } => {
            let key: AnomalyKey = anomaly.parse().map_err(|e: String| anyhow!(e))?;
            let config = apply_overrides(load_config(config_path)?, trigger, iterations);
            let mut runner = ExperimentRunner::from_config(&config)?;
            let record = runner.run_experiment(key)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "anomaly": key.as_str(),
                    "experiment_name": record.experiment_name,
                    "started_at": record.started_at.to_rfc3339(),
                    "trigger": config.trigger.mode.as_str()
                })));
            }
            println!("anomaly: {key}");
            println!("experiment_name: {}", record.experiment_name);
        }
        Commands::Campaign {
            tier,
            all,
            with_baseline,
            trigger,
            json,
        } => {
            let scope = campaign_scope(tier, all, with_baseline)?;
            let config = apply_overrides(load_config(config_path)?, trigger, None);
            let mut runner = ExperimentRunner::from_config(&config)?;
            let outcomes = run_campaign(&mut runner, scope);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "campaign",
                    "experiments": outcomes.len(),
                    "failed": outcomes.iter().filter(|o| !o.succeeded()).count(),
                    "outcomes": outcomes.iter().map(outcome_to_json).collect::<Vec<_>>()
                })));
            }
            print_outcomes(&outcomes);
        }
        Commands::Init { force } => {
            if !force && config_path.exists() {
                return Err(anyhow!(
                    "config file already exists (use --force): {}",
                    config_path.display()
                ));
            }
            let template = "\
# faultlab configuration. Fill in every field marked REQUIRED; unset fields
# keep their documented defaults.
service_dir: ''                 # REQUIRED: directory holding the compose topology
compose_file: docker-compose.yml
service_name_pattern: socialnetwork
engine_bin: ''                  # REQUIRED: fault-injection engine binary
collector_script: ''            # REQUIRED: multimodal collector script
replay_command: []              # REQUIRED for scripted_replay, e.g. [python3, replay.py]
seed_command: []                # e.g. [python3, scripts/init_social_graph.py]
network_interface: docker0
cache_port: 6379
output_dir: faultlab_out
trigger:
  mode: scripted_replay         # scripted_replay | rate_controlled_load
  iterations: 3
  inter_iteration_delay_secs: 5
  load:
    bin: wrk
    threads: 4
    connections: 64
    duration_secs: 60
    rate: 100
    distribution: exp
    script: ''                  # REQUIRED for rate_controlled_load
    url: http://localhost:8080
timing:
  fault_timeout_secs: 300
  settle_secs: 10
  destroy_settle_secs: 3
  quiesce_secs: 30
  readiness_retries: 30
  readiness_backoff_secs: 2
  restart_checks: 10
  restart_backoff_secs: 2
monitor:
  enabled: true
  sample_interval_secs: 2
";
            std::fs::write(config_path, template)?;
            println!("wrote: {}", config_path.display());
            println!("next: edit {} and fill in all fields marked REQUIRED", config_path.display());
            println!("next: faultlab validate --config {}", config_path.display());
        }
    }
    Ok(None)
}

fn load_config(path: &PathBuf) -> Result<Config> {
    // A missing default config file still yields the documented defaults;
    // validation then names whatever is unset.
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        Ok(Config::default())
    }
}

fn apply_overrides(
    mut config: Config,
    trigger: Option<TriggerArg>,
    iterations: Option<u32>,
) -> Config {
    if let Some(mode) = trigger {
        config.trigger.mode = mode.into();
    }
    if let Some(n) = iterations {
        config.trigger.iterations = n;
    }
    config
}

fn campaign_scope(tier: Option<String>, all: bool, with_baseline: bool) -> Result<CampaignScope> {
    match (tier, all, with_baseline) {
        (Some(name), false, false) => {
            let tier: Tier = name.parse().map_err(|e: String| anyhow!(e))?;
            Ok(CampaignScope::Tier(tier))
        }
        (None, true, false) => Ok(CampaignScope::All),
        (None, false, true) => Ok(CampaignScope::AllWithBaseline),
        _ => Err(anyhow!(
            "select a campaign scope: --tier <name>, --all, or --with-baseline"
        )),
    }
}

fn print_outcomes(outcomes: &[CampaignOutcome]) {
    for outcome in outcomes {
        match (&outcome.experiment_name, &outcome.error) {
            (Some(name), _) => println!("ok   {:24} {}", outcome.key.as_str(), name),
            (None, Some(err)) => println!("FAIL {:24} {}", outcome.key.as_str(), err),
            (None, None) => {}
        }
    }
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    println!("experiments: {} failed: {}", outcomes.len(), failed);
}

fn outcome_to_json(outcome: &CampaignOutcome) -> Value {
    json!({
        "key": outcome.key.as_str(),
        "display_name": outcome.display_name,
        "experiment_name": outcome.experiment_name,
        "error": outcome.error,
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::List { json }
        | Commands::Validate { json }
        | Commands::Run { json, .. }
        | Commands::Campaign { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}
