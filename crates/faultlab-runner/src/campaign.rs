//! Unattended batch execution: runs a plan of experiments sequentially,
//! isolating per-experiment failures so one bad anomaly never aborts the
//! rest of the campaign.

use tracing::{error, info};

use crate::catalog::{self, AnomalyEntry, AnomalyKey, Tier};
use crate::runner::ExperimentRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignScope {
    Single(AnomalyKey),
    Tier(Tier),
    /// All 12 injectable anomalies, no baseline.
    All,
    /// Baseline first, then all 12 injectable anomalies.
    AllWithBaseline,
}

pub fn plan(scope: CampaignScope) -> Vec<&'static AnomalyEntry> {
    let injectable = || {
        catalog::catalog()
            .iter()
            .filter(|e| e.tier != Tier::Baseline)
    };
    match scope {
        CampaignScope::Single(key) => vec![catalog::entry(key)],
        CampaignScope::Tier(tier) => catalog::catalog()
            .iter()
            .filter(|e| e.tier == tier)
            .collect(),
        CampaignScope::All => injectable().collect(),
        CampaignScope::AllWithBaseline => {
            let mut entries = vec![catalog::entry(AnomalyKey::Normal)];
            entries.extend(injectable());
            entries
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignOutcome {
    pub key: AnomalyKey,
    pub display_name: &'static str,
    /// Correlation key of the completed experiment, absent on failure.
    pub experiment_name: Option<String>,
    pub error: Option<String>,
}

impl CampaignOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs every planned experiment in order with a quiescence delay between
/// runs (skipped after the last).
pub fn run_campaign(runner: &mut ExperimentRunner, scope: CampaignScope) -> Vec<CampaignOutcome> {
    let entries = plan(scope);
    info!(experiments = entries.len(), "starting campaign");
    let mut outcomes = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let outcome = match runner.run_experiment(entry.key) {
            Ok(record) => CampaignOutcome {
                key: entry.key,
                display_name: entry.display_name,
                experiment_name: Some(record.experiment_name),
                error: None,
            },
            Err(err) => {
                error!(anomaly = %entry.key, "experiment failed, continuing campaign: {err}");
                CampaignOutcome {
                    key: entry.key,
                    display_name: entry.display_name,
                    experiment_name: None,
                    error: Some(err.to_string()),
                }
            }
        };
        outcomes.push(outcome);
        if idx + 1 < entries.len() {
            runner.quiesce();
        }
    }
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    info!(
        experiments = outcomes.len(),
        failed, "campaign finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runner::testing::*;
    use crate::traffic::TriggerMode;

    #[test]
    fn full_plan_runs_baseline_first_then_all_twelve() {
        let entries = plan(CampaignScope::AllWithBaseline);
        assert_eq!(entries.len(), 13);
        assert_eq!(entries[0].key, AnomalyKey::Normal);
        assert!(entries[1..].iter().all(|e| e.tier != Tier::Baseline));
    }

    #[test]
    fn tier_plan_selects_only_that_tier() {
        let entries = plan(CampaignScope::Tier(Tier::Database));
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.tier == Tier::Database));
    }

    #[test]
    fn full_campaign_completes_thirteen_experiments() {
        let rec = Arc::new(Recorder::default());
        let mut h = harness(rec.clone());
        let outcomes = run_campaign(&mut h.runner, CampaignScope::AllWithBaseline);
        assert_eq!(outcomes.len(), 13);
        assert_eq!(outcomes[0].key, AnomalyKey::Normal);
        assert!(outcomes.iter().all(|o| o.succeeded()));
        assert_eq!(rec.count("collect:"), 13);
        // Every engine-backed fault was destroyed; registry ends empty.
        assert_eq!(rec.count("create:"), rec.count("destroy:"));
        assert!(h.runner.active_fault().is_none());
    }

    #[test]
    fn one_failing_experiment_does_not_abort_the_campaign() {
        let rec = Arc::new(Recorder::default());
        let engine = MockEngine {
            fail_create: true,
            ..MockEngine::ok(rec.clone())
        };
        let mut h = harness_with(engine, false, None, false, TriggerMode::ScriptedReplay);
        let outcomes = run_campaign(&mut h.runner, CampaignScope::Tier(Tier::Performance));
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.succeeded()));
        for outcome in &outcomes {
            let msg = outcome.error.as_deref().unwrap_or("");
            assert!(
                msg.contains("injection failed"),
                "unexpected error: {msg}"
            );
        }
    }

    #[test]
    fn single_scope_runs_exactly_one_experiment() {
        let rec = Arc::new(Recorder::default());
        let mut h = harness(rec.clone());
        let outcomes = run_campaign(
            &mut h.runner,
            CampaignScope::Single(AnomalyKey::CodeMediaService),
        );
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].key, AnomalyKey::CodeMediaService);
        assert_eq!(rec.count("collect:"), 1);
    }

    #[test]
    fn reset_timeout_is_reported_per_experiment() {
        let rec = Arc::new(Recorder::default());
        // Unready runtime: every experiment fails at reset, none injects.
        let mut runner = crate::runner::ExperimentRunner::new(
            Arc::new(MockRuntime {
                rec: rec.clone(),
                ready: false,
            }),
            Arc::new(MockEngine::ok(rec.clone())),
            Arc::new(MockCollector {
                rec: rec.clone(),
                fail: false,
            }),
            Arc::new(MockDriver::with_codes(rec.clone(), true, &[])),
            None,
            settings(TriggerMode::ScriptedReplay, 1),
        );
        let outcomes = run_campaign(&mut runner, CampaignScope::Tier(Tier::Code));
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.succeeded()));
        assert_eq!(rec.count("create:"), 0);
        assert!(outcomes
            .iter()
            .all(|o| o.error.as_deref().unwrap_or("").contains("not ready")));
    }
}
