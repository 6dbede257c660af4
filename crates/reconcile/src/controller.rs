use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rezn_core::{decode_desired, Action, DecodeError, SkippedItem, DESIRED_KEY};
use rezn_persist::Store;
use rezn_runtime::{ContainerRuntime, RuntimeError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::execute::{execute, ActionOutcome};
use crate::matching::MatchRule;
use crate::naming::{NameSource, TimestampNamer};
use crate::plan::plan;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Failures that abandon a whole pass. The loop logs them and tries again next tick.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("failed to read desired state: {0:#}")]
    Store(anyhow::Error),
    #[error("failed to decode desired state: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to list running containers: {0}")]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pause between the end of one pass and the start of the next.
    pub interval: Duration,
    pub match_rule: MatchRule,
    pub desired_key: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL, match_rule: MatchRule::Prefix, desired_key: DESIRED_KEY.to_string() }
    }
}

impl ControllerConfig {
    /// `RECONCILE_INTERVAL` (whole seconds, at least 1) and `REZN_STRICT_MATCH`.
    pub fn from_env() -> Self {
        let interval = parse_interval(std::env::var("RECONCILE_INTERVAL").ok().as_deref());
        Self { interval, match_rule: MatchRule::from_env(), ..Default::default() }
    }
}

/// Whole seconds, clamped to at least 1. Unset or unparsable values give [`DEFAULT_INTERVAL`].
pub fn parse_interval(raw: Option<&str>) -> Duration {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(DEFAULT_INTERVAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Reconciling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAction {
    pub op: &'static str,
    pub workload: String,
    pub instance: String,
    pub error: String,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// False when the desired-state key has never been written.
    pub desired_found: bool,
    pub workloads: usize,
    pub skipped: Vec<SkippedItem>,
    pub observed: usize,
    pub planned: usize,
    pub created: usize,
    pub destroyed: usize,
    pub failed: Vec<FailedAction>,
}

impl PassReport {
    fn record(&mut self, outcomes: Vec<ActionOutcome>) {
        for o in outcomes {
            match (&o.action, o.result) {
                (Action::Create { .. }, Ok(())) => self.created += 1,
                (Action::Destroy { .. }, Ok(())) => self.destroyed += 1,
                (action, Err(e)) => self.failed.push(FailedAction {
                    op: action.verb(),
                    workload: action.workload().to_string(),
                    instance: action.instance().to_string(),
                    error: e.to_string(),
                }),
            }
        }
    }
}

/// Tick-driven reconcile loop. Owns nothing durable: every pass re-reads the store and
/// re-lists the runtime.
pub struct Controller {
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    config: ControllerConfig,
    names: Box<dyn NameSource>,
    state: LoopState,
}

impl Controller {
    pub fn new(store: Arc<dyn Store>, runtime: Arc<dyn ContainerRuntime>, config: ControllerConfig) -> Self {
        Self { store, runtime, config, names: Box::new(TimestampNamer), state: LoopState::Idle }
    }

    pub fn with_names(mut self, names: Box<dyn NameSource>) -> Self {
        self.names = names;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run exactly one pass. Always returns to `Idle`, whatever the outcome.
    pub async fn tick(&mut self) -> Result<PassReport, PassError> {
        self.state = LoopState::Reconciling;
        let started = Instant::now();
        let res = self.pass().await;
        self.state = LoopState::Idle;

        histogram!("reconcile_pass_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("reconcile_pass_total", 1u64);
        match &res {
            Ok(report) => log_report(report),
            Err(e) => {
                counter!("reconcile_pass_err_total", 1u64);
                error!(error = %e, "reconcile pass failed");
            }
        }
        res
    }

    /// Reconcile until `shutdown` resolves. Shutdown is only observed between passes, so a
    /// pass in progress always finishes.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval_secs = self.config.interval.as_secs(), rule = ?self.config.match_rule, "reconcile loop started");
        tokio::pin!(shutdown);
        loop {
            let _ = self.tick().await;
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        info!("reconcile loop stopped");
    }

    async fn pass(&mut self) -> Result<PassReport, PassError> {
        let raw = match self.store.get(&self.config.desired_key).map_err(PassError::Store)? {
            Some(raw) => raw,
            None => {
                debug!(key = %self.config.desired_key, "no desired state stored; nothing to reconcile");
                return Ok(PassReport::default());
            }
        };
        let desired = decode_desired(&raw)?;
        let observed = self.runtime.list_running().await?;

        let plan = plan(&desired.workloads, &observed, self.config.match_rule, self.names.as_mut());
        let outcomes = execute(self.runtime.as_ref(), &plan.actions).await;

        let mut report = PassReport {
            desired_found: true,
            workloads: desired.workloads.len(),
            skipped: desired.skipped,
            observed: observed.len(),
            planned: plan.actions.len(),
            ..Default::default()
        };
        report.record(outcomes);
        Ok(report)
    }
}

fn log_report(r: &PassReport) {
    if !r.skipped.is_empty() {
        counter!("reconcile_items_skipped_total", r.skipped.len() as u64);
    }
    for s in &r.skipped {
        warn!(item = %s.name, error = %s.reason, "skipped invalid declaration");
    }
    for f in &r.failed {
        warn!(op = f.op, workload = %f.workload, instance = %f.instance, error = %f.error, "action failed");
    }
    if r.planned > 0 {
        info!(
            workloads = r.workloads,
            created = r.created,
            destroyed = r.destroyed,
            failed = r.failed.len(),
            "reconcile pass applied changes"
        );
    } else {
        debug!(workloads = r.workloads, observed = r.observed, "reconcile pass: in sync");
    }
}
