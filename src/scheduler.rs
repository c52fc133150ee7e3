//! Check Scheduler - one independently timed task per configured check
//!
//! ## Task loop
//!
//! ```text
//! ┌─► fire probe ──► wrap in ResultEnvelope ──► emit (blocks while slot full) ──► sleep ─┐
//! └──────────────────────────────────────────────────────────────────────────────────────┘
//!        every await point also listens for cancellation
//! ```
//!
//! Because `emit` blocks on the single-slot queue, a slow consumer stretches the
//! effective cadence of every check sharing it. Probes are bounded by
//! [`probes::deadline`]; an overrun or an error becomes a failure envelope and the
//! task carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::anyhow;
use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::ResultEnvelope;
use crate::checks::{AgentConfig, CheckSpec};
use crate::probes::{self, Probe};
use crate::tasks::TaskGroup;
use crate::telemetry::TelemetrySender;

/// Counters shared by every task of one scheduler run
#[derive(Debug, Default)]
pub struct SchedulerStats {
    tasks_started: AtomicUsize,
    firings: AtomicU64,
    failures: AtomicU64,
}

impl SchedulerStats {
    pub fn tasks_started(&self) -> usize {
        self.tasks_started.load(Ordering::Relaxed)
    }

    /// Probe invocations so far, across all checks
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::Relaxed)
    }

    /// Firings that ended in an error or a deadline overrun
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Starts one task per check in `config`.
///
/// The tasks live under a child scope of `cancel`; cancelling `cancel` or
/// calling [`SchedulerHandle::stop`] ends them.
pub fn start(
    config: &AgentConfig,
    probe: Arc<dyn Probe>,
    emit: TelemetrySender,
    cancel: &CancellationToken,
) -> SchedulerHandle {
    let group = TaskGroup::new(cancel);
    let stats = Arc::new(SchedulerStats::default());

    for spec in config.iter() {
        stats.tasks_started.fetch_add(1, Ordering::Relaxed);
        group.spawn(run_check(
            spec.clone(),
            probe.clone(),
            emit.clone(),
            group.token(),
            stats.clone(),
        ));
    }

    debug!("scheduler started {} check tasks", stats.tasks_started());

    SchedulerHandle {
        group,
        stats,
        config: config.clone(),
    }
}

#[instrument(skip_all, fields(check = %spec.check_type(), target = %spec.target()))]
async fn run_check(
    spec: CheckSpec,
    probe: Arc<dyn Probe>,
    emit: TelemetrySender,
    cancel: CancellationToken,
    stats: Arc<SchedulerStats>,
) {
    let interval = spec.interval_duration();
    let deadline = probes::deadline(&spec);

    loop {
        let fired = Local::now();
        stats.firings.fetch_add(1, Ordering::Relaxed);

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = tokio::time::timeout(deadline, probe.probe(&spec)) => match outcome {
                Ok(Ok(line)) => line,
                Ok(Err(err)) => {
                    debug!("probe failed: {err:#}");
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    probes::describe_failure(&spec, &err)
                }
                Err(_) => {
                    warn!("probe did not finish within {}s", deadline.as_secs());
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    let err = anyhow!("probe timed out after {}s", deadline.as_secs());
                    probes::describe_failure(&spec, &err)
                }
            }
        };

        trace!("{results}");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = emit.put(ResultEnvelope::new(fired, results)) => {
                if sent.is_err() {
                    debug!("telemetry queue closed");
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    trace!("check task stopped");
}

/// Handle to a running set of check tasks
#[derive(Debug)]
pub struct SchedulerHandle {
    group: TaskGroup,
    stats: Arc<SchedulerStats>,
    config: AgentConfig,
}

impl SchedulerHandle {
    /// The configuration the tasks were started from
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Tasks that have not exited yet
    pub fn task_count(&self) -> usize {
        self.group.len()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Cancels every check task and waits until all of them have exited.
    pub async fn stop(self) {
        self.group.shutdown().await;
        debug!("scheduler stopped after {} firings", self.stats.firings());
    }
}
