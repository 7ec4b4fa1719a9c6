//! HealthActor - Tracks agent liveness from report silence
//!
//! ## Liveness State Machine
//!
//! ```text
//! silence >= stale_after                  → Fresh → Stale  (StatusChanged)
//! silence >= dead_after                   → Stale → Dead   (StatusChanged)
//! dead for >= retain_after                → entry removed  (Removed)
//! accepted report while Stale or Dead     → back to Fresh  (emitted by the store)
//! ```
//!
//! Transitions are timestamped at the moment the threshold was crossed rather
//! than at the sweep that noticed it, so a coarse sweep interval does not shift
//! the reclamation deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::admission::AdmissionController;
use crate::config::HealthConfig;
use crate::store::AggregationStore;
use crate::{AgentState, AgentStatus};

use super::messages::{HealthCommand, StatusChange, SweepReport};

#[derive(Debug, Clone, Copy)]
pub struct LivenessThresholds {
    pub stale_after: chrono::Duration,
    pub dead_after: chrono::Duration,
    pub retain_after: chrono::Duration,
}

impl From<&HealthConfig> for LivenessThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            dead_after: config.dead_after(),
            retain_after: config.retain_after(),
        }
    }
}

/// Status an agent deserves after `now - last_seen_at` of silence
pub fn classify(
    last_seen_at: DateTime<Utc>,
    now: DateTime<Utc>,
    thresholds: &LivenessThresholds,
) -> AgentStatus {
    let silence = now - last_seen_at;
    if silence >= thresholds.dead_after {
        AgentStatus::Dead
    } else if silence >= thresholds.stale_after {
        AgentStatus::Stale
    } else {
        AgentStatus::Fresh
    }
}

/// Next single step of the state machine, with the time the threshold was crossed
///
/// Only ever moves towards Dead; recovery to Fresh happens on apply.
pub fn next_status(
    state: &AgentState,
    now: DateTime<Utc>,
    thresholds: &LivenessThresholds,
) -> Option<(AgentStatus, DateTime<Utc>)> {
    let target = classify(state.last_seen_at, now, thresholds);
    match (state.status, target) {
        (AgentStatus::Fresh, AgentStatus::Stale | AgentStatus::Dead) => Some((
            AgentStatus::Stale,
            crossed_at(state, thresholds.stale_after, now),
        )),
        (AgentStatus::Stale, AgentStatus::Dead) => Some((
            AgentStatus::Dead,
            crossed_at(state, thresholds.dead_after, now),
        )),
        _ => None,
    }
}

fn crossed_at(
    state: &AgentState,
    threshold: chrono::Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    state
        .last_seen_at
        .checked_add_signed(threshold)
        .map_or(now, |crossed| crossed.min(now))
}

pub fn is_reclaimable(
    state: &AgentState,
    now: DateTime<Utc>,
    thresholds: &LivenessThresholds,
) -> bool {
    state.status == AgentStatus::Dead && now - state.status_since >= thresholds.retain_after
}

/// Sweeps the store; owns no agent state of its own
pub struct HealthMonitor {
    store: Arc<AggregationStore>,
    thresholds: LivenessThresholds,
    admission: Option<Arc<AdmissionController>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<AggregationStore>, config: &HealthConfig) -> Self {
        Self {
            store,
            thresholds: LivenessThresholds::from(config),
            admission: None,
        }
    }

    /// Also forget token buckets of agents silent for longer than dead + retain
    pub fn with_admission(mut self, admission: Arc<AdmissionController>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Visit every known agent once, applying transitions and reclamation as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for agent_id in self.store.agent_ids() {
            report.visited += 1;

            let thresholds = self.thresholds;
            let steps = self
                .store
                .advance_status(&agent_id, |state| next_status(state, now, &thresholds))
                .await;
            report
                .transitions
                .extend(steps.into_iter().map(|(from, to)| StatusChange {
                    agent_id: agent_id.clone(),
                    from,
                    to,
                }));

            if self
                .store
                .reclaim(&agent_id, |state| is_reclaimable(state, now, &thresholds))
                .await
            {
                report.removed.push(agent_id);
            }
        }

        if let Some(admission) = &self.admission
            && let Some(max_idle) = self
                .thresholds
                .dead_after
                .checked_add(&self.thresholds.retain_after)
                .and_then(|idle| idle.to_std().ok())
        {
            admission.prune_idle(max_idle);
        }

        trace!(
            visited = report.visited,
            transitions = report.transitions.len(),
            removed = report.removed.len(),
            "health sweep complete"
        );
        report
    }
}

/// Actor running [`HealthMonitor::sweep`] on a fixed interval
pub struct HealthActor {
    monitor: HealthMonitor,
    command_rx: mpsc::Receiver<HealthCommand>,
    sweep_interval: Duration,
}

impl HealthActor {
    pub fn new(
        monitor: HealthMonitor,
        command_rx: mpsc::Receiver<HealthCommand>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            monitor,
            command_rx,
            sweep_interval,
        }
    }

    #[instrument(skip(self), fields(interval = ?self.sweep_interval))]
    pub async fn run(mut self) {
        debug!("starting health actor");

        let mut ticker = interval(self.sweep_interval);
        // a slow sweep must not cause a burst of catch-up sweeps
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.monitor.sweep(Utc::now()).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        HealthCommand::SweepNow { respond_to } => {
                            debug!("received SweepNow command");
                            let report = self.monitor.sweep(Utc::now()).await;
                            let _ = respond_to.send(report);
                        }

                        HealthCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("health actor stopped");
    }
}

/// Handle for controlling a HealthActor
#[derive(Clone)]
pub struct HealthHandle {
    sender: mpsc::Sender<HealthCommand>,
}

impl HealthHandle {
    pub fn spawn(monitor: HealthMonitor, sweep_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = HealthActor::new(monitor, cmd_rx, sweep_interval);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a sweep now and wait for its report
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep report")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(HealthCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
