//! Aggregation store: per-agent ring of recent reports plus liveness
//!
//! ## Locking
//!
//! The map is sharded (`DashMap`) and only ever held for the instant it takes
//! to clone a slot handle. Each agent then has its own async mutex, so `apply`
//! for one agent never waits on another agent. Events are published while the
//! agent's mutex is held, which makes the publish order for an agent identical
//! to its apply order.
//!
//! A reclaimed slot is flagged `retired` before it leaves the map; a writer that
//! raced the removal and still holds the old handle sees the flag and retries
//! against a fresh slot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::broadcast::Broadcaster;
use crate::config::StoreConfig;
use crate::gate::{self, DiscardReason, GateDecision};
use crate::{AgentId, AgentState, AgentStatus, BroadcastEvent, EventKind, Report};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("agent {0} not found")]
    NotFound(AgentId),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
struct Slot {
    state: AgentState,
    retired: bool,
}

impl Slot {
    /// A slot is visible once it holds at least one accepted report
    fn is_live(&self) -> bool {
        !self.retired && !self.state.history.is_empty()
    }
}

pub struct AggregationStore {
    agents: DashMap<AgentId, Arc<Mutex<Slot>>>,
    history_capacity: usize,
    events: Arc<Broadcaster>,
}

impl AggregationStore {
    pub fn new(config: &StoreConfig, events: Arc<Broadcaster>) -> Self {
        Self {
            agents: DashMap::new(),
            history_capacity: config.history_capacity.max(1),
            events,
        }
    }

    fn slot(&self, agent_id: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.agents.get(agent_id) {
            return slot.value().clone();
        }

        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                debug!(agent_id, "tracking new agent");
                Arc::new(Mutex::new(Slot {
                    state: AgentState::empty(agent_id.to_string(), Utc::now()),
                    retired: false,
                }))
            })
            .value()
            .clone()
    }

    fn existing_slot(&self, agent_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.agents.get(agent_id).map(|slot| slot.value().clone())
    }

    /// Unconditionally append `report` to its agent's history
    pub async fn apply(&self, report: Report) -> AgentState {
        loop {
            let slot = self.slot(&report.agent_id);
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }
            return self.apply_locked(&mut guard.state, report);
        }
    }

    /// Run the ordering gate and, if it passes, apply, both under the agent's lock
    pub async fn apply_gated(&self, report: Report) -> Result<AgentState, DiscardReason> {
        loop {
            let slot = self.slot(&report.agent_id);
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            let current = guard.is_live().then_some(&guard.state);
            if let GateDecision::Discard(reason) = gate::evaluate(&report, current) {
                trace!(
                    agent_id = %report.agent_id,
                    sequence = ?report.sequence,
                    "discarding report: {reason}"
                );
                return Err(reason);
            }

            return Ok(self.apply_locked(&mut guard.state, report));
        }
    }

    fn apply_locked(&self, state: &mut AgentState, report: Report) -> AgentState {
        debug_assert!(
            state.history.len() <= self.history_capacity,
            "history of {} exceeded capacity {}",
            state.agent_id,
            self.history_capacity
        );

        let received_at = report.timestamp;
        if state.accepted_total == 0 {
            state.last_seen_at = received_at;
            state.status_since = received_at;
        } else {
            state.last_seen_at = state.last_seen_at.max(received_at);
        }
        state.highest_sequence_seen = gate::advance_sequence(state.highest_sequence_seen, &report);
        state.accepted_total += 1;
        state.history.push_back(report);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }

        let previous = state.status;
        if previous != AgentStatus::Fresh {
            state.status = AgentStatus::Fresh;
            state.status_since = received_at;
            info!(agent_id = %state.agent_id, "agent recovered: {previous} -> fresh");
            self.publish(
                state,
                EventKind::StatusChanged {
                    from: previous,
                    to: AgentStatus::Fresh,
                },
            );
        }

        let snapshot = state.clone();
        self.events.publish(BroadcastEvent {
            agent_id: snapshot.agent_id.clone(),
            kind: EventKind::Updated,
            state: snapshot.clone(),
        });
        snapshot
    }

    fn publish(&self, state: &AgentState, kind: EventKind) {
        self.events.publish(BroadcastEvent {
            agent_id: state.agent_id.clone(),
            kind,
            state: state.clone(),
        });
    }

    pub async fn get(&self, agent_id: &str) -> StoreResult<AgentState> {
        let slot = self
            .existing_slot(agent_id)
            .ok_or_else(|| StoreError::NotFound(agent_id.to_string()))?;

        let guard = slot.lock().await;
        if !guard.is_live() {
            return Err(StoreError::NotFound(agent_id.to_string()));
        }
        Ok(guard.state.clone())
    }

    /// Snapshot of every known agent, ordered by id
    pub async fn list_all(&self) -> Vec<AgentState> {
        let slots: Vec<Arc<Mutex<Slot>>> = self
            .agents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut states = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock().await;
            if guard.is_live() {
                states.push(guard.state.clone());
            }
        }

        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of agents `list_all` would return
    ///
    /// Never waits: a slot whose lock is busy is counted, since it is either
    /// taking a report or about to be reclaimed, so the figure can be off by
    /// the writes in flight.
    pub fn len(&self) -> usize {
        self.agents
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map_or(true, |slot| slot.is_live())
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk an agent along the liveness state machine
    ///
    /// `next` is asked for the following status until it returns `None` or the
    /// current status; every step publishes one `StatusChanged` event. Returns
    /// the `(from, to)` steps taken.
    pub async fn advance_status<F>(
        &self,
        agent_id: &str,
        mut next: F,
    ) -> Vec<(AgentStatus, AgentStatus)>
    where
        F: FnMut(&AgentState) -> Option<(AgentStatus, DateTime<Utc>)>,
    {
        let Some(slot) = self.existing_slot(agent_id) else {
            return Vec::new();
        };

        let mut guard = slot.lock().await;
        if !guard.is_live() {
            return Vec::new();
        }

        let mut steps = Vec::new();
        // Fresh -> Stale -> Dead is the longest possible walk
        for _ in 0..2 {
            let Some((to, since)) = next(&guard.state) else {
                break;
            };
            let from = guard.state.status;
            if to == from {
                break;
            }

            guard.state.status = to;
            guard.state.status_since = since;
            info!(agent_id, "agent status changed: {from} -> {to}");
            self.publish(&guard.state, EventKind::StatusChanged { from, to });
            steps.push((from, to));
        }
        steps
    }

    /// Remove an agent if `should_remove` agrees, publishing `Removed`
    pub async fn reclaim<F>(&self, agent_id: &str, should_remove: F) -> bool
    where
        F: FnOnce(&AgentState) -> bool,
    {
        let Some(slot) = self.existing_slot(agent_id) else {
            return false;
        };

        let mut guard = slot.lock().await;
        if !guard.is_live() || !should_remove(&guard.state) {
            return false;
        }

        guard.retired = true;
        self.agents
            .remove_if(agent_id, |_, current| Arc::ptr_eq(current, &slot));

        info!(agent_id, "reclaimed agent after retention window");
        self.publish(&guard.state, EventKind::Removed);
        true
    }
}
