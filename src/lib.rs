pub mod actors;
pub mod admission;
#[cfg(feature = "api")]
pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod gate;
pub mod sampler;
pub mod store;
pub mod util;

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a reporting agent
pub type AgentId = String;

/// Opaque metric bag carried by a report
pub type Payload = BTreeMap<String, serde_json::Value>;

/// One metric submission from an agent, stamped by the hub on receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub agent_id: AgentId,

    /// Sender-assigned sequence number; `None` and `Some(0)` both mean "legacy sender"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Receipt time assigned by the hub
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Payload,
}

impl Report {
    pub fn new(agent_id: impl Into<AgentId>, sequence: Option<u64>, payload: Payload) -> Self {
        Self {
            agent_id: agent_id.into(),
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Sequence number if the sender provided a meaningful one
    pub fn effective_sequence(&self) -> Option<u64> {
        self.sequence.filter(|seq| *seq != 0)
    }
}

/// Liveness of an agent as judged by the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Fresh,
    Stale,
    Dead,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Fresh => "fresh",
            AgentStatus::Stale => "stale",
            AgentStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hub-side record of one agent: recent history plus liveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,

    /// Accepted reports in acceptance order, oldest first
    pub history: VecDeque<Report>,

    pub last_seen_at: DateTime<Utc>,

    pub status: AgentStatus,

    /// When `status` last changed
    pub status_since: DateTime<Utc>,

    pub highest_sequence_seen: u64,

    /// Reports applied over the lifetime of this entry
    pub accepted_total: u64,
}

impl AgentState {
    pub(crate) fn empty(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            history: VecDeque::new(),
            last_seen_at: now,
            status: AgentStatus::Fresh,
            status_since: now,
            highest_sequence_seen: 0,
            accepted_total: 0,
        }
    }

    pub fn last_accepted(&self) -> Option<&Report> {
        self.history.back()
    }
}

/// What happened to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Updated,
    StatusChanged { from: AgentStatus, to: AgentStatus },
    /// The entry was reclaimed after staying dead past the retention window
    Removed,
}

/// State-change notification fanned out to dashboard subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub agent_id: AgentId,
    pub kind: EventKind,
    pub state: AgentState,
}
