//! Wire types of the HTTP and WebSocket surface

use serde::{Deserialize, Serialize};

use crate::broadcast::Delivery;
use crate::engine::EngineStats;
use crate::{AgentId, AgentState, AgentStatus, EventKind, Payload};

/// Body of `POST /api/v1/reports`
///
/// `agentId` and `data` are accepted for agents that predate the versioned API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(alias = "agentId")]
    pub agent_id: AgentId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    #[serde(default, alias = "data")]
    pub payload: Payload,
}

/// Response for an admitted report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub queued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IngestResponse {
    pub fn queued() -> Self {
        Self {
            status: "accepted".to_string(),
            queued: true,
            reason: None,
        }
    }

    /// Admitted, but the agent's queue had no room
    pub fn not_queued(reason: impl ToString) -> Self {
        Self {
            status: "accepted".to_string(),
            queued: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Response for GET /api/v1/agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentState>,
    pub count: usize,
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Response for GET /api/v1/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: String,
    #[serde(flatten)]
    pub engine: EngineStats,
}

/// One frame on `/api/v1/stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Always the first frame of a connection
    Snapshot { agents: Vec<AgentState> },

    Updated {
        agent_id: AgentId,
        state: AgentState,
    },

    StatusChanged {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
        state: AgentState,
    },

    Removed {
        agent_id: AgentId,
        state: AgentState,
    },

    /// `dropped` events were skipped because this client read too slowly
    Coalesced { dropped: u64 },
}

impl From<Delivery> for StreamMessage {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Coalesced { dropped } => StreamMessage::Coalesced { dropped },
            Delivery::Event(event) => match event.kind {
                EventKind::Updated => StreamMessage::Updated {
                    agent_id: event.agent_id,
                    state: event.state,
                },
                EventKind::StatusChanged { from, to } => StreamMessage::StatusChanged {
                    agent_id: event.agent_id,
                    from,
                    to,
                    state: event.state,
                },
                EventKind::Removed => StreamMessage::Removed {
                    agent_id: event.agent_id,
                    state: event.state,
                },
            },
        }
    }
}
