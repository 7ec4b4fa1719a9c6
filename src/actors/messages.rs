//! Message types for actor communication
//!
//! Commands travel over mpsc channels to a single actor; replies come back on
//! oneshot channels. State-change events do not go through here, they are fanned
//! out by the [`Broadcaster`](crate::broadcast::Broadcaster).

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{AgentId, AgentStatus};

/// Commands that can be sent to the HealthActor
#[derive(Debug)]
pub enum HealthCommand {
    /// Run a sweep immediately, outside the regular tick
    SweepNow {
        respond_to: oneshot::Sender<SweepReport>,
    },

    /// Gracefully shut down the health actor
    Shutdown,
}

/// One liveness transition observed during a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub agent_id: AgentId,
    pub from: AgentStatus,
    pub to: AgentStatus,
}

/// Outcome of a single health sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Agents inspected, each exactly once
    pub visited: usize,

    pub transitions: Vec<StatusChange>,

    /// Agents reclaimed after their retention window
    pub removed: Vec<AgentId>,
}

/// Commands that can be sent to a ReporterActor (agent side)
#[derive(Debug)]
pub enum ReporterCommand {
    /// Sample and send immediately, bypassing the interval timer
    ReportNow {
        respond_to: oneshot::Sender<anyhow::Result<IngestAck>>,
    },

    /// Gracefully shut down the reporter
    Shutdown,
}

/// Hub response to an ingested report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub status: String,

    #[serde(default)]
    pub queued: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
