//! Hub composition root
//!
//! Wires admission, ingest, store and broadcaster together from one
//! [`HubConfig`]. The HTTP layer only ever talks to an [`Engine`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::actors::health::{HealthHandle, HealthMonitor};
use crate::actors::ingest::{DropReason, EnqueueOutcome, IngestBuffer, IngestStats};
use crate::admission::{Admission, AdmissionController, RejectReason};
use crate::broadcast::{Broadcaster, Subscription};
use crate::config::{ConfigError, HubConfig};
use crate::store::{AggregationStore, StoreResult};
use crate::{AgentId, AgentState, Payload, Report};

/// A report as it arrives at the boundary, before the hub stamps it
#[derive(Debug, Clone)]
pub struct ReportSubmission {
    pub agent_id: AgentId,
    pub sequence: Option<u64>,
    pub payload: Payload,
    /// Size of the serialized request body in bytes
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub agents: usize,
    pub subscribers: usize,
    pub events_published: u64,
    pub rate_limited_agents: usize,
    pub ingest: IngestStats,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<HubConfig>,
    admission: Arc<AdmissionController>,
    ingest: Arc<IngestBuffer>,
    store: Arc<AggregationStore>,
    broadcaster: Arc<Broadcaster>,
}

impl Engine {
    pub fn new(config: HubConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let broadcaster = Broadcaster::new(config.broadcast.subscriber_capacity);
        let store = Arc::new(AggregationStore::new(&config.store, broadcaster.clone()));
        let ingest = Arc::new(IngestBuffer::new(&config.ingest, store.clone()));
        let admission = Arc::new(AdmissionController::new(&config.admission));

        Ok(Self {
            config: Arc::new(config),
            admission,
            ingest,
            store,
            broadcaster,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AggregationStore> {
        &self.store
    }

    /// Admit and queue one report; never waits on processing
    pub fn submit(&self, submission: ReportSubmission) -> Result<SubmitOutcome, RejectReason> {
        let ReportSubmission {
            agent_id,
            sequence,
            payload,
            size,
        } = submission;

        if let Admission::Reject(reason) = self.admission.admit(&agent_id, size) {
            debug!(agent_id = %agent_id, %reason, "report rejected");
            return Err(reason);
        }

        let report = Report::new(agent_id, sequence, payload);
        trace!(agent_id = %report.agent_id, sequence = ?report.sequence, "report admitted");

        match self.ingest.enqueue(report) {
            EnqueueOutcome::Accepted => Ok(SubmitOutcome::Queued),
            EnqueueOutcome::Dropped(reason) => Ok(SubmitOutcome::Dropped(reason)),
        }
    }

    /// Subscribe to store events; take this before reading a snapshot
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<AgentState> {
        self.store.list_all().await
    }

    pub async fn get(&self, agent_id: &str) -> StoreResult<AgentState> {
        self.store.get(agent_id).await
    }

    /// Start the periodic liveness sweep
    pub fn spawn_health_monitor(&self) -> HealthHandle {
        let health = &self.config.health;
        let monitor =
            HealthMonitor::new(self.store.clone(), health).with_admission(self.admission.clone());
        HealthHandle::spawn(monitor, health.sweep_interval())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            agents: self.store.len(),
            subscribers: self.broadcaster.subscriber_count(),
            events_published: self.broadcaster.published_total(),
            rate_limited_agents: self.admission.tracked_agents(),
            ingest: self.ingest.stats(),
        }
    }

    /// Stop accepting work and end every subscriber stream
    pub fn shutdown(&self) {
        warn!("engine shutting down");
        self.ingest.shutdown();
        self.broadcaster.close();
    }
}
