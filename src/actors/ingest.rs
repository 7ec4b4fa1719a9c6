//! Ingest buffer - per-agent bounded queues drained by single-owner workers
//!
//! Every active agent gets a bounded mpsc queue and one worker task that drains
//! it strictly in FIFO order through the ordering gate into the store. A full
//! queue rejects the *incoming* report, so what is already queued keeps its order.
//!
//! ## Worker lifecycle
//!
//! ```text
//! enqueue(a1) ─► no worker? ─► create queue + spawn worker(a1, gen)
//!                    │
//!                    └─► try_send ─► Full ─► Dropped(QueueFull)
//!
//! worker(a1): recv ─► apply_gated ─► ...   idle timeout ─► retire if queue empty
//! ```
//!
//! Senders are only used while holding the registry's shard guard, and a worker
//! retires by removing its own registry entry under the same shard lock after
//! checking its queue is empty. So a replacement worker can only exist once the
//! old one has nothing left to process, and one agent never has two workers
//! running at the same time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::IngestConfig;
use crate::store::AggregationStore;
use crate::{AgentId, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    QueueFull,
}

impl DropReason {
    /// Wire form, matching the serde encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::QueueFull => write!(f, "queue full"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Dropped(DropReason),
}

/// Counters exposed through the stats endpoint
#[derive(Debug, Default)]
pub struct IngestCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    applied: AtomicU64,
    discarded: AtomicU64,
    workers_started: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub applied: u64,
    pub discarded: u64,
    pub workers_started: u64,
    pub active_workers: usize,
}

struct WorkerSlot {
    sender: mpsc::Sender<Report>,
    generation: u64,
}

type Registry = DashMap<AgentId, WorkerSlot>;

enum Offer {
    Done(EnqueueOutcome),
    /// The worker behind this slot is gone; the report comes back for a retry
    WorkerGone(Report, u64),
}

pub struct IngestBuffer {
    workers: Arc<Registry>,
    store: Arc<AggregationStore>,
    counters: Arc<IngestCounters>,
    capacity: usize,
    idle_timeout: Duration,
    next_generation: AtomicU64,
}

impl IngestBuffer {
    pub fn new(config: &IngestConfig, store: Arc<AggregationStore>) -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            store,
            counters: Arc::new(IngestCounters::default()),
            capacity: config.queue_capacity.max(1),
            idle_timeout: config.worker_idle_timeout(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Queue `report` behind its agent's earlier reports; never waits
    ///
    /// Must be called from within a Tokio runtime, since the first report of an
    /// agent spawns its worker.
    pub fn enqueue(&self, mut report: Report) -> EnqueueOutcome {
        loop {
            let offer = match self.workers.get(&report.agent_id) {
                Some(slot) => Self::offer(&slot.sender, slot.generation, report),
                None => self.spawn_and_offer(report),
            };

            match offer {
                Offer::Done(outcome) => {
                    match outcome {
                        EnqueueOutcome::Accepted => {
                            self.counters.enqueued.fetch_add(1, Ordering::Relaxed)
                        }
                        EnqueueOutcome::Dropped(_) => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                    return outcome;
                }
                Offer::WorkerGone(returned, generation) => {
                    error!(agent_id = %returned.agent_id, "ingest worker vanished, replacing it");
                    self.workers
                        .remove_if(&returned.agent_id, |_, slot| slot.generation == generation);
                    report = returned;
                }
            }
        }
    }

    fn offer(sender: &mpsc::Sender<Report>, generation: u64, report: Report) -> Offer {
        match sender.try_send(report) {
            Ok(()) => Offer::Done(EnqueueOutcome::Accepted),
            Err(TrySendError::Full(report)) => {
                warn!(
                    agent_id = %report.agent_id,
                    sequence = ?report.sequence,
                    "ingest queue full, dropping report"
                );
                Offer::Done(EnqueueOutcome::Dropped(DropReason::QueueFull))
            }
            Err(TrySendError::Closed(report)) => Offer::WorkerGone(report, generation),
        }
    }

    fn spawn_and_offer(&self, report: Report) -> Offer {
        match self.workers.entry(report.agent_id.clone()) {
            Entry::Occupied(slot) => {
                let slot = slot.get();
                Self::offer(&slot.sender, slot.generation, report)
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = mpsc::channel(self.capacity);
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

                let worker = IngestWorker {
                    agent_id: report.agent_id.clone(),
                    generation,
                    receiver,
                    workers: self.workers.clone(),
                    store: self.store.clone(),
                    counters: self.counters.clone(),
                    idle_timeout: self.idle_timeout,
                };
                tokio::spawn(worker.run());
                self.counters.workers_started.fetch_add(1, Ordering::Relaxed);

                let offer = Self::offer(&sender, generation, report);
                vacant.insert(WorkerSlot { sender, generation });
                offer
            }
        }
    }

    /// Reports waiting in an agent's queue (excluding one being processed)
    pub fn queue_depth(&self, agent_id: &str) -> usize {
        self.workers
            .get(agent_id)
            .map(|slot| slot.sender.max_capacity() - slot.sender.capacity())
            .unwrap_or(0)
    }

    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            workers_started: self.counters.workers_started.load(Ordering::Relaxed),
            active_workers: self.workers.len(),
        }
    }

    /// Stop accepting work; workers drain what is queued and exit
    pub fn shutdown(&self) {
        debug!("shutting down ingest buffer ({} workers)", self.workers.len());
        self.workers.clear();
    }
}

/// Single owner of one agent's queue
struct IngestWorker {
    agent_id: AgentId,
    generation: u64,
    receiver: mpsc::Receiver<Report>,
    workers: Arc<Registry>,
    store: Arc<AggregationStore>,
    counters: Arc<IngestCounters>,
    idle_timeout: Duration,
}

impl IngestWorker {
    #[instrument(skip(self), fields(agent_id = %self.agent_id, generation = self.generation))]
    async fn run(mut self) {
        debug!("starting ingest worker");

        loop {
            match tokio::time::timeout(self.idle_timeout, self.receiver.recv()).await {
                Ok(Some(report)) => self.process(report).await,

                // every sender is gone: the buffer was shut down
                Ok(None) => break,

                Err(_) => {
                    let receiver = &self.receiver;
                    let generation = self.generation;
                    let retired = self
                        .workers
                        .remove_if(&self.agent_id, |_, slot| {
                            slot.generation == generation && receiver.is_empty()
                        })
                        .is_some();

                    if retired {
                        debug!("retiring idle ingest worker");
                        break;
                    }
                }
            }
        }

        debug!("ingest worker stopped");
    }

    async fn process(&self, report: Report) {
        let sequence = report.sequence;
        match self.store.apply_gated(report).await {
            Ok(state) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                trace!(?sequence, history = state.history.len(), "applied report");
            }
            Err(reason) => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(?sequence, "discarded report: {reason}");
            }
        }
    }
}
