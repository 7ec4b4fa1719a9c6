//! Admission control: per-agent token buckets plus hard payload and allowlist checks
//!
//! Buckets live in a sharded map so admitting one agent never waits on another
//! agent's bucket. Token accounting happens while holding the shard's entry
//! guard, which makes refill-then-consume atomic per agent.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::AdmissionConfig;

/// Why a report was refused at the door
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    RateExceeded,
    PayloadTooLarge,
    UnknownAgentBlocked,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::RateExceeded => write!(f, "rate exceeded"),
            RejectReason::PayloadTooLarge => write!(f, "payload too large"),
            RejectReason::UnknownAgentBlocked => write!(f, "unknown agent blocked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant, capacity: f64, refill_per_sec: f64) {
        // saturating: callers may pass instants older than the last refill
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

pub struct AdmissionController {
    buckets: DashMap<String, TokenBucket>,
    capacity: f64,
    refill_per_sec: f64,
    max_payload_bytes: usize,
    allowlist: Option<HashSet<String>>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: config.bucket_capacity as f64,
            refill_per_sec: config.refill_per_sec,
            max_payload_bytes: config.max_payload_bytes,
            allowlist: config.allowlist.clone(),
        }
    }

    pub fn admit(&self, agent_id: &str, report_size: usize) -> Admission {
        self.admit_at(agent_id, report_size, Instant::now())
    }

    /// Admit against an explicit clock reading
    ///
    /// Consumes one token on `Accept`; a rejection leaves the bucket untouched.
    pub fn admit_at(&self, agent_id: &str, report_size: usize, now: Instant) -> Admission {
        if report_size > self.max_payload_bytes {
            debug!(agent_id, report_size, "rejecting oversized report");
            return Admission::Reject(RejectReason::PayloadTooLarge);
        }

        if let Some(allowlist) = &self.allowlist
            && !allowlist.contains(agent_id)
        {
            debug!(agent_id, "rejecting agent outside allowlist");
            return Admission::Reject(RejectReason::UnknownAgentBlocked);
        }

        let mut bucket = self
            .buckets
            .entry(agent_id.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: self.capacity,
                last_refill: now,
            });

        bucket.refill(now, self.capacity, self.refill_per_sec);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            trace!(agent_id, tokens = bucket.tokens, "admitted report");
            Admission::Accept
        } else {
            debug!(agent_id, "rate limit exceeded");
            Admission::Reject(RejectReason::RateExceeded)
        }
    }

    /// Forget buckets that have not been touched within `max_idle`
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        self.prune_idle_at(max_idle, Instant::now())
    }

    pub fn prune_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < max_idle);
        let pruned = before.saturating_sub(self.buckets.len());
        if pruned > 0 {
            debug!("pruned {pruned} idle token buckets");
        }
        pruned
    }

    pub fn tracked_agents(&self) -> usize {
        self.buckets.len()
    }
}
