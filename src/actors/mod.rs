//! Actor-based ingestion pipeline
//!
//! Each actor runs as an independent async task and is controlled through a
//! cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   POST /reports ─► AdmissionController ─► IngestBuffer
//!                                              │ one bounded queue + worker per agent
//!                           ┌──────────────────┼──────────────────┐
//!                     worker(a1)          worker(a2)         worker(aN)
//!                           └─────── gate + apply ────────────────┘
//!                                              ▼
//!                                      AggregationStore ◄──── HealthActor (timer sweep)
//!                                              │ publish under per-agent lock
//!                                              ▼
//!                                         Broadcaster ─► subscriber queues ─► /stream
//! ```
//!
//! ## Actor Types
//!
//! - **Ingest workers**: drain one agent's queue in FIFO order into the store
//! - **HealthActor**: marks silent agents stale/dead and reclaims them
//! - **ReporterActor**: agent side, samples host metrics and posts them to the hub
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: state changes are fanned out through the broadcaster
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod health;
pub mod ingest;
pub mod messages;
pub mod reporter;
