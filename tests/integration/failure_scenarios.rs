//! Overload and misuse at every stage of the pipeline
//!
//! - Full per-agent queues drop the incoming report, not queued ones
//! - Admission rejects without touching the store
//! - Slow subscribers get a gap marker instead of stalling the hub

use std::time::Duration;

use assert_matches::assert_matches;
use monitorx::{
    actors::ingest::DropReason,
    admission::RejectReason,
    broadcast::Delivery,
    engine::{Engine, SubmitOutcome},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_burst_beyond_queue_capacity_drops_newest() {
    let mut config = test_config();
    config.ingest.queue_capacity = 4;
    let engine = Engine::new(config).unwrap();

    // single-threaded runtime: the worker cannot drain until we yield
    let outcomes: Vec<_> = (1..=100)
        .map(|n| engine.submit(submission("burst", Some(n), n)).unwrap())
        .collect();

    let queued = outcomes
        .iter()
        .filter(|outcome| **outcome == SubmitOutcome::Queued)
        .count();
    assert_eq!(queued, 4);
    assert_eq!(
        outcomes[4],
        SubmitOutcome::Dropped(DropReason::QueueFull)
    );

    let state = wait_for_accepted(&engine, "burst", 4).await;
    assert_eq!(history_ns(&state), vec![1, 2, 3, 4]);

    let stats = engine.stats().ingest;
    assert_eq!(stats.enqueued, 4);
    assert_eq!(stats.dropped, 96);
}

#[tokio::test]
async fn test_rate_limited_agent_does_not_affect_others() {
    let mut config = test_config();
    config.admission.bucket_capacity = 3;
    config.admission.refill_per_sec = 0.001;
    let engine = Engine::new(config).unwrap();

    for n in 1..=3 {
        assert!(engine.submit(submission("noisy", Some(n), n)).is_ok());
    }
    assert_eq!(
        engine.submit(submission("noisy", Some(4), 4)),
        Err(RejectReason::RateExceeded)
    );
    assert!(engine.submit(submission("quiet", Some(1), 1)).is_ok());

    let state = wait_for_accepted(&engine, "noisy", 3).await;
    assert_eq!(history_ns(&state), vec![1, 2, 3]);
    wait_for_accepted(&engine, "quiet", 1).await;
}

#[tokio::test]
async fn test_rejected_reports_never_reach_the_store() {
    let mut config = test_config();
    config.admission.max_payload_bytes = 100;
    config.admission.allowlist = Some(["known".to_string()].into_iter().collect());
    let engine = Engine::new(config).unwrap();

    let mut oversized = submission("known", Some(1), 1);
    oversized.size = 101;
    assert_eq!(engine.submit(oversized), Err(RejectReason::PayloadTooLarge));
    assert_eq!(
        engine.submit(submission("stranger", Some(1), 1)),
        Err(RejectReason::UnknownAgentBlocked)
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.snapshot().await.is_empty());
    assert_eq!(engine.stats().ingest.enqueued, 0);
}

#[tokio::test]
async fn test_slow_subscriber_gets_gap_marker() {
    let mut config = test_config();
    config.broadcast.subscriber_capacity = 4;
    let engine = Engine::new(config).unwrap();
    let mut slow = engine.subscribe();

    for n in 1..=20 {
        engine.submit(submission("web-1", Some(n), n)).unwrap();
    }
    wait_for_accepted(&engine, "web-1", 20).await;

    assert_eq!(slow.try_recv(), Some(Delivery::Coalesced { dropped: 17 }));
    let remaining: Vec<u64> = std::iter::from_fn(|| slow.try_recv())
        .map(|delivery| match delivery {
            Delivery::Event(event) => event.state.highest_sequence_seen,
            other => panic!("unexpected delivery: {other:?}"),
        })
        .collect();
    assert_eq!(remaining, vec![18, 19, 20]);
    assert_eq!(slow.dropped_total(), 17);
}

#[tokio::test]
async fn test_dropped_subscriber_leaves_others_untouched() {
    let engine = test_engine();
    let gone = engine.subscribe();
    let mut staying = engine.subscribe();
    assert_eq!(engine.stats().subscribers, 2);

    drop(gone);
    assert_eq!(engine.stats().subscribers, 1);

    engine.submit(submission("web-1", Some(1), 1)).unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(2), staying.recv())
        .await
        .unwrap();
    assert_matches!(delivery, Some(Delivery::Event(_)));
}

#[tokio::test]
async fn test_shutdown_ends_streams() {
    let engine = test_engine();
    let mut subscription = engine.subscribe();

    engine.shutdown();

    let end = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .unwrap();
    assert_eq!(end, None);
}
