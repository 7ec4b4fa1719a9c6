//! Concurrency tests
//!
//! Many agents, many submitters and many subscribers at once. Per-agent order
//! must hold end to end; agents must not interfere with one another.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use monitorx::{AgentStatus, actors::health::HealthMonitor, broadcast::Delivery};
use pretty_assertions::assert_eq;

use crate::helpers::*;

const AGENTS: u64 = 16;
const REPORTS_PER_AGENT: u64 = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_agents_keep_their_own_order() {
    let mut config = test_config();
    config.ingest.queue_capacity = 1024;
    let engine = monitorx::engine::Engine::new(config).unwrap();

    let mut tasks = Vec::new();
    for agent in 0..AGENTS {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let agent_id = format!("agent-{agent}");
            for n in 1..=REPORTS_PER_AGENT {
                engine.submit(submission(&agent_id, Some(n), n)).unwrap();
                if n % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for agent in 0..AGENTS {
        let agent_id = format!("agent-{agent}");
        let state = wait_for_accepted(&engine, &agent_id, REPORTS_PER_AGENT).await;
        assert_eq!(state.accepted_total, REPORTS_PER_AGENT);
        assert_eq!(history_ns(&state), vec![47, 48, 49, 50]);
    }

    let stats = engine.stats();
    assert_eq!(stats.agents, AGENTS as usize);
    assert_eq!(stats.ingest.applied, AGENTS * REPORTS_PER_AGENT);
    assert_eq!(stats.ingest.dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_subscriber_sees_per_agent_order() {
    let mut config = test_config();
    config.ingest.queue_capacity = 1024;
    config.broadcast.subscriber_capacity = 4096;
    let engine = monitorx::engine::Engine::new(config).unwrap();

    let subscriptions: Vec<_> = (0..4).map(|_| engine.subscribe()).collect();

    let mut tasks = Vec::new();
    for agent in 0..4u64 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            for n in 1..=100 {
                engine
                    .submit(submission(&format!("agent-{agent}"), Some(n), n))
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    for agent in 0..4u64 {
        wait_for_accepted(&engine, &format!("agent-{agent}"), 100).await;
    }

    for mut subscription in subscriptions {
        let mut last_seen: HashMap<String, u64> = HashMap::new();
        let mut count = 0;

        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await
        {
            let Delivery::Event(event) = delivery else {
                panic!("no events should be coalesced at this capacity");
            };
            let sequence = event.state.highest_sequence_seen;
            let previous = last_seen.insert(event.agent_id.clone(), sequence);
            assert!(previous.is_none_or(|prev| prev < sequence));
            count += 1;
        }

        assert_eq!(count, 400);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweeps_interleaved_with_submissions() {
    let mut config = test_config();
    config.ingest.queue_capacity = 1024;
    let engine = monitorx::engine::Engine::new(config).unwrap();
    let monitor = HealthMonitor::new(engine.store().clone(), &engine.config().health);

    let submitter = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for n in 1..=200 {
                engine
                    .submit(submission(&format!("agent-{}", n % 8), Some(n), n))
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..20 {
        let report = monitor.sweep(Utc::now()).await;
        assert!(report.transitions.is_empty());
        assert!(report.removed.is_empty());
        tokio::task::yield_now().await;
    }

    submitter.await.unwrap();
    wait_for_processed(&engine, 200).await;

    let agents = engine.snapshot().await;
    assert_eq!(agents.len(), 8);
    assert!(agents.iter().all(|state| state.status == AgentStatus::Fresh));
    assert_eq!(
        agents.iter().map(|state| state.accepted_total).sum::<u64>(),
        200
    );
}
