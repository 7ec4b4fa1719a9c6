//! Helper functions for integration tests

#![allow(dead_code)]

use std::time::Duration;

use monitorx::{
    AgentState, Payload,
    config::HubConfig,
    engine::{Engine, ReportSubmission},
};
use serde_json::json;

/// Defaults with rate limiting loose enough to stay out of the way
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.admission.bucket_capacity = 10_000;
    config.admission.refill_per_sec = 10_000.0;
    config.store.history_capacity = 4;
    config
}

pub fn test_engine() -> Engine {
    Engine::new(test_config()).unwrap()
}

pub fn create_payload(n: u64) -> Payload {
    Payload::from([
        ("cpu_usage".to_string(), json!(n as f64 / 10.0)),
        ("n".to_string(), json!(n)),
    ])
}

pub fn submission(agent_id: &str, sequence: Option<u64>, n: u64) -> ReportSubmission {
    ReportSubmission {
        agent_id: agent_id.to_string(),
        sequence,
        payload: create_payload(n),
        size: 128,
    }
}

/// Poll until the agent has applied at least `total` reports
pub async fn wait_for_accepted(engine: &Engine, agent_id: &str, total: u64) -> AgentState {
    for _ in 0..400 {
        if let Ok(state) = engine.get(agent_id).await
            && state.accepted_total >= total
        {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("agent {agent_id} never reached {total} accepted reports");
}

/// Poll until the ingest workers have processed `total` reports, applied or discarded
pub async fn wait_for_processed(engine: &Engine, total: u64) {
    for _ in 0..400 {
        let stats = engine.stats().ingest;
        if stats.applied + stats.discarded >= total {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("ingest never processed {total} reports");
}

/// The `n` payload field of every report in the agent's history, oldest first
pub fn history_ns(state: &AgentState) -> Vec<u64> {
    state
        .history
        .iter()
        .map(|report| report.payload["n"].as_u64().unwrap())
        .collect()
}
