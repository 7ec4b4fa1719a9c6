//! Integration tests for the HTTP and WebSocket surface
//!
//! Each test binds a real server on an ephemeral port and talks to it with
//! `reqwest` and `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use monitorx::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::HubConfig,
    engine::Engine,
};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::helpers::*;

async fn spawn_test_api(config: HubConfig) -> (SocketAddr, Engine) {
    let mut api_config = ApiConfig::from(config.api.clone());
    api_config.bind_addr = "127.0.0.1:0".parse().unwrap();

    let engine = Engine::new(config).unwrap();
    let addr = spawn_api_server(api_config, ApiState::new(engine.clone()))
        .await
        .unwrap();
    (addr, engine)
}

async fn post_report(addr: SocketAddr, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/reports"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn next_frame<S>(stream: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _engine) = spawn_test_api(test_config()).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_report_accepted_and_queryable() {
    let (addr, engine) = spawn_test_api(test_config()).await;

    let (status, body) = post_report(
        addr,
        json!({"agent_id": "web-1", "sequence": 1, "payload": {"cpu_usage": 12.5}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"status": "accepted", "queued": true}));

    wait_for_accepted(&engine, "web-1", 1).await;

    let agent: Value = reqwest::get(format!("http://{addr}/api/v1/agents/web-1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agent["agent_id"], "web-1");
    assert_eq!(agent["status"], "fresh");
    assert_eq!(agent["highest_sequence_seen"], 1);
    assert_eq!(agent["history"][0]["payload"]["cpu_usage"], 12.5);

    let list: Value = reqwest::get(format!("http://{addr}/api/v1/agents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["agents"][0]["agent_id"], "web-1");
}

#[tokio::test]
async fn test_legacy_metrics_routes() {
    let (addr, engine) = spawn_test_api(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/metrics"))
        .json(&json!({"agentId": "old-agent", "data": {"hostname": "box"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_accepted(&engine, "old-agent", 1).await;

    let list: Value = client
        .get(format!("http://{addr}/api/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["agents"][0]["history"][0]["payload"]["hostname"], "box");
}

#[tokio::test]
async fn test_malformed_reports_are_bad_requests() {
    let (addr, engine) = spawn_test_api(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/reports"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = post_report(addr, json!({"agent_id": "  ", "payload": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    assert_eq!(engine.stats().ingest.enqueued, 0);
}

#[tokio::test]
async fn test_admission_rejections_map_to_status_codes() {
    let mut config = test_config();
    config.admission.bucket_capacity = 1;
    config.admission.refill_per_sec = 0.001;
    config.admission.max_payload_bytes = 256;
    config.admission.allowlist = Some(["web-1".to_string()].into_iter().collect());
    let (addr, _engine) = spawn_test_api(config).await;

    let (status, _) = post_report(addr, json!({"agent_id": "web-1", "sequence": 1})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = post_report(addr, json!({"agent_id": "web-1", "sequence": 2})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"status": "rejected", "reason": "rate_exceeded"}));

    let (status, body) = post_report(addr, json!({"agent_id": "intruder"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "unknown_agent_blocked");

    let (status, body) = post_report(
        addr,
        json!({"agent_id": "web-1", "payload": {"blob": "x".repeat(512)}}),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["reason"], "payload_too_large");
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let (addr, _engine) = spawn_test_api(test_config()).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/agents/nobody"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (addr, engine) = spawn_test_api(test_config()).await;
    post_report(addr, json!({"agent_id": "web-1", "sequence": 1})).await;
    wait_for_accepted(&engine, "web-1", 1).await;

    let stats: Value = reqwest::get(format!("http://{addr}/api/v1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(stats["agents"], 1);
    assert_eq!(stats["ingest"]["enqueued"], 1);
    assert_eq!(stats["ingest"]["applied"], 1);
    assert!(stats["timestamp"].is_string());
}

#[tokio::test]
async fn test_auth_token_guards_routes() {
    let mut config = test_config();
    config.api.auth_token = Some("s3cret".to_string());
    let (addr, _engine) = spawn_test_api(config).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/api/v1/agents"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("http://{addr}/api/v1/agents"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stream_starts_with_snapshot_then_updates() {
    let (addr, engine) = spawn_test_api(test_config()).await;
    post_report(addr, json!({"agent_id": "web-1", "sequence": 1})).await;
    wait_for_accepted(&engine, "web-1", 1).await;

    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    let snapshot = next_frame(&mut stream).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["agents"][0]["agent_id"], "web-1");

    post_report(addr, json!({"agent_id": "web-2", "sequence": 1})).await;

    let update = next_frame(&mut stream).await;
    assert_eq!(update["type"], "updated");
    assert_eq!(update["agent_id"], "web-2");
    assert_eq!(update["state"]["accepted_total"], 1);
}

#[tokio::test]
async fn test_stream_closes_on_shutdown() {
    let (addr, engine) = spawn_test_api(test_config()).await;

    let (mut stream, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();
    let snapshot = next_frame(&mut stream).await;
    assert_eq!(snapshot, json!({"type": "snapshot", "agents": []}));

    engine.shutdown();

    let end = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap();
    assert!(matches!(end, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_payload_limit_is_admissions_to_enforce() {
    let mut config = test_config();
    config.admission.max_payload_bytes = 3 * 1024 * 1024;
    let (addr, engine) = spawn_test_api(config).await;

    // larger than axum's built-in 2 MiB default, still within the configured limit
    let (status, body) = post_report(
        addr,
        json!({"agent_id": "big", "payload": {"blob": "x".repeat(2_500_000)}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], true);
    wait_for_accepted(&engine, "big", 1).await;

    let (status, body) = post_report(
        addr,
        json!({"agent_id": "big", "payload": {"blob": "x".repeat(3 * 1024 * 1024)}}),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({"status": "rejected", "reason": "payload_too_large"}));
}

#[tokio::test]
async fn test_body_just_over_limit_gets_json_rejection() {
    let mut config = test_config();
    config.admission.max_payload_bytes = 64;
    let (addr, _engine) = spawn_test_api(config).await;

    let report = json!({"agent_id": "web-1", "payload": {"pad": ""}});
    let padding = 65 - serde_json::to_vec(&report).unwrap().len();
    let report = json!({"agent_id": "web-1", "payload": {"pad": "p".repeat(padding)}});
    assert_eq!(serde_json::to_vec(&report).unwrap().len(), 65);

    let (status, body) = post_report(addr, report).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({"status": "rejected", "reason": "payload_too_large"}));
}
