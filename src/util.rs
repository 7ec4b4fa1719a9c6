use std::time::Duration;

use sysinfo::System;

const SERVER_URL: &str = "SERVER_URL";

const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

pub fn get_server_url() -> String {
    std::env::var(SERVER_URL)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

const AGENT_ID: &str = "AGENT_ID";

pub fn get_agent_id() -> String {
    std::env::var(AGENT_ID)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| String::from("unknown"))
}

const INTERVAL: &str = "INTERVAL";

const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// Reporting interval, given in milliseconds
pub fn get_interval() -> Duration {
    let interval_from_env = std::env::var(INTERVAL);
    let millis = interval_from_env.map_or(DEFAULT_INTERVAL_MS, |res| {
        res.parse().ok().filter(|ms| *ms > 0).unwrap_or(DEFAULT_INTERVAL_MS)
    });
    Duration::from_millis(millis)
}
