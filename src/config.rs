use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

/// Errors raised while loading or validating the hub configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Hub configuration, validated once at startup and immutable afterwards
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub api: ApiSection,
    pub admission: AdmissionConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub broadcast: BroadcastConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub bind: SocketAddr,
    pub auth_token: Option<String>,
    pub enable_cors: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            auth_token: None,
            enable_cors: true,
        }
    }
}

/// Token bucket and payload limits applied per agent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Burst size of each agent's bucket
    pub bucket_capacity: u32,

    /// Tokens added per second
    pub refill_per_sec: f64,

    /// Hard cap on the raw report size in bytes
    pub max_payload_bytes: usize,

    /// When set, only these agents are admitted
    pub allowlist: Option<HashSet<String>>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 10,
            refill_per_sec: 1.0,
            max_payload_bytes: 64 * 1024,
            allowlist: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Per-agent queue capacity
    pub queue_capacity: usize,

    /// Idle time after which a per-agent worker retires
    pub worker_idle_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            worker_idle_timeout_secs: 300,
        }
    }
}

impl IngestConfig {
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of reports kept per agent (K)
    pub history_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Outbound queue capacity per subscriber, including the gap marker slot
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub sweep_interval_secs: u64,
    pub stale_after_secs: u64,
    pub dead_after_secs: u64,
    pub retain_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            stale_after_secs: 60,
            dead_after_secs: 300,
            retain_after_secs: 3600,
        }
    }
}

/// Upper bound for every health threshold; "retain forever" is spelled as this
pub const MAX_THRESHOLD_SECS: u64 = 100 * 365 * 24 * 3600;

fn threshold(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl HealthConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        threshold(self.stale_after_secs)
    }

    pub fn dead_after(&self) -> chrono::Duration {
        threshold(self.dead_after_secs)
    }

    pub fn retain_after(&self) -> chrono::Duration {
        threshold(self.retain_after_secs)
    }
}

impl HubConfig {
    /// Load configuration from a TOML file, or use defaults if no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str::<HubConfig>(&content).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => HubConfig::default(),
        };

        config.validate()?;
        trace!("loaded config: {config:?}");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.admission.bucket_capacity == 0 {
            return invalid("admission.bucket_capacity must be at least 1");
        }
        if !self.admission.refill_per_sec.is_finite() || self.admission.refill_per_sec <= 0.0 {
            return invalid("admission.refill_per_sec must be a positive number");
        }
        if self.admission.max_payload_bytes == 0 {
            return invalid("admission.max_payload_bytes must be at least 1");
        }
        if let Some(allowlist) = &self.admission.allowlist
            && allowlist.iter().any(|id| id.trim().is_empty())
        {
            return invalid("admission.allowlist must not contain empty agent ids");
        }
        if self.ingest.queue_capacity == 0 {
            return invalid("ingest.queue_capacity must be at least 1");
        }
        if self.ingest.worker_idle_timeout_secs == 0 {
            return invalid("ingest.worker_idle_timeout_secs must be at least 1");
        }
        if self.store.history_capacity == 0 {
            return invalid("store.history_capacity must be at least 1");
        }
        if self.broadcast.subscriber_capacity < 2 {
            return invalid("broadcast.subscriber_capacity must be at least 2");
        }
        if self.health.sweep_interval_secs == 0 {
            return invalid("health.sweep_interval_secs must be at least 1");
        }
        if self.health.stale_after_secs == 0 {
            return invalid("health.stale_after_secs must be at least 1");
        }
        for (name, secs) in [
            ("health.stale_after_secs", self.health.stale_after_secs),
            ("health.dead_after_secs", self.health.dead_after_secs),
            ("health.retain_after_secs", self.health.retain_after_secs),
        ] {
            if secs > MAX_THRESHOLD_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_THRESHOLD_SECS}"
                )));
            }
        }
        if self.health.dead_after_secs <= self.health.stale_after_secs {
            return invalid("health.dead_after_secs must be greater than health.stale_after_secs");
        }

        Ok(())
    }
}
