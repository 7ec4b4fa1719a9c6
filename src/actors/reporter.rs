//! ReporterActor - Pushes host metrics from the agent to the hub
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Sample host → POST /api/v1/reports (agent_id, sequence, payload)
//!     ↑
//!     └─── Commands (ReportNow, Shutdown)
//! ```
//!
//! Every sample carries the next sequence number. Numbering starts at the boot
//! time in microseconds, so a restarted agent keeps counting above whatever the
//! hub saw from its previous run.
//!
//! A failed send is logged and left behind: the hub's ordering gate makes a
//! resend harmless, but deciding to resend is up to whoever drives the reporter.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use crate::sampler::MetricSource;
use crate::{AgentId, util};

use super::messages::{IngestAck, ReporterCommand};

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Hub base URL, e.g. `http://localhost:3000`
    pub server_url: String,

    pub agent_id: AgentId,

    pub interval: Duration,
}

impl ReporterConfig {
    /// Build from `SERVER_URL`, `AGENT_ID` and `INTERVAL`
    pub fn from_env() -> Self {
        Self {
            server_url: util::get_server_url(),
            agent_id: util::get_agent_id(),
            interval: util::get_interval(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/reports", self.server_url.trim_end_matches('/'))
    }
}

pub struct ReporterActor {
    config: ReporterConfig,

    /// HTTP client (reused across requests)
    client: reqwest::Client,

    source: Box<dyn MetricSource>,

    command_rx: mpsc::Receiver<ReporterCommand>,

    /// Sequence number of the next report
    next_sequence: u64,
}

impl ReporterActor {
    pub fn new(
        config: ReporterConfig,
        source: Box<dyn MetricSource>,
        command_rx: mpsc::Receiver<ReporterCommand>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            source,
            command_rx,
            next_sequence: boot_sequence(),
        })
    }

    #[instrument(skip(self), fields(agent_id = %self.config.agent_id))]
    pub async fn run(mut self) {
        debug!(
            "reporting to {} every {:?}",
            self.config.server_url, self.config.interval
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_report().await {
                        error!("failed to send metrics: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ReporterCommand::ReportNow { respond_to } => {
                            debug!("received ReportNow command");
                            let result = self.send_report().await;
                            let _ = respond_to.send(result);
                        }

                        ReporterCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("reporter actor stopped");
    }

    async fn send_report(&mut self) -> Result<IngestAck> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let body = json!({
            "agent_id": self.config.agent_id,
            "sequence": sequence,
            "payload": self.source.sample(),
        });

        trace!(sequence, "sending report");

        let response = self
            .client
            .post(self.config.endpoint())
            .json(&body)
            .send()
            .await
            .context("failed to send HTTP request")?;

        let status = response.status();
        let ack: IngestAck = response
            .json()
            .await
            .with_context(|| format!("failed to parse hub response (HTTP {status})"))?;

        if !status.is_success() {
            anyhow::bail!(
                "report {sequence} rejected: {} (HTTP {status})",
                ack.reason.as_deref().unwrap_or("unknown reason")
            );
        }

        if !ack.queued {
            warn!(sequence, "hub accepted report but could not queue it");
        }

        debug!(sequence, "metrics sent");
        Ok(ack)
    }
}

fn boot_sequence() -> u64 {
    u64::try_from(Utc::now().timestamp_micros())
        .unwrap_or(0)
        .max(1)
}

/// Handle for controlling a ReporterActor
#[derive(Clone)]
pub struct ReporterHandle {
    sender: mpsc::Sender<ReporterCommand>,
    pub agent_id: AgentId,
}

impl ReporterHandle {
    pub fn spawn(config: ReporterConfig, source: Box<dyn MetricSource>) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let agent_id = config.agent_id.clone();

        let actor = ReporterActor::new(config, source, cmd_rx)?;
        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            agent_id,
        })
    }

    /// Sample and send immediately
    pub async fn report_now(&self) -> Result<IngestAck> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::ReportNow { respond_to: tx })
            .await
            .context("failed to send ReportNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ReporterCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
