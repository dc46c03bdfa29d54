//! Delivers finalized capture sessions to the ingestion gateway.
//!
//! When a supervised session finalizes, the forwarder spools its transcript
//! to disk, then replays the session as hook events: one session-start, one
//! prompt-submit per user prompt, and a session-end carrying the transcript
//! path. Request ids are derived from the session id and position, so a
//! redelivery after a crash hits the gateway's idempotency instead of
//! duplicating entities.
//!
//! Delivery is in-process by default; with a `forward_url` configured the
//! same events go out over HTTP with bounded retries.

use crate::gateway::IngestGateway;
use anyhow::{Context, Result};
use scribe_core::{write_transcript, SupervisorEvent};
use scribe_types::{CapturedSession, HookRequest, SessionOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Where hook events are sent after spooling.
pub enum DeliveryTarget {
    /// Hand events straight to the local gateway.
    Local(Arc<IngestGateway>),
    /// POST events to a remote gateway.
    Remote {
        client: reqwest::Client,
        url: String,
        auth_token: Option<String>,
    },
}

pub struct CaptureForwarder {
    spool_dir: PathBuf,
    target: DeliveryTarget,
}

/// Retries per HTTP delivery before giving up on an event.
const MAX_HTTP_RETRIES: u32 = 4;

impl CaptureForwarder {
    pub fn new(spool_dir: PathBuf, target: DeliveryTarget) -> Self {
        Self { spool_dir, target }
    }

    /// Consume supervisor events until the channel closes.
    pub async fn run(self, mut events: broadcast::Receiver<SupervisorEvent>) {
        loop {
            match events.recv().await {
                Ok(SupervisorEvent::Finalized(session)) => {
                    if let Err(e) = self.forward(&session).await {
                        error!(
                            target: "scribe::forwarder",
                            "Failed to forward session {}: {}",
                            session.session_id,
                            e
                        );
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(target: "scribe::forwarder", "Dropped {} supervisor event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!(target: "scribe::forwarder", "Forwarder loop ended");
    }

    /// Spool and deliver one finalized session.
    pub async fn forward(&self, session: &CapturedSession) -> Result<()> {
        let transcript_path = self
            .spool_dir
            .join(format!("{}.jsonl", session.session_id));
        write_transcript(&transcript_path, session)
            .with_context(|| format!("spooling transcript for {}", session.session_id))?;

        let requests = build_hook_requests(session, &transcript_path.to_string_lossy());
        let total = requests.len();
        for (request_id, request) in requests {
            self.deliver(&request_id, &request).await?;
        }

        info!(
            target: "scribe::forwarder",
            "Forwarded session {} ({} event(s), transcript at {:?})",
            session.session_id,
            total,
            transcript_path
        );
        Ok(())
    }

    async fn deliver(&self, request_id: &str, request: &HookRequest) -> Result<()> {
        match &self.target {
            DeliveryTarget::Local(gateway) => {
                let body = serde_json::to_vec(request)?;
                let reply = gateway.ingest(request_id, &body)?;
                debug!(
                    target: "scribe::forwarder",
                    "Delivered {} locally -> {}",
                    request_id,
                    reply.status.as_str()
                );
                Ok(())
            }
            DeliveryTarget::Remote {
                client,
                url,
                auth_token,
            } => {
                let response = post_with_retry(
                    client,
                    url,
                    auth_token.as_deref(),
                    request_id,
                    request,
                    MAX_HTTP_RETRIES,
                )
                .await?;
                if !response.status().is_success() {
                    warn!(
                        target: "scribe::forwarder",
                        "Remote gateway rejected {} with HTTP {}",
                        request_id,
                        response.status()
                    );
                }
                Ok(())
            }
        }
    }
}

/// POST one event with exponential backoff. Retries on 5xx and network
/// errors only; a 4xx is final.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
    request_id: &str,
    request: &HookRequest,
    max_retries: u32,
) -> Result<reqwest::Response> {
    let max_attempts = max_retries + 1;

    for attempt in 0..max_attempts {
        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-request-id", request_id);
        if let Some(token) = auth_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        match req.json(request).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                if attempt + 1 < max_attempts {
                    let status = resp.status();
                    let next_delay = 1u64 << attempt.min(4);
                    warn!(
                        target: "scribe::forwarder",
                        "Delivery attempt {}/{} for {} failed (HTTP {}), retrying in {}s",
                        attempt + 1,
                        max_attempts,
                        request_id,
                        status,
                        next_delay
                    );
                    tokio::time::sleep(Duration::from_secs(next_delay)).await;
                } else {
                    return Ok(resp);
                }
            }
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt + 1 < max_attempts {
                    let next_delay = 1u64 << attempt.min(4);
                    warn!(
                        target: "scribe::forwarder",
                        "Delivery attempt {}/{} for {} failed ({}), retrying in {}s",
                        attempt + 1,
                        max_attempts,
                        request_id,
                        e,
                        next_delay
                    );
                    tokio::time::sleep(Duration::from_secs(next_delay)).await;
                } else {
                    return Err(e).context("failed to reach gateway after retries");
                }
            }
        }
    }

    unreachable!()
}

/// Expand a finalized session into (request id, hook request) pairs.
///
/// Request ids are deterministic per session and position so the whole
/// batch can be replayed safely.
fn build_hook_requests(
    session: &CapturedSession,
    transcript_path: &str,
) -> Vec<(String, HookRequest)> {
    let sid = &session.session_id;
    let mut out = Vec::new();

    out.push((
        format!("{sid}-start"),
        HookRequest {
            event: "session-start".to_string(),
            session_id: sid.clone(),
            timestamp: Some(session.spawned_at),
            model: session.model.clone(),
            cwd: session.working_dir.clone(),
            source: Some("capture".to_string()),
            ..Default::default()
        },
    ));

    // One prompt-submit per user message that carries text. Pure
    // tool-result turns have no prompt to ingest.
    let mut prompt_seq = 0usize;
    for message in &session.messages {
        if message.role != "user" || message.text.trim().is_empty() {
            continue;
        }
        out.push((
            format!("{sid}-prompt-{prompt_seq}"),
            HookRequest {
                event: "prompt-submit".to_string(),
                session_id: sid.clone(),
                timestamp: Some(message.timestamp),
                prompt: Some(message.text.clone()),
                ..Default::default()
            },
        ));
        prompt_seq += 1;
    }

    let reason = match session.outcome {
        SessionOutcome::Completed => "completed",
        SessionOutcome::Stopped => "stopped",
        SessionOutcome::Failed => "failed",
    };
    out.push((
        format!("{sid}-end"),
        HookRequest {
            event: "session-end".to_string(),
            session_id: sid.clone(),
            timestamp: Some(session.finalized_at),
            reason: Some(reason.to_string()),
            transcript_path: Some(transcript_path.to_string()),
            total_cost_usd: Some(session.total_cost_usd),
            input_tokens: Some(session.input_tokens),
            output_tokens: Some(session.output_tokens),
            ..Default::default()
        },
    ));

    out
}
