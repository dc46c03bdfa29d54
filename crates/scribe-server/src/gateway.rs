//! Ingestion gateway: turns hook requests into durable entities exactly once.
//!
//! Every request gets a row in the webhook event ledger keyed by its
//! request id, and walks `Pending → Processing → terminal`. Retries of a
//! failed or invalid request reclaim the existing row; replays of a
//! succeeded request are answered from the ledger without touching
//! entities. Entity-level idempotency is enforced by the store's UNIQUE
//! constraints, so two racing requests with different ids still converge
//! on one conversation, message, or tool use.

use chrono::{DateTime, Utc};
use scribe_core::{read_transcript, title_from_prompt, IngestStore, Result, TranscriptEntry,
    TITLE_MIN_PROMPT_LEN};
use scribe_types::{
    Conversation, EventStatus, HookEvent, HookRequest, MessageRole, StoredMessage, ToolCategory,
    ToolUseRecord, WebhookEvent,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one gateway request, mirrored into the event ledger.
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub request_id: String,
    pub status: EventStatus,
    pub conversation_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub tool_use_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

impl GatewayReply {
    fn from_event(event: &WebhookEvent) -> Self {
        Self {
            request_id: event.request_id.clone(),
            status: event.status,
            conversation_id: event.conversation_id,
            message_id: event.message_id,
            tool_use_id: event.tool_use_id,
            error_message: event.error_message.clone(),
            error_code: event.error_code.clone(),
        }
    }
}

/// Result of a per-event handler before it is written to the ledger.
#[derive(Debug, Default)]
struct Handled {
    status: Option<EventStatus>,
    conversation_id: Option<Uuid>,
    message_id: Option<Uuid>,
    tool_use_id: Option<Uuid>,
    error_message: Option<String>,
    error_code: Option<String>,
}

impl Handled {
    fn success(conversation_id: Uuid) -> Self {
        Self {
            status: Some(EventStatus::Success),
            conversation_id: Some(conversation_id),
            ..Default::default()
        }
    }

    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: Some(EventStatus::Error),
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// The gateway. One instance per server, shared across requests.
pub struct IngestGateway {
    store: Arc<IngestStore>,
}

impl IngestGateway {
    pub fn new(store: Arc<IngestStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<IngestStore> {
        &self.store
    }

    /// Process one ingestion request body under the given request id.
    ///
    /// Infallible from the caller's perspective except for storage errors,
    /// which surface as `Err` because they cannot be recorded in the
    /// ledger either.
    pub fn ingest(&self, request_id: &str, body: &[u8]) -> Result<GatewayReply> {
        let started = Instant::now();

        let request: HookRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                // Unparseable body: ledger the attempt under whatever id we
                // have, with placeholder event metadata.
                warn!(target: "scribe::gateway", "Rejecting unparseable body for request {}: {}", request_id, e);
                let row = WebhookEvent::new(
                    request_id.to_string(),
                    "unknown".to_string(),
                    "unknown".to_string(),
                );
                self.store.insert_webhook_event(&row)?;
                if self.store.mark_processing(request_id)? {
                    self.store.mark_terminal(
                        request_id,
                        EventStatus::Invalid,
                        elapsed_ms(started),
                        None,
                        None,
                        None,
                        Some(&e.to_string()),
                        Some("MALFORMED_JSON"),
                    )?;
                }
                let stored = self.require_event(request_id)?;
                return Ok(GatewayReply::from_event(&stored));
            }
        };

        let row = WebhookEvent::new(
            request_id.to_string(),
            request.event.clone(),
            request.session_id.clone(),
        );
        let created = self.store.insert_webhook_event(&row)?;
        if !created {
            let existing = self.require_event(request_id)?;
            match existing.status {
                // Completed work is replayed from the ledger, entities
                // untouched.
                EventStatus::Success | EventStatus::Duplicate => {
                    debug!(
                        target: "scribe::gateway",
                        "Replaying terminal event for request {} ({})",
                        request_id,
                        existing.status.as_str()
                    );
                    return Ok(GatewayReply::from_event(&existing));
                }
                // A concurrent attempt holds the row; report its state
                // without competing.
                EventStatus::Processing => {
                    debug!(
                        target: "scribe::gateway",
                        "Request {} already in flight",
                        request_id
                    );
                    return Ok(GatewayReply::from_event(&existing));
                }
                // Pending, error, and invalid rows are claimed below.
                EventStatus::Pending | EventStatus::Error | EventStatus::Invalid => {}
            }
        }

        if !self.store.mark_processing(request_id)? {
            // Lost the claim race to another worker.
            let existing = self.require_event(request_id)?;
            return Ok(GatewayReply::from_event(&existing));
        }

        let event = match HookEvent::try_from(request) {
            Ok(e) => e,
            Err(e) => {
                info!(target: "scribe::gateway", "Request {} failed validation: {}", request_id, e);
                self.store.mark_terminal(
                    request_id,
                    EventStatus::Invalid,
                    elapsed_ms(started),
                    None,
                    None,
                    None,
                    Some(&e.to_string()),
                    Some("VALIDATION_FAILED"),
                )?;
                let stored = self.require_event(request_id)?;
                return Ok(GatewayReply::from_event(&stored));
            }
        };

        let handled = match self.dispatch(&event) {
            Ok(h) => h,
            Err(e) => {
                warn!(
                    target: "scribe::gateway",
                    "Processing failed for request {} ({}): {}",
                    request_id,
                    event.event_type().as_str(),
                    e
                );
                Handled::error("PROCESSING_FAILED", e.to_string())
            }
        };

        let status = handled.status.unwrap_or(EventStatus::Success);
        self.store.mark_terminal(
            request_id,
            status,
            elapsed_ms(started),
            handled.conversation_id,
            handled.message_id,
            handled.tool_use_id,
            handled.error_message.as_deref(),
            handled.error_code.as_deref(),
        )?;

        info!(
            target: "scribe::gateway",
            "Request {} ({}) -> {} in {}ms",
            request_id,
            event.event_type().as_str(),
            status.as_str(),
            elapsed_ms(started)
        );

        let stored = self.require_event(request_id)?;
        Ok(GatewayReply::from_event(&stored))
    }

    fn require_event(&self, request_id: &str) -> Result<WebhookEvent> {
        self.store.find_webhook_event(request_id)?.ok_or_else(|| {
            scribe_core::ScribeError::ParseError(format!(
                "event row vanished for request {request_id}"
            ))
        })
    }

    fn dispatch(&self, event: &HookEvent) -> Result<Handled> {
        match event {
            HookEvent::SessionStart {
                session_id,
                model,
                cwd,
                timestamp,
                ..
            } => self.handle_session_start(session_id, model.clone(), cwd.clone(), *timestamp),

            HookEvent::PromptSubmit {
                session_id,
                prompt,
                timestamp,
            } => self.handle_prompt_submit(session_id, prompt, *timestamp),

            HookEvent::PostToolUse {
                session_id,
                tool_name,
                tool_input,
                tool_response,
                tool_use_id,
                timestamp,
            } => self.handle_post_tool_use(
                session_id,
                tool_name,
                tool_input,
                tool_response,
                tool_use_id,
                *timestamp,
            ),

            HookEvent::SessionEnd {
                session_id,
                transcript_path,
                total_cost_usd,
                input_tokens,
                output_tokens,
                timestamp,
                ..
            } => self.handle_session_end(
                session_id,
                transcript_path.as_deref(),
                *total_cost_usd,
                *input_tokens,
                *output_tokens,
                *timestamp,
            ),
        }
    }

    fn handle_session_start(
        &self,
        session_id: &str,
        model: Option<String>,
        cwd: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Handled> {
        let mut conversation = Conversation::new(session_id.to_string(), timestamp);
        conversation.model = model;
        conversation.working_dir = cwd;

        let (conversation, created) = self.store.create_conversation(&conversation)?;
        let mut handled = Handled::success(conversation.id);
        if !created {
            handled.status = Some(EventStatus::Duplicate);
        }
        Ok(handled)
    }

    fn handle_prompt_submit(
        &self,
        session_id: &str,
        prompt: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Handled> {
        let conversation = self.find_or_create_conversation(session_id, timestamp)?;

        let message =
            StoredMessage::new(conversation.id, MessageRole::User, prompt.to_string(), timestamp);
        let (message_id, inserted) = self.store.insert_message(&message)?;

        if inserted && !conversation.has_real_title && prompt.trim().len() >= TITLE_MIN_PROMPT_LEN {
            self.store
                .set_title(conversation.id, &title_from_prompt(prompt))?;
        }

        let mut handled = Handled::success(conversation.id);
        handled.message_id = Some(message_id);
        if !inserted {
            handled.status = Some(EventStatus::Duplicate);
        }
        Ok(handled)
    }

    fn handle_post_tool_use(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_input: &Value,
        tool_response: &Value,
        tool_use_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Handled> {
        let Some(conversation) = self.store.find_conversation_by_session(session_id)? else {
            return Ok(Handled::error(
                "NO_CONVERSATION",
                format!("no conversation for session {session_id}"),
            ));
        };

        // Tool uses hang off the assistant message that invoked them. With
        // no assistant message yet there is nothing to attach to.
        let Some(parent) = self.store.latest_assistant_message(conversation.id)? else {
            return Ok(Handled::error(
                "NO_ASSISTANT_MESSAGE",
                format!("no assistant message in conversation {}", conversation.id),
            ));
        };

        let record = ToolUseRecord {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            message_id: parent.id,
            tool_use_id: tool_use_id.to_string(),
            tool_name: tool_name.to_string(),
            input: tool_input.clone(),
            output: Some(tool_response.clone()),
            is_error: false,
            category: ToolCategory::from_tool_name(tool_name),
            timestamp,
        };
        let (id, inserted) = self.store.insert_tool_use(&record)?;

        let mut handled = Handled::success(conversation.id);
        handled.message_id = Some(parent.id);
        handled.tool_use_id = Some(id);
        if !inserted {
            handled.status = Some(EventStatus::Duplicate);
        }
        Ok(handled)
    }

    fn handle_session_end(
        &self,
        session_id: &str,
        transcript_path: Option<&str>,
        total_cost_usd: Option<f64>,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        timestamp: DateTime<Utc>,
    ) -> Result<Handled> {
        let conversation = self.find_or_create_conversation(session_id, timestamp)?;

        if let Some(path) = transcript_path {
            // Reconciliation failures leave the session end intact: the
            // conversation still closes with whatever was ingested live.
            match self.reconcile_transcript(&conversation, Path::new(path)) {
                Ok((messages, tool_uses)) => {
                    if messages > 0 || tool_uses > 0 {
                        info!(
                            target: "scribe::gateway",
                            "Reconciled conversation {}: {} message(s), {} tool use(s) backfilled",
                            conversation.id,
                            messages,
                            tool_uses
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        target: "scribe::gateway",
                        "Transcript reconciliation failed for conversation {}: {}",
                        conversation.id,
                        e
                    );
                }
            }
        }

        self.store.end_conversation(
            conversation.id,
            timestamp,
            total_cost_usd.unwrap_or(conversation.total_cost_usd),
            input_tokens.unwrap_or(conversation.input_tokens),
            output_tokens.unwrap_or(conversation.output_tokens),
        )?;

        Ok(Handled::success(conversation.id))
    }

    /// Backfill messages and tool uses from a transcript file. The
    /// transcript is the source of truth at session end: anything a
    /// dropped hook delivery missed is inserted here, with the dedup
    /// signature collapsing entries that were already ingested live.
    fn reconcile_transcript(
        &self,
        conversation: &Conversation,
        path: &Path,
    ) -> Result<(usize, usize)> {
        let entries = read_transcript(path)?;
        let mut messages_inserted = 0usize;
        let mut tool_uses_inserted = 0usize;
        let mut last_assistant: Option<Uuid> = None;

        for entry in entries {
            match entry {
                TranscriptEntry::Message {
                    role,
                    text,
                    timestamp,
                    parent_tool_use_id,
                } => {
                    let Some(role) = MessageRole::parse(&role) else {
                        warn!(
                            target: "scribe::gateway",
                            "Skipping transcript message with unknown role '{}'",
                            role
                        );
                        continue;
                    };
                    let mut message =
                        StoredMessage::new(conversation.id, role, text, timestamp);
                    message.parent_tool_use_id = parent_tool_use_id;
                    let (id, inserted) = self.store.insert_message(&message)?;
                    if role == MessageRole::Assistant {
                        last_assistant = Some(id);
                    }
                    if inserted {
                        messages_inserted += 1;
                    }
                }
                TranscriptEntry::ToolUse {
                    tool_use_id,
                    tool_name,
                    input,
                    output,
                    is_error,
                    timestamp,
                } => {
                    let message_id = match last_assistant {
                        Some(id) => id,
                        None => match self.store.latest_assistant_message(conversation.id)? {
                            Some(m) => m.id,
                            None => {
                                warn!(
                                    target: "scribe::gateway",
                                    "Skipping transcript tool use {} with no assistant message",
                                    tool_use_id
                                );
                                continue;
                            }
                        },
                    };
                    let record = ToolUseRecord {
                        id: Uuid::new_v4(),
                        conversation_id: conversation.id,
                        message_id,
                        tool_use_id,
                        tool_name: tool_name.clone(),
                        input,
                        output: Some(output),
                        is_error,
                        category: ToolCategory::from_tool_name(&tool_name),
                        timestamp,
                    };
                    let (_, inserted) = self.store.insert_tool_use(&record)?;
                    if inserted {
                        tool_uses_inserted += 1;
                    }
                }
            }
        }

        Ok((messages_inserted, tool_uses_inserted))
    }

    fn find_or_create_conversation(
        &self,
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Conversation> {
        let conversation = Conversation::new(session_id.to_string(), timestamp);
        let (conversation, created) = self.store.create_conversation(&conversation)?;
        if created {
            debug!(
                target: "scribe::gateway",
                "Auto-created conversation {} for session {}",
                conversation.id,
                session_id
            );
        }
        Ok(conversation)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
