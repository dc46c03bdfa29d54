//! SQLite persistence for the ingestion gateway.
//!
//! The UNIQUE constraints in this schema are the idempotency mechanism:
//! in-process duplicate checks are a fast path only, and the database is
//! the final arbiter of whether an entity already exists. Every insert
//! here is `INSERT OR IGNORE` followed by a read-back, so concurrent
//! duplicate requests converge on one row.

use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use scribe_types::{
    Conversation, EventStatus, MessageRole, StoredMessage, ToolCategory, ToolUseRecord,
    WebhookEvent,
};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// SQLite-backed store for conversations, messages, tool uses, and the
/// webhook event ledger.
pub struct IngestStore {
    conn: Mutex<Connection>,
}

impl IngestStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                title TEXT NOT NULL,
                has_real_title INTEGER NOT NULL DEFAULT 0,
                model TEXT,
                working_dir TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                total_cost_usd REAL NOT NULL DEFAULT 0.0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_session_id
                ON conversations(session_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_started_at
                ON conversations(started_at);
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                parent_tool_use_id TEXT,
                dedup_signature TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_id
                ON messages(conversation_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_dedup
                ON messages(conversation_id, dedup_signature);
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_uses (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                tool_use_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                tool_input TEXT NOT NULL,
                tool_output TEXT,
                is_error INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tool_uses_conversation_id
                ON tool_uses(conversation_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tool_uses_call_id
                ON tool_uses(conversation_id, tool_use_id);
            "#,
        )?;

        // Audit ledger: one row per distinct request id, never deleted.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_events (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                received_at TEXT NOT NULL,
                processed_at TEXT,
                processing_ms INTEGER,
                conversation_id TEXT,
                message_id TEXT,
                tool_use_id TEXT,
                error_message TEXT,
                error_code TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_events_request_id
                ON webhook_events(request_id);
            CREATE INDEX IF NOT EXISTS idx_webhook_events_session_id
                ON webhook_events(session_id);
            CREATE INDEX IF NOT EXISTS idx_webhook_events_status
                ON webhook_events(status);
            "#,
        )?;

        Ok(())
    }

    // ----- conversations -----

    /// Create the conversation for a session id, or return the existing one.
    /// The bool is true when this call created the row.
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<(Conversation, bool)> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO conversations
                (id, session_id, title, has_real_title, model, working_dir,
                 started_at, ended_at, total_cost_usd, input_tokens, output_tokens)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                conversation.id.to_string(),
                conversation.session_id,
                conversation.title,
                conversation.has_real_title,
                conversation.model,
                conversation.working_dir,
                conversation.started_at.to_rfc3339(),
                conversation.ended_at.map(|t| t.to_rfc3339()),
                conversation.total_cost_usd,
                conversation.input_tokens,
                conversation.output_tokens,
            ],
        )?;
        let created = conn.changes() > 0;

        let existing = Self::query_conversation(
            &conn,
            "SELECT * FROM conversations WHERE session_id = ?1",
            &conversation.session_id,
        )?
        .expect("conversation row must exist after insert");
        Ok((existing, created))
    }

    pub fn find_conversation_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        Self::query_conversation(
            &conn,
            "SELECT * FROM conversations WHERE session_id = ?1",
            session_id,
        )
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        Self::query_conversation(
            &conn,
            "SELECT * FROM conversations WHERE id = ?1",
            &id.to_string(),
        )
    }

    /// All conversations, most recent first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM conversations ORDER BY started_at DESC")?;
        let rows = stmt.query_map([], Self::row_to_conversation)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Promote a placeholder title to a real one. A real title is never
    /// overwritten.
    pub fn set_title(&self, conversation_id: Uuid, title: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET title = ?1, has_real_title = 1
             WHERE id = ?2 AND has_real_title = 0",
            params![title, conversation_id.to_string()],
        )?;
        Ok(conn.changes() > 0)
    }

    /// Record session end: timestamp plus final cost and token totals.
    pub fn end_conversation(
        &self,
        conversation_id: Uuid,
        ended_at: DateTime<Utc>,
        total_cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations
             SET ended_at = ?1, total_cost_usd = ?2, input_tokens = ?3, output_tokens = ?4
             WHERE id = ?5",
            params![
                ended_at.to_rfc3339(),
                total_cost_usd,
                input_tokens,
                output_tokens,
                conversation_id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ----- messages -----

    /// Insert a message unless one with the same dedup signature already
    /// exists in the conversation. Returns the surviving row's id and
    /// whether this call inserted it.
    pub fn insert_message(&self, message: &StoredMessage) -> Result<(Uuid, bool)> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO messages
                (id, conversation_id, role, content, timestamp, parent_tool_use_id, dedup_signature)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.role.as_str(),
                message.text,
                message.timestamp.to_rfc3339(),
                message.parent_tool_use_id,
                message.dedup_signature,
            ],
        )?;
        let inserted = conn.changes() > 0;

        let id: String = conn.query_row(
            "SELECT id FROM messages WHERE conversation_id = ?1 AND dedup_signature = ?2",
            params![message.conversation_id.to_string(), message.dedup_signature],
            |row| row.get(0),
        )?;
        Ok((parse_uuid(&id)?, inserted))
    }

    /// Most recent assistant message in a conversation, if any. Used to
    /// attach tool uses when the invoking message is not identified.
    pub fn latest_assistant_message(&self, conversation_id: Uuid) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages
             WHERE conversation_id = ?1 AND role = 'assistant'
             ORDER BY timestamp DESC, rowid DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![conversation_id.to_string()], Self::row_to_message)
            .optional()?;
        Ok(row)
    }

    pub fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY timestamp, rowid",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], Self::row_to_message)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn message_count(&self, conversation_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ----- tool uses -----

    /// Insert a tool use unless the conversation already has one with the
    /// same external call id.
    pub fn insert_tool_use(&self, record: &ToolUseRecord) -> Result<(Uuid, bool)> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO tool_uses
                (id, conversation_id, message_id, tool_use_id, tool_name,
                 tool_input, tool_output, is_error, category, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id.to_string(),
                record.conversation_id.to_string(),
                record.message_id.to_string(),
                record.tool_use_id,
                record.tool_name,
                record.input.to_string(),
                record.output.as_ref().map(|v| v.to_string()),
                record.is_error,
                record.category.as_str(),
                record.timestamp.to_rfc3339(),
            ],
        )?;
        let inserted = conn.changes() > 0;

        let id: String = conn.query_row(
            "SELECT id FROM tool_uses WHERE conversation_id = ?1 AND tool_use_id = ?2",
            params![record.conversation_id.to_string(), record.tool_use_id],
            |row| row.get(0),
        )?;
        Ok((parse_uuid(&id)?, inserted))
    }

    pub fn list_tool_uses(&self, conversation_id: Uuid) -> Result<Vec<ToolUseRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tool_uses WHERE conversation_id = ?1 ORDER BY timestamp, rowid",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], Self::row_to_tool_use)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn tool_use_count(&self, conversation_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM tool_uses WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ----- webhook event ledger -----

    /// Record a new event row for a request id. Returns false when a row
    /// for this request id already exists (a retry or duplicate).
    pub fn insert_webhook_event(&self, event: &WebhookEvent) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO webhook_events
                (id, request_id, event_type, session_id, status, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.id.to_string(),
                event.request_id,
                event.event_type,
                event.session_id,
                event.status.as_str(),
                event.received_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.changes() > 0)
    }

    pub fn find_webhook_event(&self, request_id: &str) -> Result<Option<WebhookEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM webhook_events WHERE request_id = ?1")?;
        let row = stmt
            .query_row(params![request_id], Self::row_to_event)
            .optional()?;
        Ok(row)
    }

    /// Claim an event for processing. Only a pending row, or a retried row
    /// whose previous attempt ended in error or invalid, can be claimed;
    /// returns false otherwise.
    pub fn mark_processing(&self, request_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE webhook_events SET status = 'processing'
             WHERE request_id = ?1 AND status IN ('pending', 'error', 'invalid')",
            params![request_id],
        )?;
        Ok(conn.changes() > 0)
    }

    /// Record the terminal outcome of an event, with entity links and
    /// timing. Status must be terminal.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_terminal(
        &self,
        request_id: &str,
        status: EventStatus,
        processing_ms: u64,
        conversation_id: Option<Uuid>,
        message_id: Option<Uuid>,
        tool_use_id: Option<Uuid>,
        error_message: Option<&str>,
        error_code: Option<&str>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE webhook_events
            SET status = ?1, processed_at = ?2, processing_ms = ?3,
                conversation_id = ?4, message_id = ?5, tool_use_id = ?6,
                error_message = ?7, error_code = ?8
            WHERE request_id = ?9
            "#,
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                processing_ms,
                conversation_id.map(|u| u.to_string()),
                message_id.map(|u| u.to_string()),
                tool_use_id.map(|u| u.to_string()),
                error_message,
                error_code,
                request_id,
            ],
        )?;
        Ok(())
    }

    /// Events for a session, oldest first. Read-only audit view.
    pub fn list_webhook_events(&self, session_id: &str) -> Result<Vec<WebhookEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM webhook_events WHERE session_id = ?1 ORDER BY received_at, rowid",
        )?;
        let rows = stmt.query_map(params![session_id], Self::row_to_event)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ----- row mapping -----

    fn query_conversation(
        conn: &Connection,
        sql: &str,
        key: &str,
    ) -> Result<Option<Conversation>> {
        let mut stmt = conn.prepare(sql)?;
        let row = stmt
            .query_row(params![key], Self::row_to_conversation)
            .optional()?;
        Ok(row)
    }

    fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: column_uuid(row, "id")?,
            session_id: row.get("session_id")?,
            title: row.get("title")?,
            has_real_title: row.get("has_real_title")?,
            model: row.get("model")?,
            working_dir: row.get("working_dir")?,
            started_at: column_time(row, "started_at")?,
            ended_at: column_time_opt(row, "ended_at")?,
            total_cost_usd: row.get("total_cost_usd")?,
            input_tokens: row.get("input_tokens")?,
            output_tokens: row.get("output_tokens")?,
        })
    }

    fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
        let role: String = row.get("role")?;
        Ok(StoredMessage {
            id: column_uuid(row, "id")?,
            conversation_id: column_uuid(row, "conversation_id")?,
            role: MessageRole::parse(&role).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown role: {role}").into(),
                )
            })?,
            text: row.get("content")?,
            timestamp: column_time(row, "timestamp")?,
            parent_tool_use_id: row.get("parent_tool_use_id")?,
            dedup_signature: row.get("dedup_signature")?,
        })
    }

    fn row_to_tool_use(row: &Row<'_>) -> rusqlite::Result<ToolUseRecord> {
        let input: String = row.get("tool_input")?;
        let output: Option<String> = row.get("tool_output")?;
        let category: String = row.get("category")?;
        Ok(ToolUseRecord {
            id: column_uuid(row, "id")?,
            conversation_id: column_uuid(row, "conversation_id")?,
            message_id: column_uuid(row, "message_id")?,
            tool_use_id: row.get("tool_use_id")?,
            tool_name: row.get("tool_name")?,
            input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
            output: output.and_then(|s| serde_json::from_str(&s).ok()),
            is_error: row.get("is_error")?,
            category: ToolCategory::parse(&category),
            timestamp: column_time(row, "timestamp")?,
        })
    }

    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
        let status: String = row.get("status")?;
        let processing_ms: Option<u64> = row.get("processing_ms")?;
        Ok(WebhookEvent {
            id: column_uuid(row, "id")?,
            request_id: row.get("request_id")?,
            event_type: row.get("event_type")?,
            session_id: row.get("session_id")?,
            status: EventStatus::parse(&status).unwrap_or(EventStatus::Error),
            received_at: column_time(row, "received_at")?,
            processed_at: column_time_opt(row, "processed_at")?,
            processing_ms,
            conversation_id: column_uuid_opt(row, "conversation_id")?,
            message_id: column_uuid_opt(row, "message_id")?,
            tool_use_id: column_uuid_opt(row, "tool_use_id")?,
            error_message: row.get("error_message")?,
            error_code: row.get("error_code")?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::ScribeError::ParseError(format!("bad uuid: {e}")))
}

fn column_uuid(row: &Row<'_>, col: &str) -> rusqlite::Result<Uuid> {
    let s: String = row.get(col)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn column_uuid_opt(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(col)?;
    s.map(|s| {
        Uuid::parse_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn column_time(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn column_time_opt(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(col)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> IngestStore {
        IngestStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_conversation_unique_per_session() {
        let store = store();
        let (first, created) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();
        assert!(created);

        let (second, created) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        assert_eq!(store.list_conversations().unwrap().len(), 1);
    }

    #[test]
    fn test_message_dedup_by_signature() {
        let store = store();
        let (conv, _) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();

        let ts = Utc::now();
        let msg = StoredMessage::new(conv.id, MessageRole::User, "hello".into(), ts);
        let (id_a, inserted) = store.insert_message(&msg).unwrap();
        assert!(inserted);

        // Same role, content, and timestamp collides on the signature.
        let dup = StoredMessage::new(conv.id, MessageRole::User, "hello".into(), ts);
        let (id_b, inserted) = store.insert_message(&dup).unwrap();
        assert!(!inserted);
        assert_eq!(id_a, id_b);

        assert_eq!(store.message_count(conv.id).unwrap(), 1);
    }

    #[test]
    fn test_tool_use_unique_per_call_id() {
        let store = store();
        let (conv, _) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();
        let msg = StoredMessage::new(conv.id, MessageRole::Assistant, "working".into(), Utc::now());
        let (message_id, _) = store.insert_message(&msg).unwrap();

        let record = ToolUseRecord {
            id: Uuid::new_v4(),
            conversation_id: conv.id,
            message_id,
            tool_use_id: "t1".into(),
            tool_name: "Read".into(),
            input: json!({"file_path": "/a.rs"}),
            output: Some(json!("contents")),
            is_error: false,
            category: ToolCategory::FileSystem,
            timestamp: Utc::now(),
        };
        let (id_a, inserted) = store.insert_tool_use(&record).unwrap();
        assert!(inserted);

        let retry = ToolUseRecord {
            id: Uuid::new_v4(),
            ..record.clone()
        };
        let (id_b, inserted) = store.insert_tool_use(&retry).unwrap();
        assert!(!inserted);
        assert_eq!(id_a, id_b);
        assert_eq!(store.tool_use_count(conv.id).unwrap(), 1);
    }

    #[test]
    fn test_latest_assistant_message() {
        let store = store();
        let (conv, _) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        store
            .insert_message(&StoredMessage::new(conv.id, MessageRole::User, "q".into(), t0))
            .unwrap();
        store
            .insert_message(&StoredMessage::new(
                conv.id,
                MessageRole::Assistant,
                "first".into(),
                t0,
            ))
            .unwrap();
        store
            .insert_message(&StoredMessage::new(
                conv.id,
                MessageRole::Assistant,
                "second".into(),
                t1,
            ))
            .unwrap();

        let latest = store.latest_assistant_message(conv.id).unwrap().unwrap();
        assert_eq!(latest.text, "second");
    }

    #[test]
    fn test_title_promotion_is_one_way() {
        let store = store();
        let (conv, _) = store
            .create_conversation(&Conversation::new("s1".into(), Utc::now()))
            .unwrap();
        assert!(!conv.has_real_title);

        assert!(store.set_title(conv.id, "Fix the login bug").unwrap());
        // A second promotion attempt leaves the real title alone.
        assert!(!store.set_title(conv.id, "Something else").unwrap());

        let conv = store.get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(conv.title, "Fix the login bug");
        assert!(conv.has_real_title);
    }

    #[test]
    fn test_event_ledger_idempotency() {
        let store = store();
        let event = WebhookEvent::new("req-1".into(), "prompt-submit".into(), "s1".into());
        assert!(store.insert_webhook_event(&event).unwrap());

        let retry = WebhookEvent::new("req-1".into(), "prompt-submit".into(), "s1".into());
        assert!(!store.insert_webhook_event(&retry).unwrap());

        let stored = store.find_webhook_event("req-1").unwrap().unwrap();
        assert_eq!(stored.id, event.id);
        assert_eq!(stored.status, EventStatus::Pending);
    }

    #[test]
    fn test_event_claim_and_terminal_transition() {
        let store = store();
        let event = WebhookEvent::new("req-1".into(), "session-start".into(), "s1".into());
        store.insert_webhook_event(&event).unwrap();

        assert!(store.mark_processing("req-1").unwrap());
        // A second claim while processing fails.
        assert!(!store.mark_processing("req-1").unwrap());

        let conv_id = Uuid::new_v4();
        store
            .mark_terminal(
                "req-1",
                EventStatus::Success,
                12,
                Some(conv_id),
                None,
                None,
                None,
                None,
            )
            .unwrap();

        let stored = store.find_webhook_event("req-1").unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Success);
        assert_eq!(stored.conversation_id, Some(conv_id));
        assert_eq!(stored.processing_ms, Some(12));
        assert!(stored.processed_at.is_some());

        // Success is terminal; the row cannot be reclaimed.
        assert!(!store.mark_processing("req-1").unwrap());
    }

    #[test]
    fn test_failed_event_can_be_retried() {
        let store = store();
        let event = WebhookEvent::new("req-1".into(), "session-end".into(), "s1".into());
        store.insert_webhook_event(&event).unwrap();
        store.mark_processing("req-1").unwrap();
        store
            .mark_terminal(
                "req-1",
                EventStatus::Error,
                5,
                None,
                None,
                None,
                Some("boom"),
                Some("PROCESSING_FAILED"),
            )
            .unwrap();

        // Error rows may be claimed again by a retry of the same request.
        assert!(store.mark_processing("req-1").unwrap());
    }
}
