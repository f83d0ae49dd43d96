use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{ConversationSummary, HistoryMessage};
use crate::llm::models::Role;

/// Conversation summaries and their messages.
pub struct HistoryStore;

struct ConversationRow {
    id: String,
    title: String,
    updated_at: String,
}

impl ConversationRow {
    fn into_summary(self) -> StoreResult<ConversationSummary> {
        let last_updated = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", self.updated_at, e)))?
            .with_timezone(&Utc);
        Ok(ConversationSummary {
            id: parse_id(&self.id)?,
            title: self.title,
            last_updated,
        })
    }
}

struct MessageRow {
    id: i64,
    conversation_id: String,
    owner: String,
    content: String,
}

impl MessageRow {
    fn into_message(self) -> StoreResult<HistoryMessage> {
        Ok(HistoryMessage {
            id: self.id,
            conversation_id: parse_id(&self.conversation_id)?,
            role: Role::parse(&self.owner),
            content: self.content,
        })
    }
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("conversation id {:?}: {}", raw, e)))
}

// Fixed-width so that lexical order in SQL matches chronological order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl HistoryStore {
    // --- Conversations ---

    pub fn create_conversation(
        conn: &Connection,
        title: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<ConversationSummary> {
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO conversations (id, title, updated_at) VALUES (?, ?, ?)",
            params![id.to_string(), title, format_timestamp(timestamp)],
        )?;
        debug!(conversation = %id, "created conversation");

        Self::get_conversation(conn, id)?.ok_or(StoreError::ConversationNotFound(id))
    }

    pub fn get_conversation(conn: &Connection, id: Uuid) -> StoreResult<Option<ConversationSummary>> {
        let result = conn.query_row(
            "SELECT id, title, updated_at FROM conversations WHERE id = ?",
            params![id.to_string()],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        );

        match result {
            Ok(row) => Ok(Some(row.into_summary()?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently updated first.
    pub fn list_conversations(conn: &Connection) -> StoreResult<Vec<ConversationSummary>> {
        let mut stmt = conn.prepare(
            "SELECT id, title, updated_at FROM conversations ORDER BY updated_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                title: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?.into_summary()?);
        }
        Ok(conversations)
    }

    /// Returns false when no conversation has this id.
    pub fn rename_conversation(conn: &Connection, id: Uuid, new_title: &str) -> StoreResult<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET title = ? WHERE id = ?",
            params![new_title.trim(), id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Stores the latest title and bumps the conversation to the top of the list.
    pub fn touch_conversation(
        conn: &Connection,
        id: Uuid,
        title: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let changed = conn.execute(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?",
            params![title, format_timestamp(timestamp), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::ConversationNotFound(id));
        }
        Ok(())
    }

    /// Removes the conversation together with all of its messages.
    pub fn delete_conversation(conn: &Connection, id: Uuid) -> StoreResult<bool> {
        if Self::get_conversation(conn, id)?.is_none() {
            return Ok(false);
        }

        let id_str = id.to_string();
        conn.execute("BEGIN TRANSACTION", [])?;

        if let Err(e) = conn.execute("DELETE FROM messages WHERE conversation_id = ?", params![id_str]) {
            let _ = conn.execute("ROLLBACK", []);
            return Err(e.into());
        }

        if let Err(e) = conn.execute("DELETE FROM conversations WHERE id = ?", params![id_str]) {
            let _ = conn.execute("ROLLBACK", []);
            return Err(e.into());
        }

        conn.execute("COMMIT", [])?;
        debug!(conversation = %id, "deleted conversation");
        Ok(true)
    }

    // --- Messages ---

    pub fn append_message(
        conn: &Connection,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> StoreResult<HistoryMessage> {
        if Self::get_conversation(conn, conversation_id)?.is_none() {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }

        let id: i64 = conn.query_row("SELECT nextval('seq_messages_id')", [], |row| row.get(0))?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, owner, content) VALUES (?, ?, ?, ?)",
            params![id, conversation_id.to_string(), role.as_str(), content],
        )?;

        Ok(HistoryMessage {
            id,
            conversation_id,
            role,
            content: content.to_string(),
        })
    }

    /// Messages in the order they were written.
    pub fn list_messages(conn: &Connection, conversation_id: Uuid) -> StoreResult<Vec<HistoryMessage>> {
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, owner, content FROM messages WHERE conversation_id = ? ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                owner: row.get(2)?,
                content: row.get(3)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.into_message()?);
        }
        Ok(messages)
    }
}
