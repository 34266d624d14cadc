//! Conversation, message and attachment operations

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{now_timestamp, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::*;

impl Database {
    /// Create a conversation, with a caller-chosen id or a fresh one
    pub fn create_conversation(&self, id: Option<&str>) -> Result<Conversation> {
        let conn = self.conn()?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = now_timestamp();

        conn.execute(
            "INSERT INTO conversations (id, created_at) VALUES (?, ?)",
            params![id, created_at],
        )?;

        Ok(Conversation {
            id,
            created_at: parse_datetime(&created_at),
        })
    }

    /// Get a conversation by id
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn()?;
        let conversation = conn
            .query_row(
                "SELECT id, created_at FROM conversations WHERE id = ?",
                params![id],
                |row| {
                    let created_at: String = row.get(1)?;
                    Ok(Conversation {
                        id: row.get(0)?,
                        created_at: parse_datetime(&created_at),
                    })
                },
            )
            .optional()?;

        Ok(conversation)
    }

    /// Resume a conversation by id, creating it (with that id) if unknown
    ///
    /// Concurrent first messages for the same id all resolve to one row.
    pub fn get_or_create_conversation(&self, id: Option<&str>) -> Result<Conversation> {
        let Some(id) = id else {
            return self.create_conversation(None);
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?, ?)",
            params![id, now_timestamp()],
        )?;
        drop(conn);

        self.get_conversation(id)?
            .ok_or_else(|| Error::NotFound(format!("Conversation {}", id)))
    }

    /// Append a message to a conversation
    pub fn create_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
        intent: Option<MessageIntent>,
    ) -> Result<Message> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let created_at = now_timestamp();

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, text, intent, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                conversation_id,
                role.as_str(),
                text,
                intent.map(|i| i.as_str()),
                created_at,
            ],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            text: text.to_string(),
            intent,
            created_at: parse_datetime(&created_at),
        })
    }

    /// Messages of a conversation in creation order
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, text, intent, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let messages = stmt
            .query_map(params![conversation_id], |row| Self::row_to_message(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let role_str: String = row.get(2)?;
        let intent_str: Option<String> = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: role_str.parse().unwrap_or(MessageRole::User),
            text: row.get(3)?,
            intent: intent_str.and_then(|s| s.parse().ok()),
            created_at: parse_datetime(&created_at),
        })
    }

    /// Record an uploaded file
    pub fn create_attachment(&self, attachment: &NewAttachment) -> Result<Attachment> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let created_at = now_timestamp();

        conn.execute(
            "INSERT INTO attachments
             (id, message_id, filename, mime_type, storage_path, content_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                attachment.message_id,
                attachment.filename,
                attachment.mime_type,
                attachment.storage_path,
                attachment.content_hash,
                created_at,
            ],
        )?;

        Ok(Attachment {
            id,
            message_id: attachment.message_id.clone(),
            filename: attachment.filename.clone(),
            mime_type: attachment.mime_type.clone(),
            storage_path: attachment.storage_path.clone(),
            content_hash: attachment.content_hash.clone(),
            created_at: parse_datetime(&created_at),
        })
    }

    /// Get an attachment by id
    pub fn get_attachment(&self, id: &str) -> Result<Attachment> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, message_id, filename, mime_type, storage_path, content_hash, created_at
             FROM attachments WHERE id = ?",
            params![id],
            |row| {
                let created_at: String = row.get(6)?;
                Ok(Attachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    filename: row.get(2)?,
                    mime_type: row.get(3)?,
                    storage_path: row.get(4)?,
                    content_hash: row.get(5)?,
                    created_at: parse_datetime(&created_at),
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Attachment {}", id)))
    }
}
