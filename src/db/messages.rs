//! Write path for messages: insert with an optional embedding, soft delete.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{embedding_to_bytes, format_timestamp};

/// A message to store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub token_count: i64,
    /// Defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Insert a message into `session_id`, creating the session if needed.
///
/// Returns the new message's UUID (v7). Fails if the session was soft-deleted
/// or the embedding is not a valid f32 vector.
pub fn insert_message(
    conn: &mut Connection,
    session_id: &str,
    message: &NewMessage,
    embedding: Option<&[f32]>,
) -> Result<String> {
    let tx = conn.transaction()?;

    ensure_session(&tx, session_id)?;

    let uuid = uuid::Uuid::now_v7().to_string();
    let created_at = format_timestamp(&message.created_at.unwrap_or_else(Utc::now));
    let metadata_json = message
        .metadata
        .as_ref()
        .filter(|m| !m.is_null())
        .map(serde_json::to_string)
        .transpose()?;

    tx.execute(
        "INSERT INTO messages (uuid, session_id, created_at, role, content, metadata, token_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid,
            session_id,
            created_at,
            message.role,
            message.content,
            metadata_json,
            message.token_count,
        ],
    )
    .context("failed to insert message")?;

    if let Some(embedding) = embedding {
        insert_embedding(&tx, &uuid, embedding)?;
    }

    tx.commit()?;
    Ok(uuid)
}

fn ensure_session(tx: &Transaction, session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        bail!("session id must not be empty");
    }
    tx.execute(
        "INSERT OR IGNORE INTO sessions (session_id, created_at) VALUES (?1, ?2)",
        params![session_id, format_timestamp(&Utc::now())],
    )?;
    let deleted_at: Option<String> = tx.query_row(
        "SELECT deleted_at FROM sessions WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    if let Some(deleted_at) = deleted_at {
        bail!("session {session_id} was deleted at {deleted_at}");
    }
    Ok(())
}

/// Validate through sqlite-vec so stored blobs are always well-formed vectors.
fn insert_embedding(tx: &Transaction, uuid: &str, embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        bail!("embedding must not be empty");
    }
    let bytes = embedding_to_bytes(embedding);
    let dimensions: i64 = tx
        .query_row("SELECT vec_length(vec_f32(?1))", [bytes], |row| row.get(0))
        .context("embedding rejected by sqlite-vec")?;
    if dimensions as usize != embedding.len() {
        bail!(
            "sqlite-vec read {dimensions} dimensions from a {}-dimensional embedding",
            embedding.len()
        );
    }
    tx.execute(
        "INSERT INTO message_embeddings (message_uuid, embedding, dimensions) VALUES (?1, ?2, ?3)",
        params![uuid, bytes, dimensions],
    )?;
    Ok(())
}

/// Soft-delete one message. Returns `false` if it was missing or already deleted.
pub fn soft_delete_message(conn: &Connection, uuid: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET deleted_at = ?1 WHERE uuid = ?2 AND deleted_at IS NULL",
        params![format_timestamp(&Utc::now()), uuid],
    )?;
    Ok(changed > 0)
}

/// Soft-delete a session and all of its messages. Returns the number of
/// messages newly deleted.
pub fn soft_delete_session(conn: &mut Connection, session_id: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = format_timestamp(&Utc::now());

    let exists = tx
        .query_row(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            [session_id],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        bail!("session {session_id} not found");
    }

    tx.execute(
        "UPDATE sessions SET deleted_at = ?1 WHERE session_id = ?2 AND deleted_at IS NULL",
        params![now, session_id],
    )?;
    let messages = tx.execute(
        "UPDATE messages SET deleted_at = ?1 WHERE session_id = ?2 AND deleted_at IS NULL",
        params![now, session_id],
    )?;

    tx.commit()?;
    tracing::info!(session_id, messages, "session soft-deleted");
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn message(content: &str) -> NewMessage {
        NewMessage {
            role: "user".into(),
            content: content.into(),
            metadata: Some(serde_json::json!({"tag": "x"})),
            token_count: 3,
            created_at: None,
        }
    }

    #[test]
    fn insert_with_embedding() {
        let mut conn = open_memory_database().unwrap();
        let uuid = insert_message(&mut conn, "s1", &message("hi"), Some(&[0.1, 0.2])).unwrap();

        let (dims, metadata): (i64, String) = conn
            .query_row(
                "SELECT me.dimensions, m.metadata FROM messages m \
                 JOIN message_embeddings me ON me.message_uuid = m.uuid WHERE m.uuid = ?1",
                [&uuid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(dims, 2);
        assert_eq!(metadata, r#"{"tag":"x"}"#);
    }

    #[test]
    fn insert_without_embedding() {
        let mut conn = open_memory_database().unwrap();
        insert_message(&mut conn, "s1", &message("hi"), None).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM message_embeddings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rejects_empty_embedding_and_session() {
        let mut conn = open_memory_database().unwrap();
        assert!(insert_message(&mut conn, "s1", &message("hi"), Some(&[])).is_err());
        assert!(insert_message(&mut conn, " ", &message("hi"), None).is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0, "failed inserts roll back");
    }

    #[test]
    fn soft_deletes() {
        let mut conn = open_memory_database().unwrap();
        let a = insert_message(&mut conn, "s1", &message("a"), None).unwrap();
        insert_message(&mut conn, "s1", &message("b"), None).unwrap();

        assert!(soft_delete_message(&conn, &a).unwrap());
        assert!(!soft_delete_message(&conn, &a).unwrap());
        assert_eq!(soft_delete_session(&mut conn, "s1").unwrap(), 1);
        assert!(insert_message(&mut conn, "s1", &message("c"), None).is_err());
        assert!(soft_delete_session(&mut conn, "missing").is_err());
    }
}
