//! Durable storage contract shared by the flat-file and SQLite backends.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::ClientConfig;
use crate::sessions::{Message, SessionMetadata};

/// A session as persisted: metadata plus its full message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(flatten)]
    pub metadata: SessionMetadata,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionRecord {
    pub fn new(metadata: SessionMetadata) -> Self {
        Self {
            metadata,
            messages: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.metadata.session_id
    }
}

/// What `save_session` does with the record's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageWrite {
    /// Leave the stored log exactly as it is; `record.messages` is ignored.
    Keep,
    /// Replace the stored log with `record.messages`.
    Replace,
    /// Append `record.messages` after the stored log.
    Append,
}

/// Persistent storage for client configuration, session metadata, and
/// per-session message logs.
///
/// Lookups of unknown sessions resolve to `None`, `false`, or an empty list.
/// Errors are reserved for genuine I/O or database faults.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the singleton client configuration.
    async fn save_client_config(&self, config: &ClientConfig) -> Result<()>;

    /// Read the client configuration, if one was ever saved.
    async fn load_client_config(&self) -> Result<Option<ClientConfig>>;

    /// Upsert a session's metadata and nested config.
    async fn save_session(&self, record: &SessionRecord, messages: MessageWrite) -> Result<()>;

    /// Load metadata and messages for one session.
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Load every session, newest `created_at` first.
    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Load metadata without the message log.
    async fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>>;

    /// Metadata for every session, newest `created_at` first.
    async fn load_all_metadata(&self) -> Result<Vec<SessionMetadata>>;

    /// Delete a session together with its messages. Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    async fn session_exists(&self, session_id: &str) -> Result<bool>;

    async fn list_session_ids(&self) -> Result<Vec<String>>;

    /// Append to the end of the session's log in the given order and raise
    /// `message_count` by the number appended. Fails if the session does not
    /// exist.
    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// The session's log in insertion order; empty for unknown sessions.
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// The name of this store implementation.
    fn name(&self) -> &str;
}

/// Reject session ids that cannot double as a single file name.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        anyhow::bail!("session id must not be empty");
    }
    if session_id == "." || session_id == ".." {
        anyhow::bail!("session id must not be a relative path component: {session_id}");
    }
    if session_id
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
    {
        anyhow::bail!("session id contains a path separator or control character: {session_id:?}");
    }
    Ok(())
}
