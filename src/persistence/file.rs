//! Flat-file backend: one JSON document per session.
//!
//! Layout under the data directory:
//!
//! ```text
//! client-config.json
//! sessions/<session_id>.json
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::traits::{validate_session_id, MessageWrite, SessionRecord, SessionStore};
use crate::agent::ClientConfig;
use crate::sessions::{Message, SessionMetadata};
use crate::util::{write_atomic, KeyedLocks};

pub const CLIENT_CONFIG_FILE: &str = "client-config.json";
pub const SESSIONS_DIR: &str = "sessions";

pub struct FileSessionStore {
    data_dir: PathBuf,
    locks: KeyedLocks,
}

impl FileSessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn client_config_path(&self) -> PathBuf {
        self.data_dir.join(CLIENT_CONFIG_FILE)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_DIR)
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.sessions_dir().join(format!("{session_id}.json")))
    }

    /// Path for lookups. An id that cannot name a file cannot have been
    /// stored, so it resolves to `None` like any other unknown id.
    fn lookup_path(&self, session_id: &str) -> Option<PathBuf> {
        self.session_path(session_id).ok()
    }

    async fn read_record(&self, path: &Path) -> Result<Option<SessionRecord>> {
        let Some(bytes) = read_optional(path).await? else {
            return Ok(None);
        };
        let record = parse_session_document(&bytes)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(Some(record))
    }

    async fn write_record(&self, path: &Path, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize session")?;
        write_atomic(path, &json).await
    }

    /// Paths of all `*.json` session documents, sorted by file name.
    async fn session_files(&self) -> Result<Vec<PathBuf>> {
        list_session_files(&self.sessions_dir()).await
    }
}

/// Decode a session document as written by [`FileSessionStore`].
pub fn parse_session_document(bytes: &[u8]) -> Result<SessionRecord> {
    let record: SessionRecord = serde_json::from_slice(bytes)?;
    validate_session_id(record.session_id())?;
    Ok(record)
}

/// `*.json` files directly inside `dir`, sorted by file name. A missing
/// directory yields an empty list.
pub(crate) async fn list_session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read directory: {}", dir.display()))
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if is_json && !hidden && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save_client_config(&self, config: &ClientConfig) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(config).context("Failed to serialize client config")?;
        let _guard = self.locks.lock(CLIENT_CONFIG_FILE).await;
        write_atomic(&self.client_config_path(), &json).await
    }

    async fn load_client_config(&self) -> Result<Option<ClientConfig>> {
        let path = self.client_config_path();
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse client config: {}", path.display()))?;
        Ok(Some(config))
    }

    async fn save_session(&self, record: &SessionRecord, messages: MessageWrite) -> Result<()> {
        let path = self.session_path(record.session_id())?;
        let _guard = self.locks.lock(record.session_id()).await;

        let stored = match messages {
            MessageWrite::Replace => Vec::new(),
            MessageWrite::Keep | MessageWrite::Append => self
                .read_record(&path)
                .await?
                .map(|existing| existing.messages)
                .unwrap_or_default(),
        };
        let merged = match messages {
            MessageWrite::Keep => stored,
            MessageWrite::Replace => record.messages.clone(),
            MessageWrite::Append => {
                let mut all = stored;
                all.extend(record.messages.iter().cloned());
                all
            }
        };

        let document = SessionRecord {
            metadata: record.metadata.clone(),
            messages: merged,
        };
        self.write_record(&path, &document).await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(path) = self.lookup_path(session_id) else {
            return Ok(None);
        };
        self.read_record(&path).await
    }

    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::new();
        for path in self.session_files().await? {
            match self.read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        records.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
        Ok(records)
    }

    async fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        let Some(path) = self.lookup_path(session_id) else {
            return Ok(None);
        };
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        // Unknown fields are ignored, so the message array is skipped.
        let metadata = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(Some(metadata))
    }

    async fn load_all_metadata(&self) -> Result<Vec<SessionMetadata>> {
        let mut all = Vec::new();
        for path in self.session_files().await? {
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_slice::<SessionMetadata>(&bytes) {
                Ok(metadata) => all.push(metadata),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let Some(path) = self.lookup_path(session_id) else {
            return Ok(false);
        };
        let _guard = self.locks.lock(session_id).await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let Some(path) = self.lookup_path(session_id) else {
            return Ok(false);
        };
        fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    async fn list_session_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .session_files()
            .await?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let path = self.session_path(session_id)?;
        let _guard = self.locks.lock(session_id).await;

        let mut record = self
            .read_record(&path)
            .await?
            .with_context(|| format!("Cannot append messages to unknown session {session_id}"))?;
        record.messages.extend(messages.iter().cloned());
        record.metadata.message_count += messages.len() as u64;
        self.write_record(&path, &record).await
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .load_session(session_id)
            .await?
            .map(|record| record.messages)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::contract;
    use crate::sessions::SessionConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_passes_contract_suite() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        contract::run_all(&store).await;
    }

    #[tokio::test]
    async fn writes_one_camel_case_document_per_session() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let mut record = SessionRecord::new(SessionMetadata::new(
            "abc",
            SessionConfig::with_model("gpt-4"),
        ));
        record.messages.push(Message::user("hello"));
        store.save_session(&record, MessageWrite::Replace).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("sessions").join("abc.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["config"]["model"], "gpt-4");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert!(json.get("lastActivityAt").is_some());
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped_in_listings() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        store
            .save_session(
                &SessionRecord::new(SessionMetadata::new("good", SessionConfig::default())),
                MessageWrite::Replace,
            )
            .await
            .unwrap();
        std::fs::write(tmp.path().join("sessions").join("bad.json"), "{not json").unwrap();

        let all = store.load_all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(store.load_all_metadata().await.unwrap().len(), 1);
        assert!(store.load_session("bad").await.is_err());
    }

    #[tokio::test]
    async fn unsafe_ids_are_rejected_on_write() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let record = SessionRecord::new(SessionMetadata::new("../escape", SessionConfig::default()));
        assert!(store.save_session(&record, MessageWrite::Keep).await.is_err());
        assert!(store.append_messages("a/b", &[Message::user("x")]).await.is_err());
        assert!(!tmp.path().join("escape.json").exists());
    }
}
