//! Live-session registry.
//!
//! Maps session ids to the handles the agent client gave us and mirrors every
//! metadata change into the configured [`SessionStore`]. The registry is the
//! only place that mutates the active map.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{SessionError, SessionResult};
use super::types::{Attachment, Message, SessionConfig, SessionMetadata};
use crate::agent::SessionHandle;
use crate::persistence::{MessageWrite, SessionRecord, SessionStore};
use crate::util::KeyedLocks;

pub struct SessionRegistry {
    active: RwLock<HashMap<String, Arc<dyn SessionHandle>>>,
    store: Arc<dyn SessionStore>,
    locks: KeyedLocks,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Make `handle` the live handle for `session_id` and persist fresh metadata.
    ///
    /// An existing handle for the same id is replaced and closed. The stored
    /// message log is left as it is; `message_count` restarts at zero. Two
    /// concurrent registers of one id race and the later insert wins.
    pub async fn register(
        &self,
        session_id: &str,
        handle: Box<dyn SessionHandle>,
        config: SessionConfig,
    ) -> SessionResult<SessionMetadata> {
        let metadata = SessionMetadata::new(session_id, config);
        {
            let _guard = self.locks.lock(session_id).await;
            self.store
                .save_session(&SessionRecord::new(metadata.clone()), MessageWrite::Keep)
                .await?;
        }

        // Only a persisted session becomes live.
        let replaced = self
            .active
            .write()
            .insert(session_id.to_string(), Arc::from(handle));

        if let Some(old) = replaced {
            tracing::warn!(session_id, "Replacing existing live handle for session");
            if let Err(e) = old.close().await {
                tracing::warn!(session_id, error = %e, "Failed to close replaced handle");
            }
        }

        tracing::info!(session_id, model = %metadata.config.model, "Registered session");
        Ok(metadata)
    }

    /// The live handle for `session_id`.
    ///
    /// The returned reference is meant for one call; holding on to it does not
    /// keep the session registered.
    pub fn get_handle(&self, session_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.active.read().get(session_id).cloned()
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.active.read().contains_key(session_id)
    }

    pub async fn exists_durable(&self, session_id: &str) -> SessionResult<bool> {
        Ok(self.store.session_exists(session_id).await?)
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub async fn get_metadata(&self, session_id: &str) -> SessionResult<Option<SessionMetadata>> {
        Ok(self.store.load_metadata(session_id).await?)
    }

    /// Metadata of every durable session, newest first.
    pub async fn get_all_metadata(&self) -> SessionResult<Vec<SessionMetadata>> {
        Ok(self.store.load_all_metadata().await?)
    }

    /// Take the live handle out of the active map without touching storage.
    /// The caller owns closing it.
    pub fn release(&self, session_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.active.write().remove(session_id)
    }

    /// Drop the live handle and delete the durable record with its messages.
    ///
    /// Returns whether a durable record existed.
    pub async fn remove(&self, session_id: &str) -> SessionResult<bool> {
        let handle = self.active.write().remove(session_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                tracing::warn!(session_id, error = %e, "Failed to close session handle");
            }
        }

        let _guard = self.locks.lock(session_id).await;
        let existed = self.store.delete_session(session_id).await?;
        tracing::info!(session_id, existed, "Removed session");
        Ok(existed)
    }

    pub async fn touch_activity(&self, session_id: &str) -> SessionResult<Option<SessionMetadata>> {
        self.update_metadata(session_id, |_| {}).await
    }

    pub async fn increment_message_count(
        &self,
        session_id: &str,
    ) -> SessionResult<Option<SessionMetadata>> {
        self.update_metadata(session_id, |meta| meta.message_count += 1)
            .await
    }

    pub async fn set_summary(
        &self,
        session_id: &str,
        summary: impl Into<String>,
    ) -> SessionResult<Option<SessionMetadata>> {
        let summary = summary.into();
        self.update_metadata(session_id, move |meta| meta.summary = Some(summary))
            .await
    }

    /// Append to the session's log and bump its activity, under the per-id
    /// lock. Returns `None` without writing when no durable record exists.
    pub async fn append_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> SessionResult<Option<SessionMetadata>> {
        let _guard = self.locks.lock(session_id).await;

        if !self.store.session_exists(session_id).await? {
            tracing::debug!(session_id, "Dropping messages for unknown session");
            return Ok(None);
        }
        self.store.append_messages(session_id, messages).await?;

        let Some(mut metadata) = self.store.load_metadata(session_id).await? else {
            return Ok(None);
        };
        metadata.last_activity_at = Utc::now();
        self.store
            .save_session(&SessionRecord::new(metadata.clone()), MessageWrite::Keep)
            .await?;
        Ok(Some(metadata))
    }

    /// Read-modify-write of one session's metadata under its per-id lock.
    /// Every update also bumps `last_activity_at`.
    async fn update_metadata<F>(
        &self,
        session_id: &str,
        apply: F,
    ) -> SessionResult<Option<SessionMetadata>>
    where
        F: FnOnce(&mut SessionMetadata) + Send,
    {
        let _guard = self.locks.lock(session_id).await;

        let Some(mut metadata) = self.store.load_metadata(session_id).await? else {
            tracing::debug!(session_id, "Metadata update for unknown session ignored");
            return Ok(None);
        };
        apply(&mut metadata);
        metadata.last_activity_at = Utc::now();

        self.store
            .save_session(&SessionRecord::new(metadata.clone()), MessageWrite::Keep)
            .await?;
        Ok(Some(metadata))
    }

    /// Send a prompt through the live handle. Returns the agent's message id.
    pub async fn send_prompt(
        &self,
        session_id: &str,
        prompt: &str,
        attachments: &[Attachment],
    ) -> SessionResult<String> {
        let handle = self
            .get_handle(session_id)
            .ok_or_else(|| SessionError::NotConnected(session_id.to_string()))?;
        let message_id = handle
            .send(prompt, attachments)
            .await
            .map_err(SessionError::Agent)?;
        tracing::debug!(session_id, message_id = %message_id, "Prompt sent");
        Ok(message_id)
    }

    pub async fn abort(&self, session_id: &str) -> SessionResult<()> {
        let handle = self
            .get_handle(session_id)
            .ok_or_else(|| SessionError::NotConnected(session_id.to_string()))?;
        handle.abort().await.map_err(SessionError::Agent)
    }

    /// Drain the active map and close every handle. Durable records stay.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<dyn SessionHandle>)> =
            self.active.write().drain().collect();
        let count = drained.len();
        for (session_id, handle) in drained {
            if let Err(e) = handle.close().await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to close session handle");
            }
        }
        tracing::info!(closed = count, "Session registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::RecordingHandle;
    use crate::persistence::{FileSessionStore, SqliteSessionStore};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn file_registry(tmp: &TempDir) -> SessionRegistry {
        SessionRegistry::new(Arc::new(FileSessionStore::new(tmp.path())))
    }

    #[tokio::test]
    async fn register_persists_metadata_and_exposes_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let meta = registry
            .register(
                "s1",
                Box::new(RecordingHandle::new("s1")),
                SessionConfig::with_model("gpt-4"),
            )
            .await
            .unwrap();

        assert_eq!(meta.message_count, 0);
        assert!(registry.exists("s1"));
        assert!(registry.exists_durable("s1").await.unwrap());
        assert_eq!(registry.get_handle("s1").unwrap().session_id(), "s1");
        assert!(registry.get_handle("missing").is_none());

        let stored = registry.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(stored.config.model, "gpt-4");
    }

    #[tokio::test]
    async fn failed_register_leaves_nothing_live() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let err = registry
            .register("a/b", Box::new(RecordingHandle::new("a/b")), SessionConfig::default())
            .await;
        assert!(matches!(err, Err(SessionError::Storage(_))));
        assert!(!registry.exists("a/b"));
        assert!(registry.get_handle("a/b").is_none());
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.exists_durable("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn increments_then_append_never_lower_the_count() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let meta = registry.increment_message_count("s1").await.unwrap().unwrap();
            seen.push(meta.message_count);
        }
        let meta = registry
            .append_messages("s1", &[Message::user("x")])
            .await
            .unwrap()
            .unwrap();
        seen.push(meta.message_count);

        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn re_register_resets_count_but_keeps_log() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        let config = SessionConfig::with_model("gpt-4");

        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), config.clone())
            .await
            .unwrap();
        registry
            .store()
            .append_messages("s1", &[Message::user("hi"), Message::assistant("hello")])
            .await
            .unwrap();

        let first = RecordingHandle::new("s1");
        let first_closed = first.closed.clone();
        registry.register("s1", Box::new(first), config.clone()).await.unwrap();
        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), config)
            .await
            .unwrap();
        assert!(first_closed.load(Ordering::SeqCst));

        let meta = registry.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 0);
        assert_eq!(registry.store().get_messages("s1").await.unwrap().len(), 2);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn append_messages_updates_count_and_activity() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        let created = registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();

        let meta = registry
            .append_messages("s1", &[Message::user("q"), Message::assistant("a")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.message_count, 2);
        assert!(meta.last_activity_at >= created.last_activity_at);

        assert!(registry
            .append_messages("ghost", &[Message::user("q")])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rmw_helpers_return_none_for_unknown_sessions() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        assert!(registry.touch_activity("nope").await.unwrap().is_none());
        assert!(registry.increment_message_count("nope").await.unwrap().is_none());
        assert!(registry.set_summary("nope", "text").await.unwrap().is_none());
        assert!(!registry.exists_durable("nope").await.unwrap());
    }

    #[tokio::test]
    async fn set_summary_and_touch_update_metadata() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        let created = registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();

        let updated = registry.set_summary("s1", "Refactor plan").await.unwrap().unwrap();
        assert_eq!(updated.summary.as_deref(), Some("Refactor plan"));
        assert!(updated.last_activity_at >= created.last_activity_at);
        assert_eq!(updated.created_at, created.created_at);

        let touched = registry.touch_activity("s1").await.unwrap().unwrap();
        assert_eq!(touched.summary.as_deref(), Some("Refactor plan"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_increments_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteSessionStore::open(&tmp.path().join("sessions.db")).unwrap();
        let registry = Arc::new(SessionRegistry::new(Arc::new(store)));
        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.increment_message_count("s1").await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let meta = registry.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_on_file_store_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(file_registry(&tmp));
        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.increment_message_count("s1").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let meta = registry.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 100);
    }

    #[tokio::test]
    async fn send_and_abort_require_live_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);

        let err = registry.send_prompt("s1", "hi", &[]).await.unwrap_err();
        assert!(err.is_not_connected());
        assert!(registry.abort("s1").await.unwrap_err().is_not_connected());

        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();
        let message_id = registry.send_prompt("s1", "hi", &[]).await.unwrap();
        assert_eq!(message_id, "msg-1");
        tokio_test::assert_ok!(registry.abort("s1").await);
    }

    #[tokio::test]
    async fn remove_closes_handle_and_deletes_record() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        let handle = RecordingHandle::new("s1");
        let closed = handle.closed.clone();
        registry
            .register("s1", Box::new(handle), SessionConfig::default())
            .await
            .unwrap();

        assert!(registry.remove("s1").await.unwrap());
        assert!(closed.load(Ordering::SeqCst));
        assert!(!registry.exists("s1"));
        assert!(!registry.exists_durable("s1").await.unwrap());
        assert!(!registry.remove("s1").await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_closes_all_handles_but_keeps_records() {
        let tmp = TempDir::new().unwrap();
        let registry = file_registry(&tmp);
        let mut flags = Vec::new();
        for id in ["a", "b"] {
            let handle = RecordingHandle::new(id);
            flags.push(handle.closed.clone());
            registry
                .register(id, Box::new(handle), SessionConfig::default())
                .await
                .unwrap();
        }
        assert_eq!(registry.active_session_ids(), vec!["a", "b"]);

        registry.shutdown().await;
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.get_all_metadata().await.unwrap().len(), 2);
    }
}
