//! Glue between the agent client and the relay.
//!
//! When the agent client opens a session it hands over the live handle and
//! the session's native event channel. [`SessionRelay::attach`] registers
//! the handle, binds a dispatcher to the session's group, and spawns a
//! forwarder that records history as events arrive.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{NativeEvent, SessionHandle};
use crate::events::{create_handler, spawn_forwarder, HistoryRecorder, SessionEventHub};
use crate::sessions::{SessionConfig, SessionMetadata, SessionRegistry, SessionResult};

struct Attached {
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
}

pub struct SessionRelay {
    registry: Arc<SessionRegistry>,
    hub: Arc<SessionEventHub>,
    shutdown: CancellationToken,
    attached: Mutex<HashMap<String, Attached>>,
}

impl SessionRelay {
    pub fn new(registry: Arc<SessionRegistry>, hub: Arc<SessionEventHub>) -> Self {
        Self {
            registry,
            hub,
            shutdown: CancellationToken::new(),
            attached: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<SessionEventHub> {
        &self.hub
    }

    /// Register `handle` and start forwarding `native_rx` to subscribers.
    ///
    /// Attaching an id that is already attached stops the previous forwarder
    /// first.
    pub async fn attach(
        &self,
        session_id: &str,
        handle: Box<dyn SessionHandle>,
        config: SessionConfig,
        native_rx: mpsc::Receiver<NativeEvent>,
    ) -> SessionResult<SessionMetadata> {
        self.stop_forwarder(session_id).await;

        let metadata = self.registry.register(session_id, handle, config).await?;

        let dispatcher = create_handler(session_id, self.hub.clone());
        let recorder = Arc::new(HistoryRecorder::new(session_id, self.registry.clone()));
        let cancel = self.shutdown.child_token();
        let forwarder = spawn_forwarder(dispatcher, Some(recorder), native_rx, cancel.clone());

        // A concurrent attach of the same id may have inserted since the stop
        // above.
        let superseded = self
            .attached
            .lock()
            .insert(session_id.to_string(), Attached { cancel, forwarder });
        if let Some(previous) = superseded {
            tracing::warn!(session_id, "Superseding a concurrently attached forwarder");
            stop(session_id, previous).await;
        }
        tracing::info!(session_id, "Session attached");
        Ok(metadata)
    }

    /// Stop forwarding, then delete the session with its history.
    ///
    /// Returns whether a durable record existed.
    pub async fn remove(&self, session_id: &str) -> SessionResult<bool> {
        self.stop_forwarder(session_id).await;
        self.registry.remove(session_id).await
    }

    /// Stop forwarding and drop the live handle. The durable record stays.
    pub async fn detach(&self, session_id: &str) -> bool {
        let stopped = self.stop_forwarder(session_id).await;
        let closed = match self.registry.release(session_id) {
            Some(handle) => {
                if let Err(e) = handle.close().await {
                    tracing::warn!(session_id, error = %e, "Failed to close session handle");
                }
                true
            }
            None => false,
        };
        if stopped || closed {
            tracing::info!(session_id, "Session detached");
        }
        stopped
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    /// Stop every forwarder and close every live handle.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<(String, Attached)> = self.attached.lock().drain().collect();
        for (session_id, attached) in drained {
            stop(&session_id, attached).await;
        }
        self.registry.shutdown().await;
    }

    async fn stop_forwarder(&self, session_id: &str) -> bool {
        let Some(attached) = self.attached.lock().remove(session_id) else {
            return false;
        };
        stop(session_id, attached).await;
        true
    }
}

async fn stop(session_id: &str, attached: Attached) {
    attached.cancel.cancel();
    if let Err(e) = attached.forwarder.await {
        tracing::warn!(session_id, error = %e, "Event forwarder panicked");
    }
}
