use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::traits::{ToolError, ToolHandler, ToolOutput};
use crate::sessions::ToolDefinition;

/// Concurrent name → handler map.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its name, returning the handler it replaced.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) -> Option<Arc<dyn ToolHandler>> {
        let name = handler.name().to_string();
        let previous = self.handlers.write().insert(name.clone(), handler);
        if previous.is_some() {
            tracing::warn!(tool = %name, "Replacing registered tool handler");
        }
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .read()
            .values()
            .map(|h| h.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke the named tool, giving up as soon as `cancel` fires.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let handler = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()));
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(tool = name, "Tool invocation cancelled");
                Err(ToolError::Cancelled(name.to_string()))
            }
            result = handler.invoke(arguments, cancel.clone()) => {
                result.map_err(|source| ToolError::Failed {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}
