use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::sessions::ToolDefinition;

/// Result of a successful tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool {0} was cancelled")]
    Cancelled(String),

    #[error("tool {name} failed: {source:#}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A client-side function the agent may call during a turn.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name the agent uses to call this tool. Unique within a registry.
    fn name(&self) -> &str;

    /// Definition advertised in `SessionConfig.tools`.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Long-running handlers should observe `cancel`; the
    /// registry also stops waiting as soon as it fires.
    async fn invoke(
        &self,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolOutput>;
}
