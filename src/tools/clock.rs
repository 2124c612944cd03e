use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use super::traits::{ToolHandler, ToolOutput};
use crate::sessions::{ToolDefinition, ToolParameter, ToolParameterType};

/// Reports the relay host's current UTC time.
pub struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Current date and time on the relay host, in UTC".into(),
            parameters: vec![ToolParameter {
                name: "precision".into(),
                param_type: ToolParameterType::String,
                description: "Fractional second precision".into(),
                required: false,
                enum_values: vec!["seconds".into(), "millis".into()],
            }],
        }
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ToolOutput> {
        let format = match arguments.get("precision").and_then(|v| v.as_str()) {
            None | Some("seconds") => SecondsFormat::Secs,
            Some("millis") => SecondsFormat::Millis,
            Some(other) => anyhow::bail!("unsupported precision: {other}"),
        };
        let now = Utc::now();
        Ok(ToolOutput {
            content: now.to_rfc3339_opts(format, true),
            structured: Some(serde_json::json!({ "unixSeconds": now.timestamp() })),
        })
    }
}
