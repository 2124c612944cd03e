//! Native session events as emitted by the external agent.
//!
//! The agent speaks a `{id, timestamp, type, data}` JSON shape where `data`
//! depends on `type`. [`NativeEvent::from_json`] turns that into the tagged
//! [`NativeEventData`] enum; anything unrecognized or malformed is preserved as
//! [`NativeEventData::Unknown`] rather than rejected.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::sessions::{Attachment, ToolRequest};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartData {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    #[serde(default)]
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoData {
    #[serde(default)]
    pub info_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelChangeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_model: Option<String>,
    pub new_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageData {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnData {
    pub turn_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentData {
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningData {
    pub reasoning_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningDeltaData {
    pub reasoning_id: String,
    pub delta_content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessageData {
    pub message_id: String,
    pub content: String,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeltaData {
    pub message_id: String,
    pub delta_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_response_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartData {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolPartialResultData {
    pub tool_call_id: String,
    pub partial_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultContent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolErrorContent {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompleteData {
    pub tool_call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbortData {
    pub reason: String,
}

/// Typed payload of a native event, one variant per event type.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEventData {
    SessionStart(SessionStartData),
    SessionIdle,
    SessionError(SessionErrorData),
    SessionInfo(SessionInfoData),
    SessionModelChange(SessionModelChangeData),
    UserMessage(UserMessageData),
    AssistantTurnStart(TurnData),
    AssistantTurnEnd(TurnData),
    AssistantIntent(IntentData),
    AssistantReasoning(ReasoningData),
    AssistantReasoningDelta(ReasoningDeltaData),
    AssistantMessage(AssistantMessageData),
    AssistantMessageDelta(MessageDeltaData),
    AssistantUsage(UsageData),
    ToolExecutionStart(ToolStartData),
    ToolExecutionPartialResult(ToolPartialResultData),
    ToolExecutionComplete(ToolCompleteData),
    Abort(AbortData),
    /// Type not modelled here, or a payload that did not match its type.
    Unknown {
        event_type: String,
        data: serde_json::Value,
    },
}

impl NativeEventData {
    /// Dotted taxonomy name, e.g. `assistant.message_delta`.
    pub fn event_type(&self) -> &str {
        match self {
            Self::SessionStart(_) => "session.start",
            Self::SessionIdle => "session.idle",
            Self::SessionError(_) => "session.error",
            Self::SessionInfo(_) => "session.info",
            Self::SessionModelChange(_) => "session.model_change",
            Self::UserMessage(_) => "user.message",
            Self::AssistantTurnStart(_) => "assistant.turn_start",
            Self::AssistantTurnEnd(_) => "assistant.turn_end",
            Self::AssistantIntent(_) => "assistant.intent",
            Self::AssistantReasoning(_) => "assistant.reasoning",
            Self::AssistantReasoningDelta(_) => "assistant.reasoning_delta",
            Self::AssistantMessage(_) => "assistant.message",
            Self::AssistantMessageDelta(_) => "assistant.message_delta",
            Self::AssistantUsage(_) => "assistant.usage",
            Self::ToolExecutionStart(_) => "tool.execution_start",
            Self::ToolExecutionPartialResult(_) => "tool.execution_partial_result",
            Self::ToolExecutionComplete(_) => "tool.execution_complete",
            Self::Abort(_) => "abort",
            Self::Unknown { event_type, .. } => event_type,
        }
    }
}

/// Raw shape as received from the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNativeEvent {
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub data: NativeEventData,
}

impl NativeEvent {
    pub fn new(data: NativeEventData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        self.data.event_type()
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawNativeEvent = serde_json::from_value(json.clone())?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_raw(raw: RawNativeEvent) -> Self {
        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));
        Self {
            id: raw.id,
            timestamp,
            data: parse_event_data(raw.event_type, raw.data),
        }
    }
}

fn typed<T: DeserializeOwned>(
    event_type: String,
    data: serde_json::Value,
    wrap: fn(T) -> NativeEventData,
) -> NativeEventData {
    match serde_json::from_value::<T>(data.clone()) {
        Ok(parsed) => wrap(parsed),
        Err(error) => {
            tracing::debug!(event_type = %event_type, %error, "Native event payload did not match its type");
            NativeEventData::Unknown { event_type, data }
        }
    }
}

fn parse_event_data(event_type: String, data: serde_json::Value) -> NativeEventData {
    let name = event_type.clone();
    match name.as_str() {
        "session.start" => typed(event_type, data, NativeEventData::SessionStart),
        "session.idle" => NativeEventData::SessionIdle,
        "session.error" => typed(event_type, data, NativeEventData::SessionError),
        "session.info" => typed(event_type, data, NativeEventData::SessionInfo),
        "session.model_change" => typed(event_type, data, NativeEventData::SessionModelChange),
        "user.message" => typed(event_type, data, NativeEventData::UserMessage),
        "assistant.turn_start" => typed(event_type, data, NativeEventData::AssistantTurnStart),
        "assistant.turn_end" => typed(event_type, data, NativeEventData::AssistantTurnEnd),
        "assistant.intent" => typed(event_type, data, NativeEventData::AssistantIntent),
        "assistant.reasoning" => typed(event_type, data, NativeEventData::AssistantReasoning),
        "assistant.reasoning_delta" => {
            typed(event_type, data, NativeEventData::AssistantReasoningDelta)
        }
        "assistant.message" => typed(event_type, data, NativeEventData::AssistantMessage),
        "assistant.message_delta" => {
            typed(event_type, data, NativeEventData::AssistantMessageDelta)
        }
        "assistant.usage" => typed(event_type, data, NativeEventData::AssistantUsage),
        "tool.execution_start" => typed(event_type, data, NativeEventData::ToolExecutionStart),
        "tool.execution_partial_result" => {
            typed(event_type, data, NativeEventData::ToolExecutionPartialResult)
        }
        "tool.execution_complete" => {
            typed(event_type, data, NativeEventData::ToolExecutionComplete)
        }
        "abort" => typed(event_type, data, NativeEventData::Abort),
        _ => NativeEventData::Unknown { event_type, data },
    }
}
