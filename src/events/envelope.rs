//! Wire shapes pushed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::events::{
    AbortData, AssistantMessageData, IntentData, ReasoningData, SessionErrorData,
    SessionInfoData, SessionModelChangeData, SessionStartData, ToolCompleteData,
    ToolPartialResultData, ToolStartData, TurnData, UsageData, UserMessageData,
};

/// Delivery channel for an envelope. Discrete events and streaming deltas
/// never share a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    #[serde(rename = "events")]
    SessionEvent,
    #[serde(rename = "deltas")]
    StreamingDelta,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::SessionEvent, Lane::StreamingDelta];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionEvent => "events",
            Self::StreamingDelta => "deltas",
        }
    }

    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw.trim() {
            "events" | "SessionEvent" => Some(Self::SessionEvent),
            "deltas" | "StreamingDelta" => Some(Self::StreamingDelta),
            _ => None,
        }
    }

    /// Lane for an event type name. Only message and reasoning deltas are
    /// streaming; everything else, unknown types included, is discrete.
    /// Classification goes by name so a delta whose payload failed to parse
    /// still stays off the discrete lane.
    pub fn for_type(event_type: &str) -> Self {
        match event_type {
            "assistant.message_delta" | "assistant.reasoning_delta" => Self::StreamingDelta,
            _ => Self::SessionEvent,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeltaPayload {
    pub message_id: String,
    pub delta_content: String,
    pub total_response_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningDeltaPayload {
    pub reasoning_id: String,
    pub delta_content: String,
    pub total_response_size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EmptyPayload {}

/// Serialized `data` of an envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    SessionStart(SessionStartData),
    Empty(EmptyPayload),
    SessionError(SessionErrorData),
    SessionInfo(SessionInfoData),
    ModelChange(SessionModelChangeData),
    UserMessage(UserMessageData),
    Turn(TurnData),
    Intent(IntentData),
    Reasoning(ReasoningData),
    ReasoningDelta(ReasoningDeltaPayload),
    AssistantMessage(AssistantMessageData),
    MessageDelta(MessageDeltaPayload),
    Usage(UsageData),
    ToolStart(ToolStartData),
    ToolPartialResult(ToolPartialResultData),
    ToolComplete(ToolCompleteData),
    Abort(AbortData),
    Raw(serde_json::Value),
}

/// `{id, type, timestamp, data}` as seen by web clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventPayload,
}

impl EventEnvelope {
    pub fn lane(&self) -> Lane {
        Lane::for_type(&self.event_type)
    }
}

/// One WebSocket frame: which lane the envelope arrived on plus the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct LaneFrame<'a> {
    pub lane: Lane,
    pub event: &'a EventEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::MessageDeltaData;
    use crate::agent::NativeEventData;
    use serde_json::json;

    #[test]
    fn lanes_split_deltas_from_discrete_events() {
        let delta = NativeEventData::AssistantMessageDelta(MessageDeltaData {
            message_id: "m".into(),
            delta_content: "x".into(),
            total_response_size_bytes: None,
            parent_tool_call_id: None,
        });
        assert_eq!(Lane::for_type(delta.event_type()), Lane::StreamingDelta);
        assert_eq!(Lane::for_type("assistant.reasoning_delta"), Lane::StreamingDelta);
        assert_eq!(Lane::for_type(NativeEventData::SessionIdle.event_type()), Lane::SessionEvent);
        assert_eq!(Lane::for_type("x.y"), Lane::SessionEvent);
    }

    #[test]
    fn envelope_lane_follows_the_type_name() {
        let envelope = EventEnvelope {
            id: "evt-1".into(),
            event_type: "assistant.message_delta".into(),
            timestamp: Utc::now(),
            data: EventPayload::Raw(json!({"deltaContent": "Hel"})),
        };
        assert_eq!(envelope.lane(), Lane::StreamingDelta);
    }

    #[test]
    fn lane_names_parse_both_spellings() {
        assert_eq!(Lane::from_str_opt("deltas"), Some(Lane::StreamingDelta));
        assert_eq!(Lane::from_str_opt("SessionEvent"), Some(Lane::SessionEvent));
        assert_eq!(Lane::from_str_opt("audio"), None);
    }

    #[test]
    fn frame_serializes_lane_and_envelope() {
        let envelope = EventEnvelope {
            id: "evt-1".into(),
            event_type: "assistant.message_delta".into(),
            timestamp: Utc::now(),
            data: EventPayload::MessageDelta(MessageDeltaPayload {
                message_id: "m-1".into(),
                delta_content: "Hi".into(),
                total_response_size_bytes: 2,
                parent_tool_call_id: None,
            }),
        };
        let json = serde_json::to_value(LaneFrame {
            lane: envelope.lane(),
            event: &envelope,
        })
        .unwrap();

        assert_eq!(json["lane"], "deltas");
        assert_eq!(json["event"]["type"], "assistant.message_delta");
        assert_eq!(json["event"]["data"]["totalResponseSizeBytes"], 2);
        assert!(json["event"]["data"].get("parentToolCallId").is_none());
    }

    #[test]
    fn idle_payload_is_an_empty_object() {
        let json = serde_json::to_value(EventPayload::Empty(EmptyPayload::default())).unwrap();
        assert_eq!(json, json!({}));
    }
}
