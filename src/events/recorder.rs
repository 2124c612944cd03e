//! Turns the discrete part of a live session's event stream into history.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::{NativeEvent, NativeEventData};
use crate::sessions::{Message, MessageRole, SessionRegistry};

#[derive(Default)]
struct RecorderState {
    /// Tool name by call id, remembered from `tool.execution_start`.
    tool_names: HashMap<String, String>,
    /// Content of the latest `assistant.reasoning`, attached to the next
    /// assistant message.
    pending_reasoning: Option<String>,
}

pub struct HistoryRecorder {
    session_id: String,
    registry: Arc<SessionRegistry>,
    state: Mutex<RecorderState>,
}

impl HistoryRecorder {
    pub fn new(session_id: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            session_id: session_id.into(),
            registry,
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Record `event` if it produces a history entry. Returns whether a
    /// message was appended.
    pub async fn record(&self, event: &NativeEvent) -> Result<bool> {
        let Some(message) = self.to_message(event) else {
            return Ok(false);
        };
        let appended = self
            .registry
            .append_messages(&self.session_id, std::slice::from_ref(&message))
            .await?;
        Ok(appended.is_some())
    }

    fn to_message(&self, event: &NativeEvent) -> Option<Message> {
        let mut state = self.state.lock();
        let mut message = match &event.data {
            NativeEventData::UserMessage(data) => {
                let mut msg = Message::user(data.content.clone());
                msg.transformed_content = data.transformed_content.clone();
                msg.attachments = data.attachments.clone();
                msg
            }
            NativeEventData::AssistantReasoning(data) => {
                state.pending_reasoning = Some(data.content.clone());
                return None;
            }
            NativeEventData::AssistantMessage(data) => {
                let mut msg = Message::assistant(data.content.clone());
                msg.tool_requests = data.tool_requests.clone();
                msg.reasoning_content = state.pending_reasoning.take();
                msg
            }
            NativeEventData::ToolExecutionStart(data) => {
                state
                    .tool_names
                    .insert(data.tool_call_id.clone(), data.tool_name.clone());
                return None;
            }
            NativeEventData::ToolExecutionComplete(data) => {
                let mut msg = Message::new(MessageRole::Tool, "");
                msg.tool_call_id = Some(data.tool_call_id.clone());
                msg.tool_name = state.tool_names.remove(&data.tool_call_id);
                msg.tool_result = data.result.as_ref().map(|r| r.content.clone());
                msg.tool_error = data.error.as_ref().map(|e| e.message.clone());
                if let Some(result) = &msg.tool_result {
                    msg.content = result.clone();
                }
                msg
            }
            _ => return None,
        };
        message.timestamp = event.timestamp;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::{
        AssistantMessageData, ReasoningData, ToolCompleteData, ToolErrorContent,
        ToolResultContent, ToolStartData, UserMessageData,
    };
    use crate::agent::testing::RecordingHandle;
    use crate::persistence::SqliteSessionStore;
    use crate::sessions::SessionConfig;

    async fn registry_with_session() -> Arc<SessionRegistry> {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let registry = Arc::new(SessionRegistry::new(Arc::new(store)));
        registry
            .register("s1", Box::new(RecordingHandle::new("s1")), SessionConfig::default())
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn records_conversation_with_reasoning_and_tool_names() {
        let registry = registry_with_session().await;
        let recorder = HistoryRecorder::new("s1", registry.clone());

        let events = vec![
            NativeEventData::UserMessage(UserMessageData {
                content: "check OPS-1".into(),
                transformed_content: None,
                attachments: Vec::new(),
            }),
            NativeEventData::AssistantReasoning(ReasoningData {
                reasoning_id: "r1".into(),
                content: "look it up".into(),
            }),
            NativeEventData::ToolExecutionStart(ToolStartData {
                tool_call_id: "c1".into(),
                tool_name: "lookup".into(),
                arguments: None,
            }),
            NativeEventData::ToolExecutionComplete(ToolCompleteData {
                tool_call_id: "c1".into(),
                success: true,
                result: Some(ToolResultContent {
                    content: "open".into(),
                }),
                error: None,
            }),
            NativeEventData::AssistantMessage(AssistantMessageData {
                message_id: "m1".into(),
                content: "It is open.".into(),
                tool_requests: Vec::new(),
                parent_tool_call_id: None,
            }),
            NativeEventData::SessionIdle,
        ];
        let mut appended = 0;
        for data in events {
            if recorder.record(&NativeEvent::new(data)).await.unwrap() {
                appended += 1;
            }
        }
        assert_eq!(appended, 3);

        let messages = registry.store().get_messages("s1").await.unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Tool, MessageRole::Assistant]
        );
        assert_eq!(messages[1].tool_name.as_deref(), Some("lookup"));
        assert_eq!(messages[1].tool_result.as_deref(), Some("open"));
        assert_eq!(messages[2].reasoning_content.as_deref(), Some("look it up"));

        let meta = registry.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 3);
    }

    #[tokio::test]
    async fn failed_tool_is_recorded_with_error() {
        let registry = registry_with_session().await;
        let recorder = HistoryRecorder::new("s1", registry.clone());

        let complete = NativeEvent::new(NativeEventData::ToolExecutionComplete(ToolCompleteData {
            tool_call_id: "c9".into(),
            success: false,
            result: None,
            error: Some(ToolErrorContent {
                message: "denied".into(),
                code: None,
            }),
        }));
        assert!(recorder.record(&complete).await.unwrap());

        let messages = registry.store().get_messages("s1").await.unwrap();
        assert_eq!(messages[0].tool_error.as_deref(), Some("denied"));
        assert!(messages[0].tool_name.is_none());
        assert_eq!(messages[0].timestamp, complete.timestamp);
    }

    #[tokio::test]
    async fn events_for_removed_sessions_are_dropped() {
        let registry = registry_with_session().await;
        registry.remove("s1").await.unwrap();
        let recorder = HistoryRecorder::new("s1", registry);

        let event = NativeEvent::new(NativeEventData::UserMessage(UserMessageData {
            content: "late".into(),
            transformed_content: None,
            attachments: Vec::new(),
        }));
        assert!(!recorder.record(&event).await.unwrap());
    }
}
