//! Per-session translation of native events into wire envelopes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::envelope::{
    EmptyPayload, EventEnvelope, EventPayload, Lane, MessageDeltaPayload, ReasoningDeltaPayload,
};
use super::recorder::HistoryRecorder;
use super::traits::EventBroadcaster;
use crate::agent::{NativeEvent, NativeEventData};

/// Running byte totals for in-flight streamed messages and reasoning blocks.
#[derive(Default)]
struct DeltaCounters {
    messages: HashMap<String, u64>,
    reasoning: HashMap<String, u64>,
}

impl DeltaCounters {
    /// Drop every in-flight total. A turn that ended without a final
    /// message or reasoning block leaves nothing behind.
    fn clear(&mut self) {
        self.messages.clear();
        self.reasoning.clear();
    }

    fn advance(table: &mut HashMap<String, u64>, id: &str, fragment: &str, reported: Option<u64>) -> u64 {
        let entry = table.entry(id.to_string()).or_insert(0);
        let running = *entry + fragment.len() as u64;
        *entry = running.max(reported.unwrap_or(0));
        *entry
    }
}

/// Dispatcher bound to one session's subscriber group.
///
/// Calls to [`dispatch_event`](Self::dispatch_event) are serialized, so each
/// lane sees events in the order they were dispatched.
pub struct SessionEventDispatcher {
    session_id: String,
    broadcaster: Arc<dyn EventBroadcaster>,
    counters: Mutex<DeltaCounters>,
}

/// Bind a dispatcher to `session_id`'s group for its lifetime.
pub fn create_handler(
    session_id: impl Into<String>,
    broadcaster: Arc<dyn EventBroadcaster>,
) -> Arc<SessionEventDispatcher> {
    Arc::new(SessionEventDispatcher {
        session_id: session_id.into(),
        broadcaster,
        counters: Mutex::new(DeltaCounters::default()),
    })
}

impl SessionEventDispatcher {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Classify, translate and push one event. Returns the number of
    /// subscribers that accepted it; delivery failures are never surfaced.
    pub fn dispatch_event(&self, event: &NativeEvent) -> usize {
        let mut counters = self.counters.lock();
        let lane = Lane::for_type(event.event_type());
        let data = to_payload(&mut counters, &event.data);
        let envelope = Arc::new(EventEnvelope {
            id: event.id.clone(),
            event_type: event.event_type().to_string(),
            timestamp: event.timestamp,
            data,
        });

        // The counter lock is held across the send so concurrent callers
        // cannot interleave on a lane.
        let delivered = self
            .broadcaster
            .send_to_group(&self.session_id, lane, envelope);
        tracing::trace!(
            session_id = %self.session_id,
            event_type = event.event_type(),
            lane = lane.as_str(),
            delivered,
            "Dispatched event"
        );
        delivered
    }
}

fn to_payload(counters: &mut DeltaCounters, data: &NativeEventData) -> EventPayload {
    match data {
        NativeEventData::SessionStart(d) => EventPayload::SessionStart(d.clone()),
        NativeEventData::SessionIdle => {
            counters.clear();
            EventPayload::Empty(EmptyPayload::default())
        }
        NativeEventData::SessionError(d) => {
            counters.clear();
            EventPayload::SessionError(d.clone())
        }
        NativeEventData::SessionInfo(d) => EventPayload::SessionInfo(d.clone()),
        NativeEventData::SessionModelChange(d) => EventPayload::ModelChange(d.clone()),
        NativeEventData::UserMessage(d) => EventPayload::UserMessage(d.clone()),
        NativeEventData::AssistantTurnStart(d) | NativeEventData::AssistantTurnEnd(d) => {
            EventPayload::Turn(d.clone())
        }
        NativeEventData::AssistantIntent(d) => EventPayload::Intent(d.clone()),
        NativeEventData::AssistantReasoning(d) => {
            counters.reasoning.remove(&d.reasoning_id);
            EventPayload::Reasoning(d.clone())
        }
        NativeEventData::AssistantReasoningDelta(d) => {
            let total = DeltaCounters::advance(
                &mut counters.reasoning,
                &d.reasoning_id,
                &d.delta_content,
                None,
            );
            EventPayload::ReasoningDelta(ReasoningDeltaPayload {
                reasoning_id: d.reasoning_id.clone(),
                delta_content: d.delta_content.clone(),
                total_response_size_bytes: total,
            })
        }
        NativeEventData::AssistantMessage(d) => {
            counters.messages.remove(&d.message_id);
            EventPayload::AssistantMessage(d.clone())
        }
        NativeEventData::AssistantMessageDelta(d) => {
            let total = DeltaCounters::advance(
                &mut counters.messages,
                &d.message_id,
                &d.delta_content,
                d.total_response_size_bytes,
            );
            EventPayload::MessageDelta(MessageDeltaPayload {
                message_id: d.message_id.clone(),
                delta_content: d.delta_content.clone(),
                total_response_size_bytes: total,
                parent_tool_call_id: d.parent_tool_call_id.clone(),
            })
        }
        NativeEventData::AssistantUsage(d) => EventPayload::Usage(d.clone()),
        NativeEventData::ToolExecutionStart(d) => EventPayload::ToolStart(d.clone()),
        NativeEventData::ToolExecutionPartialResult(d) => {
            EventPayload::ToolPartialResult(d.clone())
        }
        NativeEventData::ToolExecutionComplete(d) => EventPayload::ToolComplete(d.clone()),
        NativeEventData::Abort(d) => {
            counters.clear();
            EventPayload::Abort(d.clone())
        }
        NativeEventData::Unknown { data, .. } => EventPayload::Raw(data.clone()),
    }
}

/// Drain a live session's native event channel into the dispatcher, in
/// order, optionally recording history. Stops when the channel closes or
/// `cancel` fires.
pub fn spawn_forwarder(
    dispatcher: Arc<SessionEventDispatcher>,
    recorder: Option<Arc<HistoryRecorder>>,
    mut native_rx: mpsc::Receiver<NativeEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = dispatcher.session_id().to_string();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(session_id = %session_id, "Event forwarder cancelled");
                    break;
                }
                event = native_rx.recv() => event,
            };
            let Some(event) = event else {
                tracing::debug!(session_id = %session_id, "Native event stream closed");
                break;
            };

            dispatcher.dispatch_event(&event);
            if let Some(recorder) = &recorder {
                if let Err(e) = recorder.record(&event).await {
                    tracing::warn!(
                        session_id = %session_id,
                        event_type = event.event_type(),
                        error = %e,
                        "Failed to record event into history"
                    );
                }
            }
        }
    })
}
