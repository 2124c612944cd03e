//! In-process subscriber groups, one per session id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::envelope::{EventEnvelope, Lane};
use super::traits::EventBroadcaster;

type EnvelopeTx = mpsc::Sender<Arc<EventEnvelope>>;
type EnvelopeRx = mpsc::Receiver<Arc<EventEnvelope>>;

struct Subscriber {
    id: u64,
    events: Option<EnvelopeTx>,
    deltas: Option<EnvelopeTx>,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    fn sender(&self, lane: Lane) -> Option<&EnvelopeTx> {
        match lane {
            Lane::SessionEvent => self.events.as_ref(),
            Lane::StreamingDelta => self.deltas.as_ref(),
        }
    }

    fn is_closed(&self) -> bool {
        self.events.as_ref().is_some_and(|tx| tx.is_closed())
            || self.deltas.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes lazily: the
/// hub prunes the entry on its next delivery attempt.
pub struct Subscription {
    pub id: u64,
    pub session_id: String,
    pub events: Option<EnvelopeRx>,
    pub deltas: Option<EnvelopeRx>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Envelopes discarded because this subscriber's queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Next envelope from whichever subscribed lane has one ready. Order is
    /// kept within a lane, not across lanes. `None` once every lane closed.
    pub async fn recv(&mut self) -> Option<Arc<EventEnvelope>> {
        tokio::select! {
            Some(envelope) = recv_lane(&mut self.events) => Some(envelope),
            Some(envelope) = recv_lane(&mut self.deltas) => Some(envelope),
            else => None,
        }
    }
}

async fn recv_lane(rx: &mut Option<EnvelopeRx>) -> Option<Arc<EventEnvelope>> {
    rx.as_mut()?.recv().await
}

pub struct SessionEventHub {
    groups: RwLock<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl SessionEventHub {
    /// `buffer` is the queue depth per subscriber and lane.
    pub fn new(buffer: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the group for `session_id` on the requested lanes.
    pub fn subscribe(&self, session_id: &str, lanes: &[Lane]) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));

        let (events_tx, events_rx) = if lanes.contains(&Lane::SessionEvent) {
            let (tx, rx) = mpsc::channel(self.buffer);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (deltas_tx, deltas_rx) = if lanes.contains(&Lane::StreamingDelta) {
            let (tx, rx) = mpsc::channel(self.buffer);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.groups
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                events: events_tx,
                deltas: deltas_tx,
                dropped: dropped.clone(),
            });
        tracing::debug!(session_id, subscriber = id, ?lanes, "Subscriber joined");

        Subscription {
            id,
            session_id: session_id.to_string(),
            events: events_rx,
            deltas: deltas_rx,
            dropped,
        }
    }

    pub fn unsubscribe(&self, session_id: &str, subscriber_id: u64) -> bool {
        let mut groups = self.groups.write();
        let Some(members) = groups.get_mut(session_id) else {
            return false;
        };
        let before = members.len();
        members.retain(|s| s.id != subscriber_id);
        let removed = members.len() != before;
        if members.is_empty() {
            groups.remove(session_id);
        }
        if removed {
            tracing::debug!(session_id, subscriber = subscriber_id, "Subscriber left");
        }
        removed
    }

    pub fn group_size(&self, session_id: &str) -> usize {
        self.groups.read().get(session_id).map_or(0, Vec::len)
    }

    fn prune_closed(&self, group: &str) {
        let mut groups = self.groups.write();
        if let Some(members) = groups.get_mut(group) {
            members.retain(|s| !s.is_closed());
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }
}

impl EventBroadcaster for SessionEventHub {
    fn send_to_group(&self, group: &str, lane: Lane, envelope: Arc<EventEnvelope>) -> usize {
        let mut delivered = 0;
        let mut saw_closed = false;
        {
            let groups = self.groups.read();
            let Some(members) = groups.get(group) else {
                return 0;
            };
            for member in members {
                let Some(tx) = member.sender(lane) else {
                    continue;
                };
                match tx.try_send(Arc::clone(&envelope)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        member.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            session_id = group,
                            subscriber = member.id,
                            lane = lane.as_str(),
                            "Subscriber queue full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }
        if saw_closed {
            self.prune_closed(group);
        }
        delivered
    }

    fn name(&self) -> &str {
        "hub"
    }
}
