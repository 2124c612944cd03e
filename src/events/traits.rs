use std::sync::Arc;

use super::envelope::{EventEnvelope, Lane};

/// Group-addressed, fire-and-forget delivery to connected viewers.
///
/// `send_to_group` must not block or await: a slow subscriber loses the
/// envelope instead of holding up the session. Returns how many subscribers
/// accepted it.
pub trait EventBroadcaster: Send + Sync {
    fn send_to_group(&self, group: &str, lane: Lane, envelope: Arc<EventEnvelope>) -> usize;

    /// The name of this broadcaster implementation.
    fn name(&self) -> &str;
}
