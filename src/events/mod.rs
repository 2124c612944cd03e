//! Live event fan-out: native events in, lane-separated envelopes out.

pub mod dispatcher;
pub mod envelope;
pub mod hub;
pub mod recorder;
pub mod traits;

pub use dispatcher::{create_handler, spawn_forwarder, SessionEventDispatcher};
pub use envelope::{EventEnvelope, EventPayload, Lane, LaneFrame};
pub use hub::{SessionEventHub, Subscription};
pub use recorder::HistoryRecorder;
pub use traits::EventBroadcaster;
