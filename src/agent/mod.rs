//! Contracts with the external agent client: the live session handle, the
//! connection status signal, the persisted client configuration, and the
//! native event stream.

pub mod events;
pub mod traits;

pub use events::{NativeEvent, NativeEventData, RawNativeEvent};
pub use traits::{
    ClientConfig, ConnectionMonitor, ConnectionStatus, SessionHandle, SharedConnectionStatus,
    TransportMode,
};
