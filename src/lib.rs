//! xwiipoll - polling sessions for Wii Remote class controllers
//!
//! This library opens controllers by 1-based index, hands out at most one
//! discrete key event per poll and keeps the latest motion sample of every
//! channel for on-demand reads. It is shaped for embedding in a scripting
//! host; [`host::HostBindings`] provides the integer conventions such hosts
//! expect.

pub mod error;
pub mod host;
pub mod manager;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::SessionError;
pub use host::{GONE_SIGNAL, HostBindings, HostPoll};
pub use manager::{PollOutcome, SessionHandle, SessionManager};
pub use protocol::{
    Axis2, Axis3, Capabilities, DeviceId, Event, Key, KeyEvent, KeySource, KeyState, LED_COUNT,
    MAX_DEVICES, MotionSample,
};
pub use transport::{
    Connection, Transport, TransportError, VirtualDevice, VirtualTransport, XwiimoteTransport,
};
