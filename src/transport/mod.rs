//! Transport boundary.
//!
//! The session manager never talks to the driver directly. A [`Transport`]
//! enumerates devices and opens [`Connection`]s; a connection exposes a
//! waitable descriptor and a dispatch primitive that yields one decoded
//! [`Event`] per call.

use crate::protocol::{Capabilities, DeviceId, Event};
use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

mod virtual_device;
mod xwiimote;

pub use virtual_device::{ScriptStep, VirtualConnection, VirtualDevice, VirtualTransport};
pub use xwiimote::{DEFAULT_LIBRARY, XwiimoteConnection, XwiimoteMonitor, XwiimoteTransport};

/// Errors reported by a transport backend
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("missing symbol {0} in transport library")]
    MissingSymbol(String),

    #[error("cannot start device enumeration")]
    Enumeration,

    #[error("device disconnected")]
    Disconnected,

    #[error("replay script line {line}: {message}")]
    Script { line: usize, message: String },

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Build an error from a negative-errno return code
    pub fn from_errno(op: &'static str, ret: i32) -> Self {
        TransportError::Os {
            op,
            source: io::Error::from_raw_os_error(ret.saturating_abs()),
        }
    }

    pub fn os(op: &'static str, kind: io::ErrorKind) -> Self {
        TransportError::Os {
            op,
            source: io::Error::from(kind),
        }
    }
}

/// Source of devices and connections
pub trait Transport {
    type Connection: Connection;
    type Monitor: Iterator<Item = DeviceId>;

    /// Start a fresh enumeration. Dropping the monitor ends it.
    fn enumerate(&self) -> Result<Self::Monitor, TransportError>;

    /// Acquire a connection to one device. No interfaces are open yet.
    fn connect(&self, id: &DeviceId) -> Result<Self::Connection, TransportError>;
}

/// An acquired device. Dropping it releases the underlying handle.
pub trait Connection {
    /// Descriptor that becomes readable when events are queued
    fn descriptor(&self) -> RawFd;

    /// Interfaces the device currently offers
    fn available(&self) -> Capabilities;

    /// Interfaces currently open on this connection
    fn opened(&self) -> Capabilities;

    fn open(&mut self, ifaces: Capabilities) -> Result<(), TransportError>;

    fn close(&mut self, ifaces: Capabilities);

    /// Enable or disable hotplug and removal notifications
    fn watch(&mut self, enable: bool) -> Result<(), TransportError>;

    /// Decode the next queued event. `Ok(None)` means the queue is empty.
    fn dispatch(&mut self) -> Result<Option<Event>, TransportError>;

    /// Block until the descriptor is readable. A single attempt: callers
    /// retry on `ErrorKind::Interrupted`.
    fn wait_readable(&mut self) -> io::Result<()> {
        wait_readable(self.descriptor())
    }

    fn battery(&mut self) -> Result<u8, TransportError>;

    /// Read indicator LED `led` (1-based)
    fn led(&mut self, led: u8) -> Result<bool, TransportError>;

    /// Write indicator LED `led` (1-based)
    fn set_led(&mut self, led: u8, on: bool) -> Result<(), TransportError>;

    fn rumble(&mut self, on: bool) -> Result<(), TransportError>;
}

/// One `poll(2)` on `fd` for `POLLIN` with no timeout
pub fn wait_readable(fd: RawFd) -> io::Result<()> {
    let mut poll_fd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut poll_fd, 1, -1) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    if poll_fd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }

    Ok(())
}
