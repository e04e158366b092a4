//! Session table and lifecycle.
//!
//! A [`SessionManager`] owns a transport and a fixed table of
//! [`MAX_DEVICES`] slots. Slot `n - 1` holds the session opened from the
//! `n`-th enumerated device; the 1-based index doubles as the handle.

use crate::error::SessionError;
use crate::protocol::{Axis2, Axis3, Capabilities, DeviceId, LED_COUNT, MAX_DEVICES};
use crate::transport::{Connection, Transport};
use std::fmt;
use std::os::unix::io::RawFd;
use tracing::{debug, error, info, warn};

mod dispatch;
pub mod enumerator;
mod session;

pub use dispatch::PollOutcome;
use session::{MotionCache, Session};

/// 1-based index of a table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(usize);

impl SessionHandle {
    /// `None` unless `n` is in `1..=MAX_DEVICES`
    pub fn new(n: usize) -> Option<Self> {
        (1..=MAX_DEVICES).contains(&n).then_some(Self(n))
    }

    pub fn get(self) -> usize {
        self.0
    }

    fn slot(self) -> usize {
        self.0 - 1
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-capacity table of device sessions over one transport
pub struct SessionManager<T: Transport> {
    transport: T,
    slots: [Option<Session<T::Connection>>; MAX_DEVICES],
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Every device the transport currently reports, including ones beyond
    /// the table capacity
    pub fn list(&self) -> Vec<DeviceId> {
        enumerator::list(&self.transport)
    }

    /// Open the `n`-th enumerated device into slot `n`.
    ///
    /// Each slot can be open only once; a second open fails without
    /// touching the existing session.
    pub fn open(&mut self, n: usize) -> Result<SessionHandle, SessionError> {
        let handle = SessionHandle::new(n).ok_or(SessionError::InvalidIndex(n))?;
        if self.slots[handle.slot()].is_some() {
            return Err(SessionError::AlreadyOpen(handle));
        }

        let id = enumerator::lookup(&self.transport, n).ok_or(SessionError::DeviceNotFound(n))?;

        let mut connection = self.transport.connect(&id).map_err(|e| {
            error!("Cannot create interface for '{}': {}", id, e);
            e
        })?;

        // A failed open drops the connection here, which releases it
        let wanted = connection.available() | Capabilities::WRITABLE;
        connection.open(wanted).map_err(|e| {
            error!("Cannot open interfaces {:?} on '{}': {}", wanted, id, e);
            e
        })?;

        if let Err(e) = connection.watch(true) {
            warn!(
                "Cannot watch '{}' for hotplug, removal will go unnoticed: {}",
                id, e
            );
        }

        let session = Session::new(connection);
        info!(
            "Opened device #{} ({}) with {:?}, fd {}",
            handle, id, session.capabilities, session.descriptor
        );
        self.slots[handle.slot()] = Some(session);
        Ok(handle)
    }

    /// Close a session. Closing a closed slot does nothing.
    pub fn close(&mut self, handle: SessionHandle) {
        if let Some(session) = self.slots[handle.slot()].take() {
            session.shutdown();
            info!("Closed device #{}", handle);
        }
    }

    pub fn close_all(&mut self) {
        for n in 1..=MAX_DEVICES {
            if let Some(handle) = SessionHandle::new(n) {
                self.close(handle);
            }
        }
    }

    pub fn is_open(&self, handle: SessionHandle) -> bool {
        self.slots[handle.slot()].is_some()
    }

    /// Handles of every open slot, ascending
    pub fn open_handles(&self) -> Vec<SessionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .filter_map(|(idx, _)| SessionHandle::new(idx + 1))
            .collect()
    }

    /// Opened interfaces; empty when closed
    pub fn capabilities(&self, handle: SessionHandle) -> Capabilities {
        self.session(handle)
            .map(|s| s.capabilities)
            .unwrap_or_else(Capabilities::empty)
    }

    /// Interfaces the device offers right now, opened or not
    pub fn available(&self, handle: SessionHandle) -> Capabilities {
        self.session(handle)
            .map(|s| s.connection.available())
            .unwrap_or_else(Capabilities::empty)
    }

    /// Descriptor a host event loop can watch for readability
    pub fn descriptor(&self, handle: SessionHandle) -> Option<RawFd> {
        self.session(handle).map(|s| s.descriptor)
    }

    fn session(&self, handle: SessionHandle) -> Option<&Session<T::Connection>> {
        self.slots[handle.slot()].as_ref()
    }

    fn session_mut(
        &mut self,
        handle: SessionHandle,
    ) -> Result<&mut Session<T::Connection>, SessionError> {
        self.slots[handle.slot()]
            .as_mut()
            .ok_or(SessionError::Closed(handle))
    }

    /// Cached motion, if any of `gate` is opened
    fn gated<R>(
        &self,
        handle: SessionHandle,
        gate: Capabilities,
        read: impl FnOnce(&MotionCache) -> R,
    ) -> Option<R> {
        self.session(handle)
            .filter(|s| s.capabilities.intersects(gate))
            .map(|s| read(&s.motion))
    }

    pub fn accel(&self, handle: SessionHandle) -> Option<Axis3> {
        self.gated(handle, Capabilities::ACCEL, |m| m.accel)
    }

    /// Four tracked IR points
    pub fn ir(&self, handle: SessionHandle) -> Option<[Axis2; 4]> {
        self.gated(handle, Capabilities::IR, |m| m.ir)
    }

    pub fn motion_plus(&self, handle: SessionHandle) -> Option<Axis3> {
        self.gated(handle, Capabilities::MOTION_PLUS, |m| m.motion_plus)
    }

    pub fn nunchuk_accel(&self, handle: SessionHandle) -> Option<Axis3> {
        self.gated(handle, Capabilities::NUNCHUK, |m| m.nunchuk_accel)
    }

    pub fn nunchuk_stick(&self, handle: SessionHandle) -> Option<Axis2> {
        self.gated(handle, Capabilities::NUNCHUK, |m| m.nunchuk_stick)
    }

    /// Left and right stick of a Classic or Pro controller
    pub fn pro_sticks(&self, handle: SessionHandle) -> Option<[Axis2; 2]> {
        self.gated(
            handle,
            Capabilities::CLASSIC_CONTROLLER | Capabilities::PRO_CONTROLLER,
            |m| m.sticks,
        )
    }

    /// Four weight sensors of a Balance Board
    pub fn balance_board(&self, handle: SessionHandle) -> Option<[i32; 4]> {
        self.gated(handle, Capabilities::BALANCE_BOARD, |m| m.board)
    }

    /// Battery capacity in percent
    pub fn battery(&mut self, handle: SessionHandle) -> Result<u8, SessionError> {
        let session = self.session_mut(handle)?;
        session.connection.battery().map_err(|e| {
            warn!("Cannot read battery capacity of #{}: {}", handle, e);
            e.into()
        })
    }

    /// LED states as a bitmask, bit `i` for LED `i + 1`. Any failed read
    /// fails the whole call.
    pub fn indicators(&mut self, handle: SessionHandle) -> Result<u8, SessionError> {
        let session = self.session_mut(handle)?;
        let mut mask = 0u8;
        for led in 1..=LED_COUNT {
            let on = session.connection.led(led).map_err(|e| {
                warn!("Cannot read LED {} of #{}: {}", led, handle, e);
                SessionError::from(e)
            })?;
            if on {
                mask |= 1 << (led - 1);
            }
        }
        Ok(mask)
    }

    /// Write LEDs 1 to 4 in order from `mask`. Stops at the first failed
    /// write; LEDs already written keep their new state.
    pub fn set_indicators(&mut self, handle: SessionHandle, mask: u8) -> Result<(), SessionError> {
        let session = self.session_mut(handle)?;
        for led in 1..=LED_COUNT {
            let on = mask & (1 << (led - 1)) != 0;
            if let Err(source) = session.connection.set_led(led, on) {
                error!("Cannot write LED {} of #{}: {}", led, handle, source);
                return Err(SessionError::IndicatorWrite { index: led, source });
            }
        }
        debug!("Set LEDs of #{} to {:#06b}", handle, mask);
        Ok(())
    }

    pub fn set_rumble(&mut self, handle: SessionHandle, on: bool) -> Result<(), SessionError> {
        let session = self.session_mut(handle)?;
        session.connection.rumble(on).map_err(|e| {
            error!("Cannot set rumble motor of #{}: {}", handle, e);
            e.into()
        })
    }
}

impl<T: Transport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::VirtualTransport;

    #[test]
    fn test_handle_range() {
        assert_eq!(SessionHandle::new(0), None);
        assert_eq!(SessionHandle::new(1).map(SessionHandle::get), Some(1));
        assert_eq!(SessionHandle::new(MAX_DEVICES).map(|h| h.slot()), Some(MAX_DEVICES - 1));
        assert_eq!(SessionHandle::new(MAX_DEVICES + 1), None);
    }

    #[test]
    fn test_open_requests_write_access_and_watch() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/a", Capabilities::CORE | Capabilities::ACCEL);
        let mut manager = SessionManager::new(transport);

        let handle = manager.open(1).unwrap();
        assert!(device.opened().contains(Capabilities::WRITABLE));
        assert!(device.is_watched());
        assert!(manager.descriptor(handle).is_some());
        assert_eq!(manager.open_handles(), vec![handle]);
    }

    #[test]
    fn test_drop_closes_every_slot() {
        let transport = VirtualTransport::new();
        let a = transport.add_device("/sys/a", Capabilities::CORE);
        let b = transport.add_device("/sys/b", Capabilities::CORE);
        let mut manager = SessionManager::new(transport);
        manager.open(1).unwrap();
        manager.open(2).unwrap();

        drop(manager);
        assert_eq!(a.connections(), 0);
        assert_eq!(b.connections(), 0);
    }
}
