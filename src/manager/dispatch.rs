//! Blocking poll and drain.
//!
//! One call waits for the session's descriptor, then decodes queued events
//! until it meets a key, a removal, an empty queue or a decode error.
//! Motion samples and hotplug notifications met on the way are absorbed
//! into the session, so at most one key surfaces per call and the motion
//! cache is always at least as fresh as that key.

use super::{SessionHandle, SessionManager};
use crate::protocol::{Event, KeyEvent};
use crate::transport::{Connection, Transport};
use serde::Serialize;
use std::io;
use tracing::{error, info, trace, warn};

/// Result of one [`SessionManager::poll`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Key(KeyEvent),
    /// The device went away; the slot is closed and must not be polled
    Gone,
    /// Nothing to report (closed slot, empty queue or a logged failure)
    NoEvent,
}

impl<T: Transport> SessionManager<T> {
    /// Wait for the device and drain its queue up to the first key event.
    ///
    /// Blocks without timeout until the descriptor is readable. Callers
    /// should repeat the call until it returns [`PollOutcome::NoEvent`] so
    /// bursts of keys are not left queued, and must not spin on a closed
    /// handle.
    pub fn poll(&mut self, handle: SessionHandle) -> PollOutcome {
        let Some(session) = self.slots[handle.slot()].as_mut() else {
            return PollOutcome::NoEvent;
        };

        loop {
            match session.connection.wait_readable() {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Cannot poll device #{} (fd {}): {}", handle, session.descriptor, e);
                    return PollOutcome::NoEvent;
                }
            }
        }

        loop {
            let event = match session.connection.dispatch() {
                Ok(Some(event)) => event,
                Ok(None) => return PollOutcome::NoEvent,
                Err(e) => {
                    warn!("Read from device #{} failed: {}", handle, e);
                    return PollOutcome::NoEvent;
                }
            };
            trace!("Device #{} event: {:?}", handle, event);

            match event {
                Event::Key(key) => return PollOutcome::Key(key),
                Event::Watch => {
                    let available = session.connection.available();
                    match session.connection.open(available) {
                        Ok(()) => info!("Hotplug on device #{}: {:?}", handle, available),
                        Err(e) => error!("Cannot reopen interfaces on device #{}: {}", handle, e),
                    }
                    let removed = session.refresh_capabilities();
                    if !removed.is_empty() {
                        info!("Device #{} lost {:?}", handle, removed);
                    }
                }
                Event::Gone => {
                    // The device is gone, so there is nothing left to close
                    self.slots[handle.slot()] = None;
                    info!("Device #{} was removed", handle);
                    return PollOutcome::Gone;
                }
                Event::Motion(sample) => session.motion.apply(&sample),
                Event::Unknown { kind } => trace!("Ignoring event type {} on #{}", kind, handle),
            }
        }
    }

    /// Poll until [`PollOutcome::NoEvent`] or [`PollOutcome::Gone`],
    /// returning every key seen and whether the device went away.
    pub fn drain(&mut self, handle: SessionHandle) -> (Vec<KeyEvent>, bool) {
        let mut keys = Vec::new();
        loop {
            match self.poll(handle) {
                PollOutcome::Key(key) => keys.push(key),
                PollOutcome::Gone => return (keys, true),
                PollOutcome::NoEvent => return (keys, false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Axis3, Capabilities, Key, KeySource, KeyState, MotionSample};
    use crate::transport::{VirtualDevice, VirtualTransport};

    fn open_one(
        caps: Capabilities,
    ) -> (SessionManager<VirtualTransport>, VirtualDevice, SessionHandle) {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/a", caps);
        let mut manager = SessionManager::new(transport);
        let handle = manager.open(1).unwrap();
        (manager, device, handle)
    }

    #[test]
    fn test_closed_slot_reports_no_event() {
        let transport = VirtualTransport::new();
        let mut manager = SessionManager::new(transport);
        let handle = SessionHandle::new(3).unwrap();
        assert_eq!(manager.poll(handle), PollOutcome::NoEvent);
    }

    #[test]
    fn test_interrupted_wait_is_retried() {
        let (mut manager, device, handle) = open_one(Capabilities::CORE);
        device.fail_next_wait(io::ErrorKind::Interrupted);
        device.fail_next_wait(io::ErrorKind::Interrupted);
        device.press(Key::A);

        assert_eq!(
            manager.poll(handle),
            PollOutcome::Key(KeyEvent::new(KeySource::Core, Key::A.to_code(), KeyState::Pressed))
        );
    }

    #[test]
    fn test_wait_failure_keeps_session_open() {
        let (mut manager, device, handle) = open_one(Capabilities::CORE);
        device.fail_next_wait(io::ErrorKind::Other);
        device.press(Key::B);

        assert_eq!(manager.poll(handle), PollOutcome::NoEvent);
        assert!(manager.is_open(handle));
        assert_eq!(device.queued(), 1);
        assert!(matches!(manager.poll(handle), PollOutcome::Key(_)));
    }

    #[test]
    fn test_decode_error_stops_drain() {
        let (mut manager, device, handle) = open_one(Capabilities::CORE | Capabilities::ACCEL);
        device.fail_next_dispatch();
        device.motion(MotionSample::Accel(Axis3::new(1, 1, 1)));

        assert_eq!(manager.poll(handle), PollOutcome::NoEvent);
        assert_eq!(manager.accel(handle), Some(Axis3::default()));
        assert_eq!(manager.poll(handle), PollOutcome::NoEvent);
        assert_eq!(manager.accel(handle), Some(Axis3::new(1, 1, 1)));
    }

    #[test]
    fn test_unknown_events_are_skipped() {
        let (mut manager, device, handle) = open_one(Capabilities::CORE);
        device.push(Event::Unknown { kind: 15 });
        device.press(Key::Home);

        assert!(matches!(manager.poll(handle), PollOutcome::Key(k) if k.key() == Some(Key::Home)));
    }

    #[test]
    fn test_drain_collects_keys() {
        let (mut manager, device, handle) = open_one(Capabilities::CORE);
        device.press(Key::One);
        device.release(Key::One);

        let (keys, gone) = manager.drain(handle);
        assert_eq!(keys.len(), 2);
        assert!(!gone);
    }
}
