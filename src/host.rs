//! Scripting host boundary.
//!
//! [`HostBindings`] wraps a [`SessionManager`] and flattens its typed API
//! into the integer conventions a dynamically typed host expects: handles
//! are plain integers, `0` means "no handle", and motion snapshots are flat
//! integer tables. Nothing below this module uses sentinels.

use crate::error::SessionError;
use crate::manager::{PollOutcome, SessionHandle, SessionManager};
use crate::protocol::{Axis2, Axis3, Capabilities};
use crate::transport::Transport;
use serde::Serialize;
use tracing::debug;

/// Value reported in place of a key when the polled device went away.
///
/// Equal to the driver's removal event type, so hosts that compare against
/// that constant keep working.
pub const GONE_SIGNAL: i64 = 16;

/// One poll result in host terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostPoll {
    Key { code: i64, state: i64 },
    Gone(i64),
    Nil,
}

pub struct HostBindings<T: Transport> {
    manager: SessionManager<T>,
}

fn handle(raw: i64) -> Option<SessionHandle> {
    usize::try_from(raw).ok().and_then(SessionHandle::new)
}

fn flat2(points: &[Axis2]) -> Vec<i64> {
    points
        .iter()
        .flat_map(|p| [i64::from(p.x), i64::from(p.y)])
        .collect()
}

fn flat3(v: Axis3) -> Vec<i64> {
    vec![i64::from(v.x), i64::from(v.y), i64::from(v.z)]
}

impl<T: Transport> HostBindings<T> {
    pub fn new(transport: T) -> Self {
        Self {
            manager: SessionManager::new(transport),
        }
    }

    pub fn manager(&self) -> &SessionManager<T> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SessionManager<T> {
        &mut self.manager
    }

    /// Sysfs paths of every attached device
    pub fn list(&self) -> Vec<String> {
        self.manager.list().into_iter().map(|id| id.0).collect()
    }

    /// Open the `index`-th device. Returns the handle, or `0` on any failure.
    pub fn open(&mut self, index: i64) -> i64 {
        let Ok(n) = usize::try_from(index) else {
            debug!("Rejecting device index {}", index);
            return 0;
        };
        match self.manager.open(n) {
            Ok(handle) => handle.get() as i64,
            Err(e) => {
                debug!("Open of device {} failed: {}", index, e);
                0
            }
        }
    }

    pub fn close(&mut self, handle_raw: i64) {
        if let Some(h) = handle(handle_raw) {
            self.manager.close(h);
        }
    }

    /// Opened interface bits, `0` when closed. Write access is a mode of
    /// the connection, not an interface, so its bit is never reported.
    pub fn info(&self, handle_raw: i64) -> i64 {
        handle(handle_raw)
            .map(|h| self.manager.capabilities(h) - Capabilities::WRITABLE)
            .map(|caps| i64::from(caps.bits()))
            .unwrap_or(0)
    }

    /// Battery percentage. A closed handle reads as `Some(0)`, a failed read
    /// as `None`.
    pub fn get_battery(&mut self, handle_raw: i64) -> Option<i64> {
        let Some(h) = handle(handle_raw) else {
            return Some(0);
        };
        closed_as_zero(self.manager.battery(h).map(i64::from))
    }

    /// LED bitmask, same conventions as [`get_battery`](Self::get_battery)
    pub fn get_leds(&mut self, handle_raw: i64) -> Option<i64> {
        let Some(h) = handle(handle_raw) else {
            return Some(0);
        };
        closed_as_zero(self.manager.indicators(h).map(i64::from))
    }

    /// Only the low four bits of `mask` are used
    pub fn set_leds(&mut self, handle_raw: i64, mask: i64) {
        if let Some(h) = handle(handle_raw) {
            // Failures are already logged by the manager
            let _ = self.manager.set_indicators(h, (mask & 0x0f) as u8);
        }
    }

    pub fn rumble(&mut self, handle_raw: i64, on: i64) {
        if let Some(h) = handle(handle_raw) {
            let _ = self.manager.set_rumble(h, on != 0);
        }
    }

    pub fn poll(&mut self, handle_raw: i64) -> HostPoll {
        let Some(h) = handle(handle_raw) else {
            return HostPoll::Nil;
        };
        match self.manager.poll(h) {
            PollOutcome::Key(key) => HostPoll::Key {
                code: i64::from(key.code),
                state: i64::from(key.state.to_raw()),
            },
            PollOutcome::Gone => HostPoll::Gone(GONE_SIGNAL),
            PollOutcome::NoEvent => HostPoll::Nil,
        }
    }

    /// `[x, y, z]`
    pub fn accel(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager.accel(handle(handle_raw)?).map(flat3)
    }

    /// `[x1, y1, x2, y2, x3, y3, x4, y4]`
    pub fn ir(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager.ir(handle(handle_raw)?).map(|p| flat2(&p))
    }

    pub fn motion_plus(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager.motion_plus(handle(handle_raw)?).map(flat3)
    }

    pub fn nunchuk_accel(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager.nunchuk_accel(handle(handle_raw)?).map(flat3)
    }

    pub fn nunchuk_stick(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager
            .nunchuk_stick(handle(handle_raw)?)
            .map(|s| flat2(&[s]))
    }

    /// `[left x, left y, right x, right y]`
    pub fn pro_stick(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager
            .pro_sticks(handle(handle_raw)?)
            .map(|s| flat2(&s))
    }

    pub fn board(&self, handle_raw: i64) -> Option<Vec<i64>> {
        self.manager
            .balance_board(handle(handle_raw)?)
            .map(|w| w.iter().copied().map(i64::from).collect())
    }
}

fn closed_as_zero(result: Result<i64, SessionError>) -> Option<i64> {
    match result {
        Ok(value) => Some(value),
        Err(SessionError::Closed(_)) => Some(0),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Key, MotionSample};
    use crate::transport::VirtualTransport;

    #[test]
    fn test_open_failure_is_zero() {
        let transport = VirtualTransport::new();
        transport.add_device("/sys/a", Capabilities::CORE);
        let mut host = HostBindings::new(transport);

        assert_eq!(host.open(-1), 0);
        assert_eq!(host.open(0), 0);
        assert_eq!(host.open(2), 0);
        assert_eq!(host.open(11), 0);
        assert_eq!(host.open(1), 1);
        assert_eq!(host.open(1), 0);
    }

    #[test]
    fn test_info_reports_interface_bits_only() {
        let transport = VirtualTransport::new();
        transport.add_device("/sys/a", Capabilities::CORE | Capabilities::ACCEL);
        let mut host = HostBindings::new(transport);
        let h = host.open(1);

        let opened = host.manager().capabilities(SessionHandle::new(1).unwrap());
        assert!(opened.contains(Capabilities::WRITABLE));
        assert_eq!(host.info(h), 0x3);
    }

    #[test]
    fn test_closed_handle_conventions() {
        let mut host = HostBindings::new(VirtualTransport::new());

        assert_eq!(host.info(3), 0);
        assert_eq!(host.get_battery(3), Some(0));
        assert_eq!(host.get_leds(3), Some(0));
        assert_eq!(host.get_battery(99), Some(0));
        assert_eq!(host.poll(3), HostPoll::Nil);
        assert_eq!(host.accel(3), None);
        host.close(3);
        host.close(-5);
    }

    #[test]
    fn test_transport_failure_is_none() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/a", Capabilities::CORE);
        let mut host = HostBindings::new(transport);
        let h = host.open(1);

        device.fail_battery(true);
        device.fail_led_read(Some(2));
        assert_eq!(host.get_battery(h), None);
        assert_eq!(host.get_leds(h), None);
    }

    #[test]
    fn test_poll_key_and_gone() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/a", Capabilities::CORE);
        let mut host = HostBindings::new(transport);
        let h = host.open(1);

        device.press(Key::Plus);
        device.disconnect();
        assert_eq!(
            host.poll(h),
            HostPoll::Key {
                code: i64::from(Key::Plus.to_code()),
                state: 1
            }
        );
        assert_eq!(host.poll(h), HostPoll::Gone(GONE_SIGNAL));
        assert_eq!(host.poll(h), HostPoll::Nil);
        assert_eq!(host.info(h), 0);
    }

    #[test]
    fn test_flat_tables() {
        let transport = VirtualTransport::new();
        let device = transport.add_device(
            "/sys/a",
            Capabilities::CORE | Capabilities::IR | Capabilities::PRO_CONTROLLER,
        );
        let mut host = HostBindings::new(transport);
        let h = host.open(1);

        device.motion(MotionSample::Ir {
            points: [
                Axis2::new(1, 2),
                Axis2::new(3, 4),
                Axis2::new(5, 6),
                Axis2::new(7, 8),
            ],
        });
        device.motion(MotionSample::ControllerSticks {
            sticks: [Axis2::new(-1, 1), Axis2::new(2, -2)],
        });
        assert_eq!(host.poll(h), HostPoll::Nil);

        assert_eq!(host.ir(h), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(host.pro_stick(h), Some(vec![-1, 1, 2, -2]));
        assert_eq!(host.accel(h), None);
        assert_eq!(host.board(h), None);
    }

    #[test]
    fn test_led_mask_round_trip() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/a", Capabilities::CORE);
        let mut host = HostBindings::new(transport);
        let h = host.open(1);

        host.set_leds(h, 0b1010);
        assert_eq!(device.leds(), [false, true, false, true]);
        assert_eq!(host.get_leds(h), Some(0b1010));

        host.rumble(h, 7);
        assert!(device.rumbling());
        host.rumble(h, 0);
        assert!(!device.rumbling());
    }
}
