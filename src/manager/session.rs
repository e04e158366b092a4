use crate::protocol::{Axis2, Axis3, Capabilities, MotionSample};
use crate::transport::Connection;
use std::os::unix::io::RawFd;

/// Latest sample per motion channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct MotionCache {
    pub(crate) accel: Axis3,
    pub(crate) ir: [Axis2; 4],
    pub(crate) motion_plus: Axis3,
    pub(crate) nunchuk_accel: Axis3,
    pub(crate) nunchuk_stick: Axis2,
    /// Classic and Pro controller sticks share this field
    pub(crate) sticks: [Axis2; 2],
    pub(crate) board: [i32; 4],
}

impl MotionCache {
    /// Overwrite the field(s) the sample belongs to
    pub(crate) fn apply(&mut self, sample: &MotionSample) {
        match *sample {
            MotionSample::Accel(v) => self.accel = v,
            MotionSample::Ir { points } => self.ir = points,
            MotionSample::MotionPlus(v) => self.motion_plus = v,
            MotionSample::Nunchuk { accel, stick } => {
                self.nunchuk_accel = accel;
                self.nunchuk_stick = stick;
            }
            MotionSample::ControllerSticks { sticks } => self.sticks = sticks,
            MotionSample::BalanceBoard { weights } => self.board = weights,
        }
    }

    /// Zero every channel fed by an interface in `removed`
    pub(crate) fn reset(&mut self, removed: Capabilities) {
        let zero = Self::default();
        if removed.contains(Capabilities::ACCEL) {
            self.accel = zero.accel;
        }
        if removed.contains(Capabilities::IR) {
            self.ir = zero.ir;
        }
        if removed.contains(Capabilities::MOTION_PLUS) {
            self.motion_plus = zero.motion_plus;
        }
        if removed.contains(Capabilities::NUNCHUK) {
            self.nunchuk_accel = zero.nunchuk_accel;
            self.nunchuk_stick = zero.nunchuk_stick;
        }
        if removed.intersects(Capabilities::CLASSIC_CONTROLLER | Capabilities::PRO_CONTROLLER) {
            self.sticks = zero.sticks;
        }
        if removed.contains(Capabilities::BALANCE_BOARD) {
            self.board = zero.board;
        }
    }
}

/// Contents of an open table slot
pub(crate) struct Session<C: Connection> {
    pub(crate) connection: C,
    pub(crate) descriptor: RawFd,
    pub(crate) capabilities: Capabilities,
    pub(crate) motion: MotionCache,
}

impl<C: Connection> Session<C> {
    pub(crate) fn new(connection: C) -> Self {
        let descriptor = connection.descriptor();
        let capabilities = connection.opened();
        Self {
            connection,
            descriptor,
            capabilities,
            motion: MotionCache::default(),
        }
    }

    /// Re-read the opened interface set after a hotplug. Channels of
    /// interfaces that went away are zeroed so a later replug starts
    /// clean. Returns the removed interfaces.
    pub(crate) fn refresh_capabilities(&mut self) -> Capabilities {
        let opened = self.connection.opened();
        let removed = self.capabilities - opened;
        self.motion.reset(removed);
        self.capabilities = opened;
        removed
    }

    /// Release every opened interface; the connection itself is released
    /// when the session is dropped.
    pub(crate) fn shutdown(mut self) {
        let opened = self.connection.opened();
        self.connection.close(opened);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nunchuk_sample_updates_both_fields() {
        let mut cache = MotionCache::default();
        cache.apply(&MotionSample::Nunchuk {
            accel: Axis3::new(1, 2, 3),
            stick: Axis2::new(-4, 5),
        });
        assert_eq!(cache.nunchuk_accel, Axis3::new(1, 2, 3));
        assert_eq!(cache.nunchuk_stick, Axis2::new(-4, 5));
        assert_eq!(cache.accel, Axis3::default());
    }

    #[test]
    fn test_reset_only_touches_removed_channels() {
        let mut cache = MotionCache::default();
        cache.apply(&MotionSample::Accel(Axis3::new(1, 1, 1)));
        cache.apply(&MotionSample::Nunchuk {
            accel: Axis3::new(2, 2, 2),
            stick: Axis2::new(3, 3),
        });
        cache.apply(&MotionSample::ControllerSticks {
            sticks: [Axis2::new(4, 4); 2],
        });

        cache.reset(Capabilities::NUNCHUK | Capabilities::PRO_CONTROLLER);
        assert_eq!(cache.accel, Axis3::new(1, 1, 1));
        assert_eq!(cache.nunchuk_accel, Axis3::default());
        assert_eq!(cache.nunchuk_stick, Axis2::default());
        assert_eq!(cache.sticks, [Axis2::default(); 2]);
    }

    #[test]
    fn test_board_and_sticks_are_separate() {
        let mut cache = MotionCache::default();
        cache.apply(&MotionSample::BalanceBoard {
            weights: [1, 2, 3, 4],
        });
        assert_eq!(cache.board, [1, 2, 3, 4]);
        assert_eq!(cache.sticks, [Axis2::default(); 2]);
    }
}
