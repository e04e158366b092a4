//! libxwiimote backend.
//!
//! The library is loaded at runtime so the crate builds and tests on hosts
//! without it. Symbols are resolved once per [`XwiimoteTransport`] and
//! shared by every monitor and connection it creates.

use super::{Connection, Transport, TransportError};
use crate::protocol::{
    Axis2, Axis3, Capabilities, DeviceId, Event, KeyEvent, KeySource, KeyState, MotionSample,
};
use libc::{c_char, c_int, c_uint, c_void, size_t};
use libloading::Library;
use std::ffi::{CStr, CString};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared object name searched when no explicit path is given
pub const DEFAULT_LIBRARY: &str = "libxwiimote.so.2";

// enum xwii_event_types
const EVENT_KEY: c_uint = 0;
const EVENT_ACCEL: c_uint = 1;
const EVENT_IR: c_uint = 2;
const EVENT_BALANCE_BOARD: c_uint = 3;
const EVENT_MOTION_PLUS: c_uint = 4;
const EVENT_PRO_CONTROLLER_KEY: c_uint = 5;
const EVENT_PRO_CONTROLLER_MOVE: c_uint = 6;
const EVENT_WATCH: c_uint = 7;
const EVENT_CLASSIC_CONTROLLER_KEY: c_uint = 8;
const EVENT_CLASSIC_CONTROLLER_MOVE: c_uint = 9;
const EVENT_NUNCHUK_KEY: c_uint = 10;
const EVENT_NUNCHUK_MOVE: c_uint = 11;
const EVENT_DRUMS_KEY: c_uint = 12;
const EVENT_GUITAR_KEY: c_uint = 14;
const EVENT_GONE: c_uint = 16;

const ABS_NUM: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RawAbs {
    x: i32,
    y: i32,
    z: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawKey {
    code: c_uint,
    state: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy)]
union RawPayload {
    key: RawKey,
    abs: [RawAbs; ABS_NUM],
    reserved: [u8; 128],
}

/// `struct xwii_event`
#[repr(C)]
struct RawEvent {
    time: libc::timeval,
    kind: c_uint,
    v: RawPayload,
}

impl RawEvent {
    fn zeroed() -> Self {
        Self {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            kind: 0,
            v: RawPayload { reserved: [0; 128] },
        }
    }
}

type MonitorNewFn = unsafe extern "C" fn(poll: bool, direct: bool) -> *mut c_void;
type MonitorPollFn = unsafe extern "C" fn(monitor: *mut c_void) -> *mut c_char;
type MonitorUnrefFn = unsafe extern "C" fn(monitor: *mut c_void);
type IfaceNewFn = unsafe extern "C" fn(dev: *mut *mut c_void, syspath: *const c_char) -> c_int;
type IfaceUnrefFn = unsafe extern "C" fn(dev: *mut c_void);
type IfaceGetFdFn = unsafe extern "C" fn(dev: *mut c_void) -> c_int;
type IfaceWatchFn = unsafe extern "C" fn(dev: *mut c_void, watch: bool) -> c_int;
type IfaceOpenFn = unsafe extern "C" fn(dev: *mut c_void, ifaces: c_uint) -> c_int;
type IfaceCloseFn = unsafe extern "C" fn(dev: *mut c_void, ifaces: c_uint);
type IfaceMaskFn = unsafe extern "C" fn(dev: *mut c_void) -> c_uint;
type IfaceDispatchFn =
    unsafe extern "C" fn(dev: *mut c_void, event: *mut RawEvent, size: size_t) -> c_int;
type IfaceGetBatteryFn = unsafe extern "C" fn(dev: *mut c_void, capacity: *mut u8) -> c_int;
type IfaceGetLedFn = unsafe extern "C" fn(dev: *mut c_void, led: c_uint, state: *mut bool) -> c_int;
type IfaceSetLedFn = unsafe extern "C" fn(dev: *mut c_void, led: c_uint, state: bool) -> c_int;
type IfaceRumbleFn = unsafe extern "C" fn(dev: *mut c_void, on: bool) -> c_int;

struct Api {
    monitor_new: MonitorNewFn,
    monitor_poll: MonitorPollFn,
    monitor_unref: MonitorUnrefFn,
    iface_new: IfaceNewFn,
    iface_unref: IfaceUnrefFn,
    iface_get_fd: IfaceGetFdFn,
    iface_watch: IfaceWatchFn,
    iface_open: IfaceOpenFn,
    iface_close: IfaceCloseFn,
    iface_opened: IfaceMaskFn,
    iface_available: IfaceMaskFn,
    iface_dispatch: IfaceDispatchFn,
    iface_get_battery: IfaceGetBatteryFn,
    iface_get_led: IfaceGetLedFn,
    iface_set_led: IfaceSetLedFn,
    iface_rumble: IfaceRumbleFn,
    // Keeps the function pointers above valid
    _lib: Library,
}

fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T, TransportError> {
    unsafe {
        lib.get::<T>(name.as_bytes())
            .map(|sym| *sym)
            .map_err(|_| TransportError::MissingSymbol(name.to_string()))
    }
}

impl Api {
    fn load(path: &Path) -> Result<Self, TransportError> {
        let lib = unsafe { Library::new(path) }
            .map_err(|e| TransportError::LibraryUnavailable(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            monitor_new: symbol(&lib, "xwii_monitor_new")?,
            monitor_poll: symbol(&lib, "xwii_monitor_poll")?,
            monitor_unref: symbol(&lib, "xwii_monitor_unref")?,
            iface_new: symbol(&lib, "xwii_iface_new")?,
            iface_unref: symbol(&lib, "xwii_iface_unref")?,
            iface_get_fd: symbol(&lib, "xwii_iface_get_fd")?,
            iface_watch: symbol(&lib, "xwii_iface_watch")?,
            iface_open: symbol(&lib, "xwii_iface_open")?,
            iface_close: symbol(&lib, "xwii_iface_close")?,
            iface_opened: symbol(&lib, "xwii_iface_opened")?,
            iface_available: symbol(&lib, "xwii_iface_available")?,
            iface_dispatch: symbol(&lib, "xwii_iface_dispatch")?,
            iface_get_battery: symbol(&lib, "xwii_iface_get_battery")?,
            iface_get_led: symbol(&lib, "xwii_iface_get_led")?,
            iface_set_led: symbol(&lib, "xwii_iface_set_led")?,
            iface_rumble: symbol(&lib, "xwii_iface_rumble")?,
            _lib: lib,
        })
    }
}

/// Transport backed by the system's libxwiimote
#[derive(Clone)]
pub struct XwiimoteTransport {
    api: Arc<Api>,
}

impl XwiimoteTransport {
    /// Load [`DEFAULT_LIBRARY`] through the dynamic linker search path
    pub fn load() -> Result<Self, TransportError> {
        Self::load_from(DEFAULT_LIBRARY)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let api = Api::load(path)?;
        info!("Loaded xwiimote from {}", path.display());
        Ok(Self { api: Arc::new(api) })
    }
}

impl Transport for XwiimoteTransport {
    type Connection = XwiimoteConnection;
    type Monitor = XwiimoteMonitor;

    fn enumerate(&self) -> Result<Self::Monitor, TransportError> {
        let raw = unsafe { (self.api.monitor_new)(false, false) };
        if raw.is_null() {
            return Err(TransportError::Enumeration);
        }
        Ok(XwiimoteMonitor {
            api: Arc::clone(&self.api),
            raw,
        })
    }

    fn connect(&self, id: &DeviceId) -> Result<Self::Connection, TransportError> {
        let path = CString::new(id.as_str()).map_err(|_| {
            TransportError::os("xwii_iface_new", std::io::ErrorKind::InvalidInput)
        })?;

        let mut raw: *mut c_void = std::ptr::null_mut();
        let ret = unsafe { (self.api.iface_new)(&mut raw, path.as_ptr()) };
        if ret != 0 || raw.is_null() {
            return Err(TransportError::from_errno("xwii_iface_new", ret));
        }

        debug!("Created xwiimote interface for {}", id);
        Ok(XwiimoteConnection {
            api: Arc::clone(&self.api),
            raw,
        })
    }
}

/// Enumeration context; each item is a device sysfs path
pub struct XwiimoteMonitor {
    api: Arc<Api>,
    raw: *mut c_void,
}

impl Iterator for XwiimoteMonitor {
    type Item = DeviceId;

    fn next(&mut self) -> Option<DeviceId> {
        let entry = unsafe { (self.api.monitor_poll)(self.raw) };
        if entry.is_null() {
            return None;
        }
        let path = unsafe { CStr::from_ptr(entry).to_string_lossy().into_owned() };
        unsafe { libc::free(entry as *mut c_void) };
        Some(DeviceId(path))
    }
}

impl Drop for XwiimoteMonitor {
    fn drop(&mut self) {
        unsafe { (self.api.monitor_unref)(self.raw) };
    }
}

/// An `xwii_iface` reference
pub struct XwiimoteConnection {
    api: Arc<Api>,
    raw: *mut c_void,
}

impl Drop for XwiimoteConnection {
    fn drop(&mut self) {
        unsafe { (self.api.iface_unref)(self.raw) };
    }
}

fn check(op: &'static str, ret: c_int) -> Result<(), TransportError> {
    if ret == 0 {
        Ok(())
    } else {
        Err(TransportError::from_errno(op, ret))
    }
}

impl Connection for XwiimoteConnection {
    fn descriptor(&self) -> RawFd {
        unsafe { (self.api.iface_get_fd)(self.raw) }
    }

    fn available(&self) -> Capabilities {
        Capabilities::from_bits_truncate(unsafe { (self.api.iface_available)(self.raw) })
    }

    fn opened(&self) -> Capabilities {
        Capabilities::from_bits_truncate(unsafe { (self.api.iface_opened)(self.raw) })
    }

    fn open(&mut self, ifaces: Capabilities) -> Result<(), TransportError> {
        check("xwii_iface_open", unsafe {
            (self.api.iface_open)(self.raw, ifaces.bits())
        })
    }

    fn close(&mut self, ifaces: Capabilities) {
        unsafe { (self.api.iface_close)(self.raw, ifaces.bits()) };
    }

    fn watch(&mut self, enable: bool) -> Result<(), TransportError> {
        check("xwii_iface_watch", unsafe {
            (self.api.iface_watch)(self.raw, enable)
        })
    }

    fn dispatch(&mut self) -> Result<Option<Event>, TransportError> {
        let mut raw = RawEvent::zeroed();
        let ret = unsafe {
            (self.api.iface_dispatch)(self.raw, &mut raw, std::mem::size_of::<RawEvent>())
        };
        match ret {
            0 => Ok(Some(decode(raw.kind, &raw.v))),
            r if r == -libc::EAGAIN => Ok(None),
            r => Err(TransportError::from_errno("xwii_iface_dispatch", r)),
        }
    }

    fn battery(&mut self) -> Result<u8, TransportError> {
        let mut capacity = 0u8;
        check("xwii_iface_get_battery", unsafe {
            (self.api.iface_get_battery)(self.raw, &mut capacity)
        })?;
        Ok(capacity)
    }

    fn led(&mut self, led: u8) -> Result<bool, TransportError> {
        let mut state = false;
        check("xwii_iface_get_led", unsafe {
            (self.api.iface_get_led)(self.raw, c_uint::from(led), &mut state)
        })?;
        Ok(state)
    }

    fn set_led(&mut self, led: u8, on: bool) -> Result<(), TransportError> {
        check("xwii_iface_set_led", unsafe {
            (self.api.iface_set_led)(self.raw, c_uint::from(led), on)
        })
    }

    fn rumble(&mut self, on: bool) -> Result<(), TransportError> {
        check("xwii_iface_rumble", unsafe {
            (self.api.iface_rumble)(self.raw, on)
        })
    }
}

fn xy(abs: &RawAbs) -> Axis2 {
    Axis2::new(abs.x, abs.y)
}

fn xyz(abs: &RawAbs) -> Axis3 {
    Axis3::new(abs.x, abs.y, abs.z)
}

fn key(source: KeySource, payload: &RawPayload) -> Event {
    let raw = unsafe { payload.key };
    Event::Key(KeyEvent::new(source, raw.code, KeyState::from_raw(raw.state)))
}

/// Translate a dispatched `struct xwii_event` into an [`Event`]
fn decode(kind: c_uint, payload: &RawPayload) -> Event {
    match kind {
        EVENT_KEY => key(KeySource::Core, payload),
        EVENT_CLASSIC_CONTROLLER_KEY => key(KeySource::ClassicController, payload),
        EVENT_PRO_CONTROLLER_KEY => key(KeySource::ProController, payload),
        EVENT_NUNCHUK_KEY => key(KeySource::Nunchuk, payload),
        EVENT_DRUMS_KEY => key(KeySource::Drums, payload),
        EVENT_GUITAR_KEY => key(KeySource::Guitar, payload),
        EVENT_WATCH => Event::Watch,
        EVENT_GONE => Event::Gone,
        _ => {
            let abs = unsafe { payload.abs };
            match kind {
                EVENT_ACCEL => Event::Motion(MotionSample::Accel(xyz(&abs[0]))),
                EVENT_IR => Event::Motion(MotionSample::Ir {
                    points: [xy(&abs[0]), xy(&abs[1]), xy(&abs[2]), xy(&abs[3])],
                }),
                EVENT_MOTION_PLUS => Event::Motion(MotionSample::MotionPlus(xyz(&abs[0]))),
                EVENT_NUNCHUK_MOVE => Event::Motion(MotionSample::Nunchuk {
                    accel: xyz(&abs[1]),
                    stick: xy(&abs[0]),
                }),
                EVENT_CLASSIC_CONTROLLER_MOVE | EVENT_PRO_CONTROLLER_MOVE => {
                    Event::Motion(MotionSample::ControllerSticks {
                        sticks: [xy(&abs[0]), xy(&abs[1])],
                    })
                }
                EVENT_BALANCE_BOARD => Event::Motion(MotionSample::BalanceBoard {
                    weights: [abs[0].x, abs[1].x, abs[2].x, abs[3].x],
                }),
                other => Event::Unknown { kind: other },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs_payload(values: &[(i32, i32, i32)]) -> RawPayload {
        let mut abs = [RawAbs::default(); ABS_NUM];
        for (slot, &(x, y, z)) in abs.iter_mut().zip(values) {
            *slot = RawAbs { x, y, z };
        }
        RawPayload { abs }
    }

    #[test]
    fn test_event_struct_size_matches_c_layout() {
        // struct timeval, unsigned int, 128 byte union, tail padding
        let align = std::mem::align_of::<RawEvent>();
        let unpadded = std::mem::size_of::<libc::timeval>() + 4 + 128;
        assert_eq!(
            std::mem::size_of::<RawEvent>(),
            unpadded.div_ceil(align) * align
        );
    }

    #[test]
    fn test_decode_keys() {
        let payload = RawPayload {
            key: RawKey { code: 4, state: 1 },
        };
        assert_eq!(
            decode(EVENT_NUNCHUK_KEY, &payload),
            Event::Key(KeyEvent::new(KeySource::Nunchuk, 4, KeyState::Pressed))
        );
    }

    #[test]
    fn test_decode_nunchuk_move_splits_stick_and_accel() {
        let payload = abs_payload(&[(10, -10, 0), (1, 2, 3)]);
        assert_eq!(
            decode(EVENT_NUNCHUK_MOVE, &payload),
            Event::Motion(MotionSample::Nunchuk {
                accel: Axis3::new(1, 2, 3),
                stick: Axis2::new(10, -10),
            })
        );
    }

    #[test]
    fn test_decode_balance_board_uses_x_of_each_sensor() {
        let payload = abs_payload(&[(11, 0, 0), (22, 0, 0), (33, 0, 0), (44, 0, 0)]);
        assert_eq!(
            decode(EVENT_BALANCE_BOARD, &payload),
            Event::Motion(MotionSample::BalanceBoard {
                weights: [11, 22, 33, 44]
            })
        );
    }

    #[test]
    fn test_decode_guitar_and_drum_motion_is_unknown() {
        let payload = abs_payload(&[]);
        assert_eq!(decode(13, &payload), Event::Unknown { kind: 13 });
        assert_eq!(decode(15, &payload), Event::Unknown { kind: 15 });
    }

    #[test]
    fn test_missing_library_is_reported() {
        let result = XwiimoteTransport::load_from("/nonexistent/libxwiimote.so");
        assert!(matches!(result, Err(TransportError::LibraryUnavailable(_))));
    }
}
