//! In-process devices.
//!
//! [`VirtualTransport`] behaves like a driver with scriptable devices. Tests
//! keep a [`VirtualDevice`] handle to queue events, inspect LEDs and rumble,
//! and inject failures while a session owns the connection. The monitor
//! uses the same transport to replay JSON Lines scripts without hardware.

use super::{Connection, Transport, TransportError};
use crate::protocol::{
    Capabilities, DeviceId, Event, Key, KeyEvent, KeySource, KeyState, LED_COUNT, MotionSample,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Failures {
    wait: VecDeque<io::ErrorKind>,
    dispatch: usize,
    led_read: Option<u8>,
    led_write: Option<u8>,
    battery: bool,
    rumble: bool,
    open: bool,
    watch: bool,
}

#[derive(Debug)]
struct DeviceState {
    present: bool,
    available: Capabilities,
    opened: Capabilities,
    watching: bool,
    connections: usize,
    queue: VecDeque<Event>,
    battery: u8,
    leds: [bool; LED_COUNT as usize],
    rumble: bool,
    fail: Failures,
}

/// Handle to one virtual device, shared with any connection opened on it
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    id: DeviceId,
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    pub fn new(path: impl Into<String>, available: Capabilities) -> Self {
        Self {
            id: DeviceId(path.into()),
            state: Arc::new(Mutex::new(DeviceState {
                present: true,
                available,
                opened: Capabilities::empty(),
                watching: false,
                connections: 0,
                queue: VecDeque::new(),
                battery: 100,
                leds: [false; LED_COUNT as usize],
                rumble: false,
                fail: Failures::default(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Queue a raw event
    pub fn push(&self, event: Event) {
        self.state().queue.push_back(event);
    }

    pub fn key(&self, source: KeySource, code: u32, state: KeyState) {
        self.push(Event::Key(KeyEvent::new(source, code, state)));
    }

    /// Queue a core key press
    pub fn press(&self, key: Key) {
        self.key(KeySource::Core, key.to_code(), KeyState::Pressed);
    }

    /// Queue a core key release
    pub fn release(&self, key: Key) {
        self.key(KeySource::Core, key.to_code(), KeyState::Released);
    }

    pub fn motion(&self, sample: MotionSample) {
        self.push(Event::Motion(sample));
    }

    /// Change the offered interfaces; watchers get a hotplug notification
    pub fn hotplug(&self, available: Capabilities) {
        let mut state = self.state();
        state.available = available;
        state.opened &= available | Capabilities::WRITABLE;
        if state.watching {
            state.queue.push_back(Event::Watch);
        }
    }

    /// Remove the device. Watchers get a removal notification and it
    /// disappears from enumeration.
    pub fn disconnect(&self) {
        let mut state = self.state();
        state.present = false;
        if state.watching {
            state.queue.push_back(Event::Gone);
        }
    }

    pub fn reconnect(&self) {
        let mut state = self.state();
        state.present = true;
        state.queue.clear();
    }

    pub fn set_battery(&self, capacity: u8) {
        self.state().battery = capacity;
    }

    pub fn leds(&self) -> [bool; LED_COUNT as usize] {
        self.state().leds
    }

    pub fn rumbling(&self) -> bool {
        self.state().rumble
    }

    pub fn opened(&self) -> Capabilities {
        self.state().opened
    }

    pub fn is_watched(&self) -> bool {
        self.state().watching
    }

    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Number of live connections to this device
    pub fn connections(&self) -> usize {
        self.state().connections
    }

    /// The next wait on the descriptor fails with `kind`
    pub fn fail_next_wait(&self, kind: io::ErrorKind) {
        self.state().fail.wait.push_back(kind);
    }

    /// The next dispatch returns a decode error
    pub fn fail_next_dispatch(&self) {
        self.state().fail.dispatch += 1;
    }

    pub fn fail_led_read(&self, led: Option<u8>) {
        self.state().fail.led_read = led;
    }

    pub fn fail_led_write(&self, led: Option<u8>) {
        self.state().fail.led_write = led;
    }

    pub fn fail_battery(&self, fail: bool) {
        self.state().fail.battery = fail;
    }

    pub fn fail_rumble(&self, fail: bool) {
        self.state().fail.rumble = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail.open = fail;
    }

    pub fn fail_watch(&self, fail: bool) {
        self.state().fail.watch = fail;
    }
}

/// One line of a replay script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Declare a device; enumeration order follows declaration order
    Device {
        path: String,
        capabilities: Capabilities,
        #[serde(default)]
        battery: Option<u8>,
    },
    /// Queue an event on a declared device
    Event { device: String, event: Event },
}

/// Transport over [`VirtualDevice`]s
#[derive(Debug, Clone, Default)]
pub struct VirtualTransport {
    devices: Arc<Mutex<Vec<VirtualDevice>>>,
    fail_enumeration: Arc<Mutex<bool>>,
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, Vec<VirtualDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, device: VirtualDevice) {
        self.devices().push(device);
    }

    /// Create, register and return a device
    pub fn add_device(&self, path: impl Into<String>, available: Capabilities) -> VirtualDevice {
        let device = VirtualDevice::new(path, available);
        self.add(device.clone());
        device
    }

    pub fn device(&self, path: &str) -> Option<VirtualDevice> {
        self.devices().iter().find(|d| d.id.as_str() == path).cloned()
    }

    pub fn fail_enumeration(&self, fail: bool) {
        *self.fail_enumeration.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Build a transport from a JSON Lines script. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_script(reader: impl BufRead) -> Result<Self, TransportError> {
        let transport = Self::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| TransportError::Script {
                line: line_no,
                message: e.to_string(),
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let step: ScriptStep =
                serde_json::from_str(trimmed).map_err(|e| TransportError::Script {
                    line: line_no,
                    message: e.to_string(),
                })?;

            match step {
                ScriptStep::Device {
                    path,
                    capabilities,
                    battery,
                } => {
                    let device = transport.add_device(path, capabilities);
                    if let Some(capacity) = battery {
                        device.set_battery(capacity);
                    }
                }
                ScriptStep::Event { device, event } => {
                    let target = transport.device(&device).ok_or_else(|| TransportError::Script {
                        line: line_no,
                        message: format!("unknown device {}", device),
                    })?;
                    target.push(event);
                }
            }
        }

        debug!("Loaded replay script with {} device(s)", transport.devices().len());
        Ok(transport)
    }

    pub fn load_script(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| TransportError::Os {
            op: "open replay script",
            source,
        })?;
        Self::from_script(io::BufReader::new(file))
    }
}

impl Transport for VirtualTransport {
    type Connection = VirtualConnection;
    type Monitor = std::vec::IntoIter<DeviceId>;

    fn enumerate(&self) -> Result<Self::Monitor, TransportError> {
        if *self.fail_enumeration.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Enumeration);
        }

        let ids: Vec<DeviceId> = self
            .devices()
            .iter()
            .filter(|d| d.state().present)
            .map(|d| d.id.clone())
            .collect();
        Ok(ids.into_iter())
    }

    fn connect(&self, id: &DeviceId) -> Result<Self::Connection, TransportError> {
        let device = self
            .device(id.as_str())
            .filter(|d| d.state().present)
            .ok_or(TransportError::Disconnected)?;

        VirtualConnection::new(device)
    }
}

/// Connection to a [`VirtualDevice`].
///
/// Its descriptor is an eventfd that stays signalled, so waits never block
/// and an empty queue surfaces as "no event".
#[derive(Debug)]
pub struct VirtualConnection {
    device: VirtualDevice,
    ready: OwnedFd,
}

impl VirtualConnection {
    fn new(device: VirtualDevice) -> Result<Self, TransportError> {
        let fd = unsafe { libc::eventfd(1, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(TransportError::Os {
                op: "eventfd",
                source: io::Error::last_os_error(),
            });
        }
        let ready = unsafe { OwnedFd::from_raw_fd(fd) };

        device.state().connections += 1;
        Ok(Self { device, ready })
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        let mut state = self.device.state();
        state.connections = state.connections.saturating_sub(1);
        if state.connections == 0 {
            state.opened = Capabilities::empty();
            state.watching = false;
        }
    }
}

impl Connection for VirtualConnection {
    fn descriptor(&self) -> RawFd {
        self.ready.as_raw_fd()
    }

    fn available(&self) -> Capabilities {
        self.device.state().available
    }

    fn opened(&self) -> Capabilities {
        self.device.state().opened
    }

    fn open(&mut self, ifaces: Capabilities) -> Result<(), TransportError> {
        let mut state = self.device.state();
        if state.fail.open {
            return Err(TransportError::from_errno("open", -libc::EIO));
        }
        if !state.present {
            return Err(TransportError::Disconnected);
        }
        let granted = ifaces & (state.available | Capabilities::WRITABLE);
        state.opened |= granted;
        Ok(())
    }

    fn close(&mut self, ifaces: Capabilities) {
        self.device.state().opened.remove(ifaces);
    }

    fn watch(&mut self, enable: bool) -> Result<(), TransportError> {
        let mut state = self.device.state();
        if state.fail.watch {
            return Err(TransportError::from_errno("watch", -libc::EOPNOTSUPP));
        }
        state.watching = enable;
        Ok(())
    }

    fn dispatch(&mut self) -> Result<Option<Event>, TransportError> {
        let mut state = self.device.state();
        if state.fail.dispatch > 0 {
            state.fail.dispatch -= 1;
            return Err(TransportError::from_errno("dispatch", -libc::EIO));
        }
        let event = state.queue.pop_front();
        trace!("Virtual dispatch on {}: {:?}", self.device.id, event);
        Ok(event)
    }

    fn wait_readable(&mut self) -> io::Result<()> {
        let injected = self.device.state().fail.wait.pop_front();
        if let Some(kind) = injected {
            return Err(io::Error::from(kind));
        }
        super::wait_readable(self.descriptor())
    }

    fn battery(&mut self) -> Result<u8, TransportError> {
        let state = self.device.state();
        if state.fail.battery {
            return Err(TransportError::from_errno("battery", -libc::EIO));
        }
        Ok(state.battery)
    }

    fn led(&mut self, led: u8) -> Result<bool, TransportError> {
        let state = self.device.state();
        if state.fail.led_read == Some(led) {
            return Err(TransportError::from_errno("led", -libc::EIO));
        }
        led_slot(led).map(|idx| state.leds[idx])
    }

    fn set_led(&mut self, led: u8, on: bool) -> Result<(), TransportError> {
        let mut state = self.device.state();
        if state.fail.led_write == Some(led) {
            return Err(TransportError::from_errno("set_led", -libc::EIO));
        }
        if !state.opened.contains(Capabilities::WRITABLE) {
            return Err(TransportError::from_errno("set_led", -libc::EPERM));
        }
        let idx = led_slot(led)?;
        state.leds[idx] = on;
        Ok(())
    }

    fn rumble(&mut self, on: bool) -> Result<(), TransportError> {
        let mut state = self.device.state();
        if state.fail.rumble {
            return Err(TransportError::from_errno("rumble", -libc::EIO));
        }
        state.rumble = on;
        Ok(())
    }
}

fn led_slot(led: u8) -> Result<usize, TransportError> {
    if (1..=LED_COUNT).contains(&led) {
        Ok(usize::from(led - 1))
    } else {
        Err(TransportError::from_errno("led", -libc::EINVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_enumeration_skips_removed_devices() {
        let transport = VirtualTransport::new();
        let first = transport.add_device("/sys/wiimote/0", Capabilities::CORE);
        transport.add_device("/sys/wiimote/1", Capabilities::CORE);

        first.disconnect();

        let ids: Vec<_> = transport.enumerate().unwrap().collect();
        assert_eq!(ids, vec![DeviceId::from("/sys/wiimote/1")]);
    }

    #[test]
    fn test_connection_drop_releases_device() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/wiimote/0", Capabilities::CORE);

        let mut conn = transport.connect(device.id()).unwrap();
        conn.open(Capabilities::CORE | Capabilities::WRITABLE).unwrap();
        assert_eq!(device.connections(), 1);
        assert!(device.opened().contains(Capabilities::WRITABLE));

        drop(conn);
        assert_eq!(device.connections(), 0);
        assert!(device.opened().is_empty());
    }

    #[test]
    fn test_open_only_grants_available_interfaces() {
        let transport = VirtualTransport::new();
        let device =
            transport.add_device("/sys/wiimote/0", Capabilities::CORE | Capabilities::ACCEL);

        let mut conn = transport.connect(device.id()).unwrap();
        conn.open(Capabilities::all()).unwrap();
        assert_eq!(
            conn.opened(),
            Capabilities::CORE | Capabilities::ACCEL | Capabilities::WRITABLE
        );
    }

    #[test]
    fn test_hotplug_only_notifies_watchers() {
        let transport = VirtualTransport::new();
        let device = transport.add_device("/sys/wiimote/0", Capabilities::CORE);
        let mut conn = transport.connect(device.id()).unwrap();

        device.hotplug(Capabilities::CORE | Capabilities::NUNCHUK);
        assert_eq!(conn.dispatch().unwrap(), None);

        conn.watch(true).unwrap();
        device.hotplug(Capabilities::CORE);
        assert_eq!(conn.dispatch().unwrap(), Some(Event::Watch));
    }

    #[test]
    fn test_script_loading() {
        let script = r#"
# one remote with a nunchuk
{"step":"device","path":"/sys/wiimote/0","capabilities":"CORE | NUNCHUK","battery":42}
{"step":"event","device":"/sys/wiimote/0","event":{"type":"key","source":"core","code":4,"state":"pressed"}}
"#;
        let transport = VirtualTransport::from_script(Cursor::new(script)).unwrap();
        let device = transport.device("/sys/wiimote/0").unwrap();
        assert_eq!(device.queued(), 1);

        let mut conn = transport.connect(device.id()).unwrap();
        assert_eq!(conn.battery().unwrap(), 42);
        assert_eq!(conn.available(), Capabilities::CORE | Capabilities::NUNCHUK);
    }

    #[test]
    fn test_script_rejects_unknown_device() {
        let script = r#"{"step":"event","device":"/nope","event":{"type":"gone"}}"#;
        let err = VirtualTransport::from_script(Cursor::new(script)).unwrap_err();
        assert!(matches!(err, TransportError::Script { line: 1, .. }));
    }
}
