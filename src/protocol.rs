use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of simultaneously open sessions
pub const MAX_DEVICES: usize = 10;

/// Number of indicator LEDs on a Wii Remote
pub const LED_COUNT: u8 = 4;

bitflags! {
    /// Sub-device interfaces of a controller.
    ///
    /// Bit values match `enum xwii_iface_type` so masks can cross the
    /// transport boundary unchanged.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Core buttons
        const CORE               = 0x0000_0001;
        /// Primary accelerometer
        const ACCEL              = 0x0000_0002;
        /// IR camera
        const IR                 = 0x0000_0004;
        /// Motion Plus gyroscope
        const MOTION_PLUS        = 0x0000_0100;
        const NUNCHUK            = 0x0000_0200;
        const CLASSIC_CONTROLLER = 0x0000_0400;
        const BALANCE_BOARD      = 0x0000_0800;
        const PRO_CONTROLLER     = 0x0000_1000;
        const DRUMS              = 0x0000_2000;
        const GUITAR             = 0x0000_4000;
        /// Request write access when opening (LEDs, rumble)
        const WRITABLE           = 0x0001_0000;
    }
}

/// Opaque device path as produced by enumeration (a sysfs path for
/// libxwiimote).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which sub-device produced a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Core,
    ClassicController,
    ProController,
    Nunchuk,
    Drums,
    Guitar,
}

/// Key transition as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Released,
    Pressed,
    /// Auto-repeat while held
    Repeated,
}

impl KeyState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => KeyState::Released,
            1 => KeyState::Pressed,
            _ => KeyState::Repeated,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            KeyState::Released => 0,
            KeyState::Pressed => 1,
            KeyState::Repeated => 2,
        }
    }
}

/// Named key codes (`enum xwii_event_keys`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    A,
    B,
    Home,
    Minus,
    Plus,
    One,
    Two,
    X,
    Y,
    TL,
    TR,
    ZL,
    ZR,
    ThumbL,
    ThumbR,
    C,
    Z,
    StrumBarUp,
    StrumBarDown,
    FretFarUp,
    FretUp,
    FretMid,
    FretLow,
    FretFarLow,
}

impl Key {
    const ALL: [Key; 28] = [
        Key::Left,
        Key::Right,
        Key::Up,
        Key::Down,
        Key::A,
        Key::B,
        Key::Home,
        Key::Minus,
        Key::Plus,
        Key::One,
        Key::Two,
        Key::X,
        Key::Y,
        Key::TL,
        Key::TR,
        Key::ZL,
        Key::ZR,
        Key::ThumbL,
        Key::ThumbR,
        Key::C,
        Key::Z,
        Key::StrumBarUp,
        Key::StrumBarDown,
        Key::FretFarUp,
        Key::FretUp,
        Key::FretMid,
        Key::FretLow,
        Key::FretFarLow,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn to_code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Key::Left => "left",
            Key::Right => "right",
            Key::Up => "up",
            Key::Down => "down",
            Key::A => "a",
            Key::B => "b",
            Key::Home => "home",
            Key::Minus => "minus",
            Key::Plus => "plus",
            Key::One => "1",
            Key::Two => "2",
            Key::X => "x",
            Key::Y => "y",
            Key::TL => "tl",
            Key::TR => "tr",
            Key::ZL => "zl",
            Key::ZR => "zr",
            Key::ThumbL => "thumbl",
            Key::ThumbR => "thumbr",
            Key::C => "c",
            Key::Z => "z",
            Key::StrumBarUp => "strum-up",
            Key::StrumBarDown => "strum-down",
            Key::FretFarUp => "fret-far-up",
            Key::FretUp => "fret-up",
            Key::FretMid => "fret-mid",
            Key::FretLow => "fret-low",
            Key::FretFarLow => "fret-far-low",
        }
    }
}

/// A single discrete key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub source: KeySource,
    pub code: u32,
    pub state: KeyState,
}

impl KeyEvent {
    pub fn new(source: KeySource, code: u32, state: KeyState) -> Self {
        Self {
            source,
            code,
            state,
        }
    }

    pub fn key(&self) -> Option<Key> {
        Key::from_code(self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Axis2 {
    pub x: i32,
    pub y: i32,
}

impl Axis2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Axis3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Axis3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// One decoded sample of a motion channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum MotionSample {
    Accel(Axis3),
    /// Up to four tracked IR sources
    Ir { points: [Axis2; 4] },
    MotionPlus(Axis3),
    Nunchuk { accel: Axis3, stick: Axis2 },
    /// Left and right stick of a Classic or Pro controller
    ControllerSticks { sticks: [Axis2; 2] },
    /// Four corner weight sensors
    BalanceBoard { weights: [i32; 4] },
}

/// Closed set of events the transport decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Key(KeyEvent),
    /// Available interfaces changed on an open device
    Watch,
    /// The device was removed
    Gone,
    Motion(MotionSample),
    /// Anything the dispatcher does not interpret (guitar and drum motion)
    Unknown { kind: u32 },
}
