//! Input-device boundary
//!
//! The engine talks to the keyboard through the [`Device`] trait so the
//! whole match/execute pipeline can run against a mock in tests. The
//! real implementation lives in [`evdev`] on Linux.

use std::io;

use thiserror::Error;

use crate::event::EventKind;

#[cfg(target_os = "linux")]
pub mod evdev;

#[cfg(target_os = "linux")]
pub use evdev::EvdevDevice;

/// A normalized key event as delivered to the engine.
///
/// The device layer guarantees `code <= max_key` and a recognized kind;
/// anything else surfaces as a [`DeviceError`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u16,
    pub kind: EventKind,
}

/// Error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Transport failure on the device node
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),
    /// A blocking read was interrupted by a signal
    #[error("device read interrupted")]
    Interrupted,
    /// The kernel delivered an event outside the protocol bounds
    #[error("invalid event from device: code = {code}, value = {value}")]
    InvalidEvent { code: u16, value: i32 },
    /// A rule asked to synthesize a key code the device cannot carry
    #[error("key code {0} not sendable")]
    BadCode(i32),
    /// The host lacks the event interface
    #[error("event interface not available: {0}")]
    Unsupported(String),
    /// Keyboard auto-detection found nothing usable
    #[error("could not detect a usable keyboard device")]
    NoKeyboard,
}

/// The contract the engine consumes.
///
/// `next_event` blocks; all other calls are synchronous one-shots whose
/// failures the engine logs and otherwise ignores.
pub trait Device {
    /// Highest key code this device can report
    fn max_key(&self) -> u16;

    /// Block until the next key event arrives
    fn next_event(&mut self) -> Result<KeyEvent, DeviceError>;

    /// Inject a synthetic key event, as if physically generated
    fn send_event(&mut self, code: i32, kind: EventKind) -> Result<(), DeviceError>;

    /// Switch a keyboard LED
    fn set_led(&mut self, led: i32, on: bool) -> Result<(), DeviceError>;

    /// Capture the device exclusively
    fn grab(&mut self) -> Result<(), DeviceError>;

    /// Release an exclusive capture
    fn ungrab(&mut self) -> Result<(), DeviceError>;
}
