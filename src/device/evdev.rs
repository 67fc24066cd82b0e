//! Linux evdev keyboard device
//!
//! Reads raw `input_event` structs straight from `/dev/input/eventN`,
//! auto-detecting the keyboard through procfs when no device node was
//! given. Grabbing uses the `EVIOCGRAB` ioctl; synthetic events and LED
//! changes are plain writes of `input_event` structs back to the node.
//!
//! Waiting is `poll(2)` on the device node plus an optional wake pipe.
//! Signal handlers installed with `SA_RESTART` transparently restart a
//! plain blocking `read`, so the daemon polls instead and has its
//! handlers write a byte into the pipe; either source of readiness ends
//! the wait.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use log::{debug, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::{Device, DeviceError, KeyEvent};
use crate::event::EventKind;

const PROC_HANDLERS: &str = "/proc/bus/input/handlers";
const PROC_DEVICES: &str = "/proc/bus/input/devices";
const DEV_NODE_PREFIX: &str = "/dev/input/event";

const EV_KEY: u16 = 0x01;
const EV_LED: u16 = 0x11;

/// Highest key code the kernel input layer reports (KEY_MAX)
pub const KEY_MAX: u16 = 0x2ff;

/// A raw input event as read from the kernel
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    event_type: u16,
    code: u16,
    value: i32,
}

const INPUT_EVENT_SIZE: usize = mem::size_of::<InputEvent>();

// EVIOCGRAB = _IOW('E', 0x90, int)
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

/// Find the event node of the first device handled by both the console
/// keyboard driver and evdev.
///
/// `/proc/bus/input/devices` lists one `H: Handlers=` line per device;
/// a keyboard shows up as `H: Handlers=sysrq kbd event3 leds`.
fn detect_keyboard() -> Result<PathBuf, DeviceError> {
    let handlers = fs::read_to_string(PROC_HANDLERS)
        .map_err(|e| DeviceError::Unsupported(format!("{}: {}", PROC_HANDLERS, e)))?;
    if !handlers.lines().any(|l| l.contains("Name=evdev")) {
        return Err(DeviceError::Unsupported(
            "no evdev handler registered".to_string(),
        ));
    }

    let devices = fs::read_to_string(PROC_DEVICES)
        .map_err(|e| DeviceError::Unsupported(format!("{}: {}", PROC_DEVICES, e)))?;
    for line in devices.lines() {
        let Some(list) = line.strip_prefix("H: Handlers=") else {
            continue;
        };
        let tokens: Vec<&str> = list.split_whitespace().collect();
        if !tokens.contains(&"kbd") {
            continue;
        }
        if let Some(n) = tokens.iter().find_map(|t| {
            t.strip_prefix("event")
                .and_then(|n| n.parse::<u32>().ok())
        }) {
            debug!("detected keyboard device event{}", n);
            return Ok(PathBuf::from(format!("{}{}", DEV_NODE_PREFIX, n)));
        }
    }

    Err(DeviceError::NoKeyboard)
}

/// Block until `device` has data or the wake pipe fires.
///
/// A readable wake pipe is drained and reported as `Interrupted`, as is
/// `EINTR` from the poll itself (unlike `read`, `poll` is never
/// restarted by `SA_RESTART`).
fn await_readable(
    device: BorrowedFd<'_>,
    wake: Option<BorrowedFd<'_>>,
) -> Result<(), DeviceError> {
    let mut fds = Vec::with_capacity(2);
    fds.push(PollFd::new(device, PollFlags::POLLIN));
    if let Some(w) = wake {
        fds.push(PollFd::new(w, PollFlags::POLLIN));
    }
    match poll(&mut fds, PollTimeout::NONE) {
        Err(Errno::EINTR) => return Err(DeviceError::Interrupted),
        Err(e) => return Err(DeviceError::Io(io::Error::from(e))),
        Ok(_) => {}
    }
    if let Some(pipe) = fds.get(1) {
        let fired = pipe.revents().is_some_and(|r| !r.is_empty());
        if fired {
            if let Some(w) = wake {
                // One read is enough: poll reported data, and a 64-byte
                // buffer swallows any queued wake bytes in one call
                let mut sink = [0u8; 64];
                let _ = nix::unistd::read(w.as_raw_fd(), &mut sink);
            }
            return Err(DeviceError::Interrupted);
        }
    }
    Ok(())
}

/// The real keyboard, opened read-write for event injection and LEDs
pub struct EvdevDevice {
    file: File,
    path: PathBuf,
    grabbed: bool,
    wake: Option<OwnedFd>,
}

impl EvdevDevice {
    /// Open a specific device node
    pub fn open(path: PathBuf) -> Result<Self, DeviceError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!("opened keyboard device {}", path.display());
        Ok(Self {
            file,
            path,
            grabbed: false,
            wake: None,
        })
    }

    /// Auto-detect the keyboard via procfs and open it
    pub fn auto_detect() -> Result<Self, DeviceError> {
        Self::open(detect_keyboard()?)
    }

    /// Install the read end of a wake pipe. Whenever the pipe becomes
    /// readable, a pending `next_event` returns `Interrupted` instead
    /// of staying blocked until the next keystroke.
    pub fn set_wake(&mut self, wake: OwnedFd) {
        self.wake = Some(wake);
    }

    /// The device node in use
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn write_event(&mut self, event_type: u16, code: i32, value: i32) -> Result<(), DeviceError> {
        let code = u16::try_from(code).map_err(|_| DeviceError::BadCode(code))?;
        let ev = InputEvent {
            tv_sec: 0,
            tv_usec: 0,
            event_type,
            code,
            value,
        };
        let bytes: [u8; INPUT_EVENT_SIZE] = unsafe { mem::transmute(ev) };
        self.file.write_all(&bytes)?;
        Ok(())
    }
}

impl Device for EvdevDevice {
    fn max_key(&self) -> u16 {
        KEY_MAX
    }

    fn next_event(&mut self) -> Result<KeyEvent, DeviceError> {
        let mut buf = [0u8; INPUT_EVENT_SIZE];
        loop {
            await_readable(self.file.as_fd(), self.wake.as_ref().map(|w| w.as_fd()))?;
            match self.file.read(&mut buf) {
                Ok(0) => {
                    return Err(DeviceError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "device closed",
                    )))
                }
                Ok(n) if n == INPUT_EVENT_SIZE => {}
                Ok(n) => {
                    return Err(DeviceError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("short read of {} bytes", n),
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    // Signal landed between the poll and the read
                    return Err(DeviceError::Interrupted);
                }
                Err(e) => return Err(DeviceError::Io(e)),
            }

            let ev: InputEvent = unsafe { std::ptr::read(buf.as_ptr() as *const InputEvent) };
            if ev.event_type != EV_KEY {
                continue;
            }

            let kind = EventKind::from_wire(ev.value);
            match kind {
                Some(kind) if ev.code <= KEY_MAX => {
                    return Ok(KeyEvent {
                        code: ev.code,
                        kind,
                    })
                }
                _ => {
                    return Err(DeviceError::InvalidEvent {
                        code: ev.code,
                        value: ev.value,
                    })
                }
            }
        }
    }

    fn send_event(&mut self, code: i32, kind: EventKind) -> Result<(), DeviceError> {
        self.write_event(EV_KEY, code, kind.wire_value())
    }

    fn set_led(&mut self, led: i32, on: bool) -> Result<(), DeviceError> {
        self.write_event(EV_LED, led, on as i32)
    }

    fn grab(&mut self) -> Result<(), DeviceError> {
        unsafe { eviocgrab(self.file.as_raw_fd(), 1) }
            .map_err(|e| DeviceError::Io(io::Error::from_raw_os_error(e as i32)))?;
        self.grabbed = true;
        debug!("grabbed {}", self.path.display());
        Ok(())
    }

    fn ungrab(&mut self) -> Result<(), DeviceError> {
        unsafe { eviocgrab(self.file.as_raw_fd(), 0) }
            .map_err(|e| DeviceError::Io(io::Error::from_raw_os_error(e as i32)))?;
        self.grabbed = false;
        debug!("ungrabbed {}", self.path.display());
        Ok(())
    }
}

impl Drop for EvdevDevice {
    fn drop(&mut self) {
        // The kernel drops the grab with the fd, but be explicit so a
        // crash path never leaves the console dead
        if self.grabbed {
            if let Err(e) = unsafe { eviocgrab(self.file.as_raw_fd(), 0) } {
                warn!("failed to release grab on {}: {}", self.path.display(), e);
            }
        }
    }
}
