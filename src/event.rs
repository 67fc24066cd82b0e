//! Key event kinds and event-kind sets

use std::fmt;

/// Kind of a single key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Key went down
    Press,
    /// Key is auto-repeating while held
    Repeat,
    /// Key came back up
    Release,
}

impl EventKind {
    /// The evdev `value` field for this kind
    pub fn wire_value(self) -> i32 {
        match self {
            EventKind::Release => 0,
            EventKind::Press => 1,
            EventKind::Repeat => 2,
        }
    }

    /// Map an evdev `value` field back to a kind
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(EventKind::Release),
            1 => Some(EventKind::Press),
            2 => Some(EventKind::Repeat),
            _ => None,
        }
    }

    /// The configuration-file token for this kind
    pub fn token(self) -> &'static str {
        match self {
            EventKind::Press => "key",
            EventKind::Repeat => "rep",
            EventKind::Release => "rel",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A set of event kinds a rule responds to.
///
/// A rule may match several kinds at once (e.g. press and repeat for
/// a volume key that should keep firing while held).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u8);

impl EventSet {
    const PRESS: u8 = 1 << 0;
    const REPEAT: u8 = 1 << 1;
    const RELEASE: u8 = 1 << 2;

    /// The empty set
    pub fn empty() -> Self {
        Self(0)
    }

    /// The default for rules that leave the event field blank
    pub fn press_only() -> Self {
        let mut set = Self::empty();
        set.insert(EventKind::Press);
        set
    }

    fn bit(kind: EventKind) -> u8 {
        match kind {
            EventKind::Press => Self::PRESS,
            EventKind::Repeat => Self::REPEAT,
            EventKind::Release => Self::RELEASE,
        }
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= Self::bit(kind);
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in [EventKind::Press, EventKind::Repeat, EventKind::Release] {
            if self.contains(kind) {
                if !first {
                    write!(f, ",")?;
                }
                f.write_str(kind.token())?;
                first = false;
            }
        }
        Ok(())
    }
}
