//! Shortcut rules and the ordered rule store
//!
//! A rule binds a key combination to an ordered chain of attributes and
//! a fallback command. Rules are built once by the parser and are
//! immutable afterwards; the store preserves declaration order because
//! matching is first-match-wins.

pub mod parse;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};

use crate::event::{EventKind, EventSet};
use crate::mask::{KeyMask, MatchMode};

pub use parse::ParseError;

/// A side-effecting directive attached to a rule, executed in
/// declaration order when the rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Run the rule's command now (suppresses the fallback run)
    Exec,
    /// Grab the device for exclusive input
    Grab,
    /// Release an exclusive grab
    Ungrab,
    /// Arm ignore-release mode: snapshot the live mask as the ignore mask
    IgnoreRelease,
    /// Disarm ignore-release mode
    ReceiveRelease,
    /// Treat every held key as released
    ReleaseAllHeld,
    /// Inject a synthetic press; `None` means the triggering key
    SynthKey(Option<i32>),
    /// Inject a synthetic release
    SynthRelease(Option<i32>),
    /// Inject a synthetic repeat
    SynthRepeat(Option<i32>),
    /// Force a live-mask bit on, bypassing press semantics
    SetBit(i32),
    /// Force a live-mask bit off
    UnsetBit(i32),
    /// Turn a keyboard LED on
    LedOn(i32),
    /// Turn a keyboard LED off
    LedOff(i32),
}

impl Attribute {
    /// The configuration token naming this attribute
    pub fn token(&self) -> &'static str {
        match self {
            Attribute::Exec => "exec",
            Attribute::Grab => "grab",
            Attribute::Ungrab => "ungrab",
            Attribute::IgnoreRelease => "ignrel",
            Attribute::ReceiveRelease => "rcvrel",
            Attribute::ReleaseAllHeld => "allrel",
            Attribute::SynthKey(_) => "key",
            Attribute::SynthRelease(_) => "rel",
            Attribute::SynthRepeat(_) => "rep",
            Attribute::SetBit(_) => "set",
            Attribute::UnsetBit(_) => "unset",
            Attribute::LedOn(_) => "ledon",
            Attribute::LedOff(_) => "ledoff",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::SynthKey(Some(code))
            | Attribute::SynthRelease(Some(code))
            | Attribute::SynthRepeat(Some(code))
            | Attribute::SetBit(code)
            | Attribute::UnsetBit(code)
            | Attribute::LedOn(code)
            | Attribute::LedOff(code) => write!(f, "{}({})", self.token(), code),
            _ => f.write_str(self.token()),
        }
    }
}

/// Grab-state preconditions for a rule to match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gating {
    /// Match only while the device is grabbed
    pub require_grabbed: bool,
    /// Match only while the device is not grabbed
    pub require_ungrabbed: bool,
}

impl Gating {
    /// Whether the current grab state satisfies the preconditions
    pub fn allows(self, grabbed: bool) -> bool {
        if self.require_grabbed && !grabbed {
            return false;
        }
        if self.require_ungrabbed && grabbed {
            return false;
        }
        true
    }
}

/// One parsed configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// The key combination this rule is about
    pub keys: KeyMask,
    /// Event kinds the rule responds to
    pub events: EventSet,
    /// Grab-state preconditions
    pub gating: Gating,
    /// How `keys` is compared against the held keys
    pub match_mode: MatchMode,
    /// Ordered attribute chain, run on match
    pub attributes: Vec<Attribute>,
    /// Command run when no attribute already ran one
    pub command: String,
    /// `noexec`: never fall back on running the command
    pub suppress_fallback: bool,
}

/// The ordered rule store.
///
/// No deduplication and no index: a linear scan over at most a few
/// hundred rules is well below the cost of one keystroke.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    /// Find the first rule matching the held keys for this event kind.
    ///
    /// Declaration order decides ties; no match is the common case and
    /// not an error.
    pub fn find_match(&self, held: &KeyMask, kind: EventKind, grabbed: bool) -> Option<&Rule> {
        self.find_match_index(held, kind, grabbed)
            .map(|i| &self.rules[i])
    }

    /// Index variant of [`find_match`](Self::find_match) for callers
    /// that need to keep mutating their own state during execution
    pub fn find_match_index(&self, held: &KeyMask, kind: EventKind, grabbed: bool) -> Option<usize> {
        self.rules.iter().position(|rule| {
            rule.events.contains(kind)
                && rule.gating.allows(grabbed)
                && held.compare(&rule.keys, rule.match_mode)
        })
    }

    /// Parse rules from a line source.
    ///
    /// Malformed lines are discarded with a diagnostic; they never fail
    /// the load. `max_key` bounds the key codes a rule may name.
    pub fn from_reader<R: BufRead>(reader: R, max_key: u16) -> std::io::Result<Self> {
        let mut set = RuleSet::new();
        let mut discarded = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = idx + 1;
            match parse::parse_line(&line, lineno, max_key) {
                Ok(Some(rule)) => {
                    debug!(
                        "config line {}: {} : {} : {} attribute(s) : {}",
                        lineno,
                        rule.keys,
                        rule.events,
                        rule.attributes.len(),
                        rule.command
                    );
                    set.push(rule);
                }
                Ok(None) => {} // blank or comment-only
                Err(_) => discarded += 1,
            }
        }
        if discarded > 0 {
            info!("discarded {} malformed configuration line(s)", discarded);
        }
        Ok(set)
    }

    /// Load rules from a configuration file.
    ///
    /// An unopenable file is an error for the caller to handle; a file
    /// full of bad lines is not (it loads as fewer rules).
    pub fn load<P: AsRef<Path>>(path: P, max_key: u16) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let set = Self::from_reader(BufReader::new(file), max_key)?;
        debug!("loaded {} rule(s) from {}", set.len(), path.display());
        Ok(set)
    }
}
