//! Configuration-line grammar
//!
//! One rule per line:
//!
//! ```text
//! <keys> ':' <event-types> ':' <attributes> ':' <command>
//! ```
//!
//! - `<keys>`: key-code integers separated by `+`, `-`, `,` or
//!   whitespace (`29+56`, `29 56`, ...).
//! - `<event-types>`: any of `key`, `rep`, `rel` (case-insensitive,
//!   comma/space separated); blank means `key`.
//! - `<attributes>`: bare flags (`noexec`, `grabbed`, `ungrabbed`,
//!   `not`, `all`, `any`) and ordered directives (`exec`, `grab`,
//!   `ungrab`, `ignrel`, `rcvrel`, `allrel`, `key(N)`, `rel(N)`,
//!   `rep(N)`, `set(N)`, `unset(N)`, `ledon(N)`, `ledoff(N)`).
//! - `<command>`: the rest of the line, verbatim; `:` is ordinary text
//!   from here on.
//!
//! A malformed line is discarded with a diagnostic and parsing moves
//! on; a half-broken configuration file must never take the daemon
//! down with it.

use log::{debug, warn};
use thiserror::Error;

use crate::event::{EventKind, EventSet};
use crate::mask::{KeyMask, MatchMode};

use super::{Attribute, Gating, Rule};

/// Why a configuration line was discarded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer than three `:` delimiters before the line (or a comment) ended
    #[error("missing fields")]
    MissingFields,
    /// The key list contains something other than integers and separators
    #[error("invalid key field")]
    InvalidKeys,
    /// A key code above the device's key-code space
    #[error("key code {0} out of range")]
    KeyOutOfRange(i32),
    /// The event field named no recognizable event type
    #[error("invalid event type")]
    InvalidEventTypes,
}

/// Parse one configuration line.
///
/// Returns `Ok(None)` for blank and comment-only lines, `Ok(Some(rule))`
/// for a well-formed rule, and `Err` for a discarded line. Diagnostics
/// are logged here so every caller reports defects the same way.
pub fn parse_line(line: &str, lineno: usize, max_key: u16) -> Result<Option<Rule>, ParseError> {
    let text = line.trim_end_matches(['\n', '\r']);
    let trimmed = text.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    match parse_fields(text, lineno, max_key) {
        Ok(rule) => Ok(Some(rule)),
        Err(err) => {
            debug!("configuration line {}: {}", lineno, err);
            warn!("discarding configuration line {}: {}", lineno, text);
            Err(err)
        }
    }
}

fn parse_fields(text: &str, lineno: usize, max_key: u16) -> Result<Rule, ParseError> {
    let (keys_field, rest) = split_field(text)?;
    let (events_field, rest) = split_field(rest)?;
    let (attrs_field, command) = split_field(rest)?;

    let keys = parse_keys(keys_field, max_key)?;
    let events = parse_events(events_field, lineno)?;
    let (attributes, gating, match_mode, suppress_fallback) = parse_attrs(attrs_field, lineno);

    Ok(Rule {
        keys,
        events,
        gating,
        match_mode,
        attributes,
        command: command.to_string(),
        suppress_fallback,
    })
}

/// Split off one field at the next `:`. A `#` first means the line is
/// a trailing comment from here on, i.e. the field list ended early.
fn split_field(text: &str) -> Result<(&str, &str), ParseError> {
    for (i, c) in text.char_indices() {
        match c {
            ':' => return Ok((&text[..i], &text[i + 1..])),
            '#' => return Err(ParseError::MissingFields),
            _ => {}
        }
    }
    Err(ParseError::MissingFields)
}

fn parse_keys(field: &str, max_key: u16) -> Result<KeyMask, ParseError> {
    if !field
        .chars()
        .all(|c| c.is_ascii_digit() || c == '+' || c == '-' || c == ',' || c.is_whitespace())
    {
        return Err(ParseError::InvalidKeys);
    }

    let mut mask = KeyMask::new(max_key);
    for token in field.split(|c: char| c == '+' || c == '-' || c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let code: i32 = token.parse().map_err(|_| ParseError::InvalidKeys)?;
        mask.set(code, true)
            .map_err(|_| ParseError::KeyOutOfRange(code))?;
    }
    Ok(mask)
}

fn parse_events(field: &str, lineno: usize) -> Result<EventSet, ParseError> {
    let mut set = EventSet::empty();
    let mut saw_token = false;
    for token in field.split([',', ' ', '\t']) {
        if token.is_empty() {
            continue;
        }
        saw_token = true;
        match token.to_ascii_lowercase().as_str() {
            "key" => set.insert(EventKind::Press),
            "rep" => set.insert(EventKind::Repeat),
            "rel" => set.insert(EventKind::Release),
            other => debug!("configuration line {}: unknown event type `{}`", lineno, other),
        }
    }

    if set.is_empty() {
        if saw_token {
            // Every token was junk; there is nothing this rule could fire on
            return Err(ParseError::InvalidEventTypes);
        }
        set = EventSet::press_only();
    }
    Ok(set)
}

/// Parse the attribute field. Bad tokens are dropped individually; the
/// line survives.
fn parse_attrs(field: &str, lineno: usize) -> (Vec<Attribute>, Gating, MatchMode, bool) {
    let mut attributes = Vec::new();
    let mut gating = Gating::default();
    let mut suppress_fallback = false;
    let mut any = false;
    let mut all = false;
    let mut not = false;

    for token in field.split([',', ' ', '\t']) {
        if token.is_empty() {
            continue;
        }
        let (name, arg) = split_token(token);
        match name.to_ascii_lowercase().as_str() {
            // flag tokens
            "noexec" => suppress_fallback = true,
            "grabbed" => gating.require_grabbed = true,
            "ungrabbed" => gating.require_ungrabbed = true,
            "any" => any = true,
            "all" => all = true,
            "not" => not = true,

            // ordered directives
            "exec" => attributes.push(Attribute::Exec),
            "grab" => attributes.push(Attribute::Grab),
            "ungrab" => attributes.push(Attribute::Ungrab),
            "ignrel" => attributes.push(Attribute::IgnoreRelease),
            "rcvrel" => attributes.push(Attribute::ReceiveRelease),
            "allrel" => attributes.push(Attribute::ReleaseAllHeld),
            // a negative or absent operand means "the triggering key"
            "key" => attributes.push(Attribute::SynthKey(arg.filter(|c| *c >= 0))),
            "rel" => attributes.push(Attribute::SynthRelease(arg.filter(|c| *c >= 0))),
            "rep" => attributes.push(Attribute::SynthRepeat(arg.filter(|c| *c >= 0))),
            "set" => match arg {
                Some(code) => attributes.push(Attribute::SetBit(code)),
                None => debug!(
                    "configuration line {}: `set` needs a key code, token dropped",
                    lineno
                ),
            },
            "unset" => match arg {
                Some(code) => attributes.push(Attribute::UnsetBit(code)),
                None => debug!(
                    "configuration line {}: `unset` needs a key code, token dropped",
                    lineno
                ),
            },
            "ledon" => match arg.filter(|c| *c >= 0) {
                Some(led) => attributes.push(Attribute::LedOn(led)),
                None => debug!(
                    "configuration line {}: `ledon` needs a non-negative LED number, token dropped",
                    lineno
                ),
            },
            "ledoff" => match arg.filter(|c| *c >= 0) {
                Some(led) => attributes.push(Attribute::LedOff(led)),
                None => debug!(
                    "configuration line {}: `ledoff` needs a non-negative LED number, token dropped",
                    lineno
                ),
            },
            other => debug!(
                "configuration line {}: unknown attribute `{}`, token dropped",
                lineno, other
            ),
        }
    }

    // Flag precedence kept for compatibility with existing configurations
    let match_mode = if not {
        MatchMode::Not
    } else if all {
        MatchMode::All
    } else if any {
        MatchMode::Any
    } else {
        MatchMode::Exact
    };

    (attributes, gating, match_mode, suppress_fallback)
}

/// Split `name(arg)` into its parts; a malformed argument reads as absent.
fn split_token(token: &str) -> (&str, Option<i32>) {
    match token.split_once('(') {
        Some((name, rest)) => {
            let arg = rest.strip_suffix(')').and_then(|s| s.trim().parse().ok());
            (name, arg)
        }
        None => (token, None),
    }
}
