//! Fixed-width key bitmask over the device's key-code space
//!
//! Two long-lived masks drive the daemon: the *live mask* of currently
//! held keys and the *ignore mask* of keys exempted from release-clearing
//! while ignore-release mode is armed. Both are plain [`KeyMask`] values
//! owned by the engine.

use std::fmt;
use thiserror::Error;

/// Error type for mask operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    /// Bit index outside the device's key-code space
    #[error("key code {bit} out of range (max {max})")]
    OutOfRange { bit: i32, max: u16 },
}

/// How a rule's key mask is compared against the live mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Held keys must equal the rule keys exactly
    #[default]
    Exact,
    /// At least one rule key is held
    Any,
    /// Every rule key is held (extra held keys allowed)
    All,
    /// At least one held key is not a rule key
    Not,
}

/// A fixed-size bit vector indexed by key code.
///
/// The size is fixed at creation: `ceil((max_key + 1) / 8)` bytes.
/// Out-of-range indices are rejected, never silently ignored; a bad
/// index from a rule must not crash the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMask {
    bytes: Vec<u8>,
    max_key: u16,
}

impl KeyMask {
    /// Create a zero-filled mask covering key codes `0..=max_key`
    pub fn new(max_key: u16) -> Self {
        let size = (max_key as usize + 1).div_ceil(8);
        Self {
            bytes: vec![0u8; size],
            max_key,
        }
    }

    /// Highest representable key code
    pub fn max_key(&self) -> u16 {
        self.max_key
    }

    fn check(&self, bit: i32) -> Result<usize, MaskError> {
        if bit < 0 || bit > self.max_key as i32 {
            return Err(MaskError::OutOfRange {
                bit,
                max: self.max_key,
            });
        }
        Ok(bit as usize)
    }

    /// Set or clear a single bit
    pub fn set(&mut self, bit: i32, value: bool) -> Result<(), MaskError> {
        let bit = self.check(bit)?;
        let byte = 1u8 << (bit % 8);
        if value {
            self.bytes[bit / 8] |= byte;
        } else {
            self.bytes[bit / 8] &= !byte;
        }
        Ok(())
    }

    /// Read a single bit
    pub fn get(&self, bit: i32) -> Result<bool, MaskError> {
        let bit = self.check(bit)?;
        Ok(self.bytes[bit / 8] & (1 << (bit % 8)) != 0)
    }

    /// Zero every bit
    pub fn clear_all(&mut self) {
        self.bytes.fill(0);
    }

    /// Overwrite this mask with the contents of another.
    ///
    /// Both masks are created from the same `max_key`, so the sizes
    /// always agree in practice; a shorter source leaves the tail
    /// untouched rather than panicking.
    pub fn copy_from(&mut self, other: &KeyMask) {
        let n = self.bytes.len().min(other.bytes.len());
        self.bytes[..n].copy_from_slice(&other.bytes[..n]);
    }

    /// True if no bit is set
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Compare this mask (the held keys) against a rule mask
    pub fn compare(&self, other: &KeyMask, mode: MatchMode) -> bool {
        let pairs = self.bytes.iter().zip(other.bytes.iter());
        match mode {
            // At least one held bit is not set in the rule mask
            MatchMode::Not => pairs.map(|(a, b)| a & !b).any(|v| v != 0),
            // Every rule bit is also held
            MatchMode::All => pairs.map(|(a, b)| (a & b, b)).all(|(v, b)| v == *b),
            // Any rule bit is held
            MatchMode::Any => pairs.map(|(a, b)| a & b).any(|v| v != 0),
            MatchMode::Exact => self.bytes == other.bytes,
        }
    }

    /// Iterate over the set bit indices in ascending order
    pub fn iter_set(&self) -> impl Iterator<Item = u16> + '_ {
        (0..=self.max_key).filter(|&b| self.bytes[b as usize / 8] & (1 << (b % 8)) != 0)
    }
}

/// Renders the set key codes ascending, `+`-joined: `29+56+32`
impl fmt::Display for KeyMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for bit in self.iter_set() {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{}", bit)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a mask with the given bits set
    fn mask_of(max_key: u16, bits: &[i32]) -> KeyMask {
        let mut mask = KeyMask::new(max_key);
        for &b in bits {
            mask.set(b, true).expect("valid bit");
        }
        mask
    }

    #[test]
    fn set_get_roundtrip() {
        let mut mask = KeyMask::new(255);
        for bit in [0, 1, 7, 8, 100, 255] {
            assert_eq!(mask.get(bit), Ok(false));
            mask.set(bit, true).unwrap();
            assert_eq!(mask.get(bit), Ok(true));
            mask.set(bit, false).unwrap();
            assert_eq!(mask.get(bit), Ok(false));
        }
    }

    #[test]
    fn out_of_range_rejected_without_mutation() {
        let mut mask = KeyMask::new(15);
        assert!(mask.set(16, true).is_err());
        assert!(mask.set(-1, true).is_err());
        assert!(mask.get(16).is_err());
        assert!(mask.is_empty());
    }

    #[test]
    fn size_is_rounded_up() {
        // 0..=8 is nine codes, needing two bytes
        let mut mask = KeyMask::new(8);
        mask.set(8, true).unwrap();
        assert_eq!(mask.get(8), Ok(true));
        assert!(mask.set(9, true).is_err());
    }

    #[test]
    fn compare_modes_against_overlapping_masks() {
        // Held {1,2} vs rule {2,3}: the worked example from the manual
        let held = mask_of(31, &[1, 2]);
        let rule = mask_of(31, &[2, 3]);
        assert!(held.compare(&rule, MatchMode::Any));
        assert!(!held.compare(&rule, MatchMode::All));
        assert!(!held.compare(&rule, MatchMode::Exact));
        assert!(held.compare(&rule, MatchMode::Not)); // 1 is held but not a rule key
    }

    #[test]
    fn compare_all_allows_extra_held_keys() {
        let held = mask_of(31, &[2, 3, 4]);
        let rule = mask_of(31, &[2, 3]);
        assert!(held.compare(&rule, MatchMode::All));
        assert!(!held.compare(&rule, MatchMode::Exact));
    }

    #[test]
    fn compare_not_is_false_for_subset() {
        let held = mask_of(31, &[2]);
        let rule = mask_of(31, &[2, 3]);
        assert!(!held.compare(&rule, MatchMode::Not));
    }

    #[test]
    fn compare_exact_self_is_true() {
        let held = mask_of(31, &[5, 9, 30]);
        assert!(held.compare(&held.clone(), MatchMode::Exact));
    }

    #[test]
    fn compare_any_empty_rule_never_matches() {
        let held = mask_of(31, &[5]);
        let rule = KeyMask::new(31);
        assert!(!held.compare(&rule, MatchMode::Any));
        // but All over an empty rule mask is vacuously true
        assert!(held.compare(&rule, MatchMode::All));
    }

    #[test]
    fn clear_all_is_idempotent() {
        let mut mask = mask_of(31, &[1, 17, 31]);
        mask.clear_all();
        assert!(mask.is_empty());
        mask.clear_all();
        assert!(mask.is_empty());
    }

    #[test]
    fn copy_from_overwrites_contents() {
        let src = mask_of(31, &[3, 4]);
        let mut dst = mask_of(31, &[9]);
        dst.copy_from(&src);
        assert_eq!(dst, src);
    }

    #[test]
    fn display_joins_set_bits_with_plus() {
        let mask = mask_of(127, &[56, 29, 32]);
        assert_eq!(mask.to_string(), "29+32+56");
        assert_eq!(KeyMask::new(127).to_string(), "");
    }
}
