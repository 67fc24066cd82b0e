//! hotkeyd - Event-driven keyboard shortcut daemon
//!
//! Watches key events from a Linux evdev device, tracks the held-key
//! combination in a bitmask, matches it against operator-defined rules
//! and runs the first matching rule's attribute chain: shell commands,
//! device grabbing, LED control, synthetic key injection and live-mask
//! manipulation.

pub mod device;
pub mod engine;
pub mod event;
pub mod exec;
pub mod mask;
pub mod rules;
pub mod settings;

pub use settings::Settings;
