//! The match/execute engine
//!
//! One instance owns everything the per-event state machine touches:
//! the live and ignore masks, the grab and ignore-release flags, the
//! rule store, the device and the command executor. The daemon loop
//! feeds it one normalized event at a time; there is no concurrency
//! anywhere inside.
//!
//! Per event: update the live mask, find the first matching rule, run
//! its attribute chain in declaration order, fall back on the command
//! if no attribute already ran one, then apply release bookkeeping.
//! Attributes mutate the very state the engine matched on (masks, grab
//! state), which is why the chain runs strictly in order and why the
//! rule store is never swapped mid-event.

use log::{info, trace, warn};

use crate::device::{Device, DeviceError, KeyEvent};
use crate::event::EventKind;
use crate::exec::Executor;
use crate::mask::KeyMask;
use crate::rules::{Attribute, RuleSet};

/// Reporting toggles that do not affect control flow
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Report the held-key mask on every press (`--showkey`)
    pub show_keys: bool,
}

/// The event-driven rule engine
pub struct Engine<D: Device, X: Executor> {
    device: D,
    exec: X,
    rules: RuleSet,
    live: KeyMask,
    ignore: KeyMask,
    grabbed: bool,
    ignore_release: bool,
    options: EngineOptions,
}

impl<D: Device, X: Executor> Engine<D, X> {
    pub fn new(device: D, exec: X, rules: RuleSet, options: EngineOptions) -> Self {
        let max_key = device.max_key();
        Self {
            device,
            exec,
            rules,
            live: KeyMask::new(max_key),
            ignore: KeyMask::new(max_key),
            grabbed: false,
            ignore_release: false,
            options,
        }
    }

    /// Block on the device for the next event
    pub fn next_event(&mut self) -> Result<KeyEvent, DeviceError> {
        self.device.next_event()
    }

    /// Swap in a fresh rule set and fresh masks.
    ///
    /// Called between events only, so no event is ever matched against
    /// a half-rebuilt store. The key-code space is fixed for the
    /// process lifetime; the grab state survives reconfiguration, the
    /// ignore-release arming does not.
    pub fn reconfigure(&mut self, rules: RuleSet) {
        let max_key = self.device.max_key();
        self.rules = rules;
        self.live = KeyMask::new(max_key);
        self.ignore = KeyMask::new(max_key);
        self.ignore_release = false;
    }

    /// Run the full state machine for one normalized event
    pub fn handle_event(&mut self, ev: KeyEvent) {
        let code = ev.code as i32;

        if matches!(ev.kind, EventKind::Press | EventKind::Repeat) {
            if let Err(e) = self.live.set(code, true) {
                warn!("cannot mark key as held: {}", e);
            }
        }

        trace!("event: {}:{}", self.live, ev.kind);
        if self.options.show_keys && ev.kind == EventKind::Press {
            info!("keys: {}", self.live);
        }

        if let Some(idx) = self.rules.find_match_index(&self.live, ev.kind, self.grabbed) {
            self.run_rule(idx, code);
        }

        if ev.kind == EventKind::Release {
            // An armed ignore mask keeps the key "stuck on" until rule
            // logic releases it explicitly
            let keep = self.ignore_release && self.ignore.get(code).unwrap_or(false);
            if !keep {
                if let Err(e) = self.live.set(code, false) {
                    warn!("cannot mark key as released: {}", e);
                }
            }
        }
    }

    /// Execute one matched rule's attribute chain, then the fallback
    fn run_rule(&mut self, idx: usize, trigger: i32) {
        let Some(rule) = self.rules.get(idx) else {
            return;
        };
        let attributes = rule.attributes.clone();
        let command = rule.command.clone();
        let suppress_fallback = rule.suppress_fallback;

        let mut exec_done = false;
        for attr in attributes {
            match attr {
                Attribute::Exec => {
                    self.execute(&command);
                    exec_done = true;
                    info!("attribute: exec");
                }
                Attribute::Grab => {
                    match self.device.grab() {
                        Ok(()) => self.grabbed = true,
                        Err(e) => warn!("grab failed: {}", e),
                    }
                    info!("attribute: grab");
                }
                Attribute::Ungrab => {
                    match self.device.ungrab() {
                        Ok(()) => self.grabbed = false,
                        Err(e) => warn!("ungrab failed: {}", e),
                    }
                    info!("attribute: ungrab");
                }
                Attribute::IgnoreRelease => {
                    self.ignore.copy_from(&self.live);
                    self.ignore_release = true;
                    info!("attribute: ignrel");
                }
                Attribute::ReceiveRelease => {
                    self.ignore_release = false;
                    info!("attribute: rcvrel");
                }
                Attribute::ReleaseAllHeld => {
                    self.live.clear_all();
                    info!("attribute: allrel");
                }
                Attribute::SynthKey(opt) => self.synthesize(EventKind::Press, opt, trigger),
                Attribute::SynthRelease(opt) => self.synthesize(EventKind::Release, opt, trigger),
                Attribute::SynthRepeat(opt) => self.synthesize(EventKind::Repeat, opt, trigger),
                Attribute::SetBit(bit) => {
                    if let Err(e) = self.live.set(bit, true) {
                        warn!("set({}) failed: {}", bit, e);
                    }
                    info!("attribute: set({})", bit);
                }
                Attribute::UnsetBit(bit) => {
                    if let Err(e) = self.live.set(bit, false) {
                        warn!("unset({}) failed: {}", bit, e);
                    }
                    info!("attribute: unset({})", bit);
                }
                Attribute::LedOn(led) => {
                    if let Err(e) = self.device.set_led(led, true) {
                        warn!("ledon({}) failed: {}", led, e);
                    }
                    info!("attribute: ledon({})", led);
                }
                Attribute::LedOff(led) => {
                    if let Err(e) = self.device.set_led(led, false) {
                        warn!("ledoff({}) failed: {}", led, e);
                    }
                    info!("attribute: ledoff({})", led);
                }
            }
        }

        if !exec_done && !suppress_fallback {
            self.execute(&command);
        }
    }

    fn execute(&mut self, command: &str) {
        info!("executing: {}", command);
        if let Err(e) = self.exec.execute(command) {
            warn!("command failed to start: {}", e);
        }
    }

    fn synthesize(&mut self, kind: EventKind, operand: Option<i32>, trigger: i32) {
        let code = operand.unwrap_or(trigger);
        if let Err(e) = self.device.send_event(code, kind) {
            warn!("synthetic {}({}) failed: {}", kind, code, e);
        }
        info!("attribute: {}({})", kind.token(), code);
    }

    /// Currently held keys
    pub fn live_mask(&self) -> &KeyMask {
        &self.live
    }

    /// Whether the device is currently grabbed
    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Whether ignore-release mode is armed
    pub fn ignore_release_active(&self) -> bool {
        self.ignore_release
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn executor(&self) -> &X {
        &self.exec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MatchMode;
    use crate::rules::parse::parse_line;

    /// A scripted device that records everything the engine asks of it
    #[derive(Default)]
    struct MockDevice {
        sent: Vec<(i32, EventKind)>,
        leds: Vec<(i32, bool)>,
        grabs: usize,
        ungrabs: usize,
        fail_grab: bool,
    }

    impl Device for MockDevice {
        fn max_key(&self) -> u16 {
            255
        }
        fn next_event(&mut self) -> Result<KeyEvent, DeviceError> {
            Err(DeviceError::Interrupted)
        }
        fn send_event(&mut self, code: i32, kind: EventKind) -> Result<(), DeviceError> {
            self.sent.push((code, kind));
            Ok(())
        }
        fn set_led(&mut self, led: i32, on: bool) -> Result<(), DeviceError> {
            self.leds.push((led, on));
            Ok(())
        }
        fn grab(&mut self) -> Result<(), DeviceError> {
            if self.fail_grab {
                return Err(DeviceError::NoKeyboard);
            }
            self.grabs += 1;
            Ok(())
        }
        fn ungrab(&mut self) -> Result<(), DeviceError> {
            self.ungrabs += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        commands: Vec<String>,
    }

    impl Executor for RecordingExecutor {
        fn execute(&mut self, command: &str) -> std::io::Result<i32> {
            self.commands.push(command.to_string());
            Ok(0)
        }
    }

    fn engine_with(lines: &[&str]) -> Engine<MockDevice, RecordingExecutor> {
        let mut rules = RuleSet::new();
        for (i, line) in lines.iter().enumerate() {
            if let Ok(Some(rule)) = parse_line(line, i + 1, 255) {
                rules.push(rule);
            }
        }
        Engine::new(
            MockDevice::default(),
            RecordingExecutor::default(),
            rules,
            EngineOptions::default(),
        )
    }

    fn press(code: u16) -> KeyEvent {
        KeyEvent {
            code,
            kind: EventKind::Press,
        }
    }

    fn release(code: u16) -> KeyEvent {
        KeyEvent {
            code,
            kind: EventKind::Release,
        }
    }

    fn repeat(code: u16) -> KeyEvent {
        KeyEvent {
            code,
            kind: EventKind::Repeat,
        }
    }

    #[test]
    fn press_and_release_track_the_live_mask() {
        let mut engine = engine_with(&[]);
        engine.handle_event(press(30));
        assert_eq!(engine.live_mask().get(30), Ok(true));
        engine.handle_event(release(30));
        assert_eq!(engine.live_mask().get(30), Ok(false));
    }

    #[test]
    fn repeat_keeps_the_bit_set() {
        let mut engine = engine_with(&[]);
        engine.handle_event(press(30));
        engine.handle_event(repeat(30));
        assert_eq!(engine.live_mask().get(30), Ok(true));
    }

    #[test]
    fn exact_match_runs_the_fallback_command() {
        let mut engine = engine_with(&["29+46:key::notify-send copied"]);
        engine.handle_event(press(29));
        engine.handle_event(press(46));
        assert_eq!(engine.executor().commands, vec!["notify-send copied"]);
    }

    #[test]
    fn noexec_suppresses_the_fallback() {
        let mut engine = engine_with(&["30:key:noexec:never run"]);
        engine.handle_event(press(30));
        assert!(engine.executor().commands.is_empty());
    }

    #[test]
    fn exec_attribute_runs_the_command_exactly_once() {
        let mut engine = engine_with(&["30:key:exec:run me"]);
        engine.handle_event(press(30));
        assert_eq!(engine.executor().commands, vec!["run me"]);
    }

    #[test]
    fn first_declared_rule_wins() {
        let mut engine = engine_with(&["30:key::first", "30:key::second"]);
        engine.handle_event(press(30));
        assert_eq!(engine.executor().commands, vec!["first"]);
    }

    #[test]
    fn no_match_has_no_side_effects() {
        let mut engine = engine_with(&["1+2:key::cmd"]);
        engine.handle_event(press(30));
        assert!(engine.executor().commands.is_empty());
        assert!(engine.device().sent.is_empty());
    }

    #[test]
    fn grab_attribute_updates_state_on_success_only() {
        let mut engine = engine_with(&["30:key:grab,noexec:"]);
        engine.device.fail_grab = true;
        engine.handle_event(press(30));
        assert!(!engine.is_grabbed());

        engine.device.fail_grab = false;
        engine.handle_event(repeat(30)); // no match: rule is press-only
        engine.handle_event(release(30));
        engine.handle_event(press(30));
        assert!(engine.is_grabbed());
        assert_eq!(engine.device().grabs, 1);
    }

    #[test]
    fn grab_then_ungrab_rules_gate_on_grab_state() {
        let mut engine = engine_with(&[
            "30:key:ungrabbed,grab,noexec:",
            "30:key:grabbed,ungrab,noexec:",
        ]);
        engine.handle_event(press(30));
        assert!(engine.is_grabbed());
        engine.handle_event(release(30));
        engine.handle_event(press(30));
        assert!(!engine.is_grabbed());
        assert_eq!(engine.device().grabs, 1);
        assert_eq!(engine.device().ungrabs, 1);
    }

    #[test]
    fn ignore_release_keeps_the_key_stuck() {
        let mut engine = engine_with(&[
            "5:key:ignrel,noexec:",
            "6:key:any,rcvrel,noexec:",
        ]);

        engine.handle_event(press(5));
        assert!(engine.ignore_release_active());
        engine.handle_event(release(5));
        // Bit 5 stays set: its release was ignored
        assert_eq!(engine.live_mask().get(5), Ok(true));

        // Disarm; 6 is not in the ignore mask so it clears normally
        engine.handle_event(press(6));
        assert!(!engine.ignore_release_active());
        engine.handle_event(release(6));
        assert_eq!(engine.live_mask().get(6), Ok(false));

        // And now 5 can be released for real
        engine.handle_event(release(5));
        assert_eq!(engine.live_mask().get(5), Ok(false));
    }

    #[test]
    fn allrel_clears_everything() {
        let mut engine = engine_with(&["1+2:key:all,allrel,noexec:"]);
        engine.handle_event(press(1));
        engine.handle_event(press(2));
        assert!(engine.live_mask().is_empty());
        // applying it again through a fresh match changes nothing
        engine.handle_event(press(1));
        engine.handle_event(press(2));
        assert!(engine.live_mask().is_empty());
    }

    #[test]
    fn synth_attributes_default_to_the_triggering_key() {
        let mut engine = engine_with(&["30:key:key,rel(44),noexec:"]);
        engine.handle_event(press(30));
        assert_eq!(
            engine.device().sent,
            vec![(30, EventKind::Press), (44, EventKind::Release)]
        );
    }

    #[test]
    fn set_and_unset_manufacture_compound_states() {
        let mut engine = engine_with(&[
            "30:key:set(200),noexec:",
            "200+31:key:all:compound",
        ]);
        engine.handle_event(press(30));
        assert_eq!(engine.live_mask().get(200), Ok(true));
        engine.handle_event(press(31));
        assert_eq!(engine.executor().commands, vec!["compound"]);
    }

    #[test]
    fn led_attributes_reach_the_device() {
        let mut engine = engine_with(&["30:key:ledon(0),ledoff(1),noexec:"]);
        engine.handle_event(press(30));
        assert_eq!(engine.device().leds, vec![(0, true), (1, false)]);
    }

    #[test]
    fn any_mode_rule_matches_with_extra_keys_held() {
        let mut engine = engine_with(&["113+114+115:key:any:volume"]);
        engine.handle_event(press(56)); // unrelated modifier held
        engine.handle_event(press(114));
        assert_eq!(engine.executor().commands, vec!["volume"]);
    }

    #[test]
    fn reconfigure_swaps_rules_and_resets_masks() {
        let mut engine = engine_with(&["30:key::old"]);
        engine.handle_event(press(30));
        assert_eq!(engine.executor().commands, vec!["old"]);
        engine.handle_event(release(30));

        let mut fresh = RuleSet::new();
        if let Ok(Some(rule)) = parse_line("31:key::new", 1, 255) {
            fresh.push(rule);
        }
        engine.reconfigure(fresh);

        assert!(engine.live_mask().is_empty());
        assert!(!engine.ignore_release_active());

        engine.handle_event(press(30)); // removed rule no longer fires
        engine.handle_event(release(30));
        engine.handle_event(press(31)); // added rule fires immediately
        assert_eq!(engine.executor().commands, vec!["old", "new"]);
    }

    #[test]
    fn reconfigure_preserves_grab_state() {
        let mut engine = engine_with(&["30:key:grab,noexec:"]);
        engine.handle_event(press(30));
        assert!(engine.is_grabbed());
        engine.reconfigure(RuleSet::new());
        assert!(engine.is_grabbed());
    }

    #[test]
    fn rule_matching_uses_mode_from_rule() {
        let mut engine = engine_with(&["29:key:not,noexec,allrel:"]);
        // Held {29} is a subset of rule {29}: Not does not match
        engine.handle_event(press(29));
        assert_eq!(engine.live_mask().get(29), Ok(true));
        // Held {29, 30} has 30 outside the rule mask: Not matches, allrel fires
        engine.handle_event(press(30));
        assert!(engine.live_mask().is_empty());
        assert_eq!(
            engine
                .rules()
                .iter()
                .next()
                .map(|r| r.match_mode),
            Some(MatchMode::Not)
        );
    }
}
