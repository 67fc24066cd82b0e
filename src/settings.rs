//! Command-line options and the verbosity model
//!
//! Verbosity is a 0-9 level mapped onto the `log` filter:
//! 0 shows hard errors only, 1 adds discarded-rule summaries and exec
//! announcements, 2 adds parse diagnostics and config-load detail, 3
//! and above adds per-event tracing. `--showexec`/`--showkey` raise the
//! floor to the announcement level so they work at any verbosity.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// Default configuration file location
pub const DEFAULT_CONFIG: &str = "/etc/hotkeyd.conf";

/// Event-driven keyboard shortcut daemon for Linux evdev devices
#[derive(Debug, Parser)]
#[command(name = "hotkeyd", version, about)]
pub struct Settings {
    /// Configuration file to use
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Input device node to use (auto-detected when omitted)
    #[arg(short, long)]
    pub device: Option<PathBuf>,

    /// Do not execute any commands (dry run)
    #[arg(short = 'n', long)]
    pub noexec: bool,

    /// Report executed commands and attributes
    #[arg(short = 'x', long)]
    pub showexec: bool,

    /// Report the held keys on every key press
    #[arg(short = 's', long)]
    pub showkey: bool,

    /// Verbosity level (0-9); a bare -v means level 1
    #[arg(
        short,
        long,
        default_value_t = 0,
        num_args = 0..=1,
        default_missing_value = "1",
        value_parser = clap::value_parser!(u8).range(0..=9)
    )]
    pub verbose: u8,

    /// Suppress all console messages
    #[arg(short, long)]
    pub quiet: bool,
}

impl Settings {
    /// The log filter implied by the verbosity level and report flags
    pub fn level_filter(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Off;
        }
        let level = match self.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        // The report flags must be visible even at verbosity 0
        if (self.showexec || self.showkey) && level < LevelFilter::Info {
            return LevelFilter::Info;
        }
        level
    }

    /// Per-event tracing already shows the held keys, so high verbosity
    /// makes `--showkey` redundant
    pub fn effective_showkey(&self) -> bool {
        self.showkey && self.verbose <= 2
    }
}
