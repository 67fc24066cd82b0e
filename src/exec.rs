//! Shell command execution
//!
//! Rules carry arbitrary shell commands. That is the point of the
//! daemon and an explicit trust boundary: rule files are written by the
//! operator, not received from anywhere else. Everything goes through
//! the [`Executor`] trait so tests can record instead of spawn, and so
//! `--noexec` can turn the whole thing into a dry run.

use std::io;
use std::process::Command;

use log::debug;

/// Command-execution collaborator.
///
/// The engine never inspects the exit status; a failing command is the
/// operator's business, not an engine error.
pub trait Executor {
    /// Run one command to completion, returning its exit code
    fn execute(&mut self, command: &str) -> io::Result<i32>;
}

/// Runs commands through `sh -c`, blocking until they finish
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    /// Log intent without spawning anything (`--noexec`)
    pub dry_run: bool,
}

impl ShellExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl Executor for ShellExecutor {
    fn execute(&mut self, command: &str) -> io::Result<i32> {
        if self.dry_run {
            debug!("dry run, not executing: {}", command);
            return Ok(0);
        }
        let status = Command::new("sh").arg("-c").arg(command).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}
