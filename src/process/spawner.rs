//! Factory contract between the session core and the operating system.
//!
//! The [`Spawner`] trait carries the three factory operations the dispatcher
//! is allowed to invoke. Production code uses [`SystemSpawner`]; tests hand
//! the session a scripted implementation instead.

use std::collections::HashMap;

use super::{exec, pty, Process};
use crate::Result;

/// Parameter block for [`Spawner::create_terminal`].
#[derive(Debug, Clone, Default)]
pub struct TerminalSpec {
    /// Terminal type advertised to the child via `TERM`.
    pub name: String,
    /// Executable path.
    pub file: String,
    /// Arguments after the executable path.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory; empty means inherit.
    pub cwd: String,
    /// Terminal width in columns.
    pub cols: Option<u16>,
    /// Terminal height in rows.
    pub rows: Option<u16>,
    /// Numeric user id the child should run as.
    pub uid: Option<u32>,
    /// Numeric group id the child should run as.
    pub gid: Option<u32>,
}

/// The three ways a session brings a child into existence.
pub trait Spawner: Send + Sync {
    /// Fork an interactive child under a fresh controlling PTY.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Spawn`] when the fork cannot be performed.
    fn create_terminal(&self, spec: &TerminalSpec) -> Result<Box<dyn Process>>;

    /// Allocate a raw PTY pair with no child attached.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Spawn`] when allocation fails.
    fn open_terminal(&self, cols: Option<u16>, rows: Option<u16>) -> Result<Box<dyn Process>>;

    /// Launch a non-interactive command with piped stdio.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Spawn`] when the OS spawn fails.
    fn create_command(&self, file: &str, args: &[String]) -> Result<Box<dyn Process>>;
}

/// Production spawner backed by the real PTY and pipe factories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn create_terminal(&self, spec: &TerminalSpec) -> Result<Box<dyn Process>> {
        pty::create_terminal(spec)
    }

    fn open_terminal(&self, cols: Option<u16>, rows: Option<u16>) -> Result<Box<dyn Process>> {
        pty::open_terminal(cols, rows)
    }

    fn create_command(&self, file: &str, args: &[String]) -> Result<Box<dyn Process>> {
        exec::create_command(file, args)
    }
}
