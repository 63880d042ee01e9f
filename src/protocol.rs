//! Wire records exchanged over the framed transport.
//!
//! One inbound [`Request`] or outbound [`Response`] object travels per frame.
//! Field names are PascalCase on the wire and load-bearing: existing clients
//! depend on them byte-for-byte. Unknown inbound fields are ignored; absent
//! outbound payload fields are elided entirely.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Spawn an interactive child under a freshly forked PTY.
pub const FORK: &str = "FORK";
/// Allocate a raw PTY pair with no child attached.
pub const OPEN: &str = "OPEN";
/// Run a non-interactive command, or feed input once a child exists.
pub const EXEC: &str = "EXEC";
/// Change the terminal dimensions of the running child.
pub const RESIZE: &str = "RESIZE";
/// Deliver a signal to the running child.
pub const SIGNAL: &str = "SIGNAL";

/// Inbound control record.
///
/// Every field is optional on the wire; actions ignore the fields they do
/// not use. `argv[0]` is the executable path, `argv[1..]` its arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Request {
    /// Requested operation; empty when the client omitted it.
    pub action: String,
    /// Executable path plus arguments, or input tokens once a child runs.
    pub argv: Vec<String>,
    /// Signal number for `SIGNAL`.
    pub signal: Option<i32>,
    /// Terminal type (`TERM`) for `FORK`.
    pub term_name: String,
    /// Working directory for `FORK`.
    pub term_cwd: String,
    /// Terminal width in columns.
    pub term_cols: Option<u16>,
    /// Terminal height in rows.
    pub term_rows: Option<u16>,
    /// Numeric user id the child should run as.
    pub term_uid: Option<u32>,
    /// Numeric group id the child should run as.
    pub term_gid: Option<u32>,
    /// Extra environment variables for the child.
    pub term_env: HashMap<String, String>,
}

/// Outbound frame: a timestamp plus exactly one payload.
///
/// The only exception is the periodic flush, which may carry `Stdout` and
/// `Stderr` together in one frame (see [`Response::flush`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Response {
    /// Seconds since the Unix epoch when the frame was produced.
    pub timestamp: i64,
    /// Echo of input delivered to the child's stdin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Chunk of the child's standard output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Chunk of the child's standard error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Status text: protocol errors and the terminal exit rendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Response {
    fn stamped() -> Self {
        Self {
            timestamp: unix_now(),
            ..Self::default()
        }
    }

    /// Frame echoing input that was written to the child's stdin.
    #[must_use]
    pub fn stdin(text: impl Into<String>) -> Self {
        Self {
            stdin: Some(text.into()),
            ..Self::stamped()
        }
    }

    /// Frame carrying a chunk of child standard output.
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: Some(text.into()),
            ..Self::stamped()
        }
    }

    /// Frame carrying a chunk of child standard error.
    #[must_use]
    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stderr: Some(text.into()),
            ..Self::stamped()
        }
    }

    /// Status frame: protocol error text or the terminal exit rendering.
    #[must_use]
    pub fn result(text: impl Into<String>) -> Self {
        Self {
            result: Some(text.into()),
            ..Self::stamped()
        }
    }

    /// Periodic-flush frame; the one shape allowed to carry both output
    /// streams at once. Empty accumulators stay elided.
    #[must_use]
    pub fn flush(stdout: Option<String>, stderr: Option<String>) -> Self {
        Self {
            stdout,
            stderr,
            ..Self::stamped()
        }
    }
}

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
