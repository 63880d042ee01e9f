#![forbid(unsafe_code)]

//! Bidirectional bridge between a framed duplex transport and a locally
//! spawned child process or pseudo-terminal.
//!
//! A client sends control records (spawn a PTY, open a raw pair, run a
//! command, feed input, resize, signal) and receives a chronological stream
//! of output frames terminated by the child's exit notification. One
//! [`session::RelaySession`] binds one transport connection to at most one
//! child at a time.

pub mod codec;
pub mod config;
pub mod errors;
pub mod process;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
