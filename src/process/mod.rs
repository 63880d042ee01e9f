//! Child process abstraction and stream adaptation.
//!
//! A [`Process`] is whatever sits on the far side of the bridge: a child
//! forked under a PTY, a raw PTY pair with nothing attached, or a plain
//! command wired up with pipes. The session owns exactly one at a time and
//! talks to it only through this trait, so the dispatcher and the responder
//! never touch the operating system directly.
//!
//! All three variants expose blocking read/write handles; [`pipe`] adapts
//! each read handle into a tokio channel by pumping it on a dedicated
//! thread, the same way the rest of the stack adapts PTY masters.

pub mod exec;
pub mod pty;
pub mod spawner;

use std::fmt::{Display, Formatter};
use std::io::Read;

use bytes::Bytes;
use nix::libc;
use tokio::sync::mpsc;
use tracing::debug;

pub use spawner::{Spawner, SystemSpawner, TerminalSpec};

/// Capacity of the per-stream event channel fed by a reader thread.
const PIPE_DEPTH: usize = 1024;

/// Read buffer size for the per-stream reader threads.
const READ_CHUNK: usize = 4096;

/// Abnormal exit description produced by [`Process::wait`].
///
/// Renders as the bare status text (`exit status 3`,
/// `terminated by signal 15`) so it can travel in a `Result` frame as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitError(String);

impl ExitError {
    /// Wrap a rendered exit description.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl Display for ExitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ExitError {}

/// A child output stream, or the explicit absence of one.
///
/// A raw PTY pair has no stderr; that is not a null handle but an `Empty`
/// stream that yields immediate EOF when piped.
pub enum OutputStream {
    /// A live blocking read handle.
    Stream(Box<dyn Read + Send>),
    /// No stream exists; piping produces EOF right away.
    Empty,
}

/// Event forwarded from a per-stream reader thread to the responder.
#[derive(Debug)]
pub enum StreamEvent {
    /// A chunk of output bytes.
    Data(Bytes),
    /// The stream reached end-of-file.
    Eof,
    /// The stream failed with a non-EOF error.
    Failed(String),
}

/// Capability contract for the session's single child.
///
/// Ownership rules: only the session reader calls `write_stdin` / `resize` /
/// `kill`; the output streams are taken exactly once at adoption and read
/// only by the responder; `wait` and `close` are called by the responder at
/// end of life, `close` exactly once.
pub trait Process: Send {
    /// Write one chunk to the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the write fails, typically
    /// because the child has exited.
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Take the stdout read stream. Subsequent calls return
    /// [`OutputStream::Empty`].
    fn take_stdout(&mut self) -> OutputStream;

    /// Take the stderr read stream. Subsequent calls return
    /// [`OutputStream::Empty`].
    fn take_stderr(&mut self) -> OutputStream;

    /// Change the terminal dimensions. A missing axis leaves that dimension
    /// unchanged. Non-terminal variants succeed without effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Process`] when the resize ioctl fails.
    fn resize(&mut self, cols: Option<u16>, rows: Option<u16>) -> crate::Result<()>;

    /// Deliver a signal to the child. `None` falls back to `SIGTERM`.
    /// Variants without a child succeed without effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Process`] when delivery fails.
    fn kill(&mut self, signal: Option<i32>) -> crate::Result<()>;

    /// Reap the child and report how it exited. `Ok` means a clean zero
    /// exit; the error carries the rendering for the terminal `Result`
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`ExitError`] describing a nonzero exit, a signal death, or
    /// a reaping failure.
    fn wait(&mut self) -> std::result::Result<(), ExitError>;

    /// Release file descriptors, terminating and reaping the child if it is
    /// still running. Called exactly once.
    fn close(&mut self);
}

/// Adapt a blocking output stream into a channel of [`StreamEvent`]s.
///
/// Spawns one reader thread per live stream. The thread performs bounded
/// reads, forwards chunks, and terminates after sending the terminal `Eof`
/// or `Failed` event, or when the receiving side is dropped. An `Empty`
/// stream produces `Eof` without spawning anything.
///
/// A PTY master reports `EIO` once the child side is gone; that is this
/// stream's end-of-file, not a failure.
pub fn pipe(stream: OutputStream, label: &'static str) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);

    match stream {
        OutputStream::Empty => {
            // Capacity is nonzero, so this send cannot fail on a fresh channel.
            let _ = tx.try_send(StreamEvent::Eof);
        }
        OutputStream::Stream(mut reader) => {
            let spawned = std::thread::Builder::new()
                .name(format!("relay-pipe-{label}"))
                .spawn(move || {
                    let mut buf = [0u8; READ_CHUNK];
                    loop {
                        match reader.read(&mut buf) {
                            Ok(0) => {
                                let _ = tx.blocking_send(StreamEvent::Eof);
                                break;
                            }
                            Ok(n) => {
                                let chunk = Bytes::copy_from_slice(&buf[..n]);
                                if tx.blocking_send(StreamEvent::Data(chunk)).is_err() {
                                    debug!(label, "stream consumer gone, stopping reader");
                                    break;
                                }
                            }
                            Err(err) => {
                                let event = if err.raw_os_error() == Some(libc::EIO) {
                                    StreamEvent::Eof
                                } else {
                                    StreamEvent::Failed(err.to_string())
                                };
                                let _ = tx.blocking_send(event);
                                break;
                            }
                        }
                    }
                });
            if let Err(err) = spawned {
                debug!(label, %err, "failed to spawn stream reader thread");
            }
        }
    }

    rx
}
