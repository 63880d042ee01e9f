//! PTY-backed variants of the process contract.
//!
//! Two shapes share the machinery here: [`create_terminal`] forks a child
//! with the slave side as its controlling terminal, and [`open_terminal`]
//! allocates a raw pair with nothing attached. In both, child stdout and
//! stderr are interleaved on the single master stream, so the contract's
//! stderr is the explicit empty stream.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::spawner::TerminalSpec;
use super::{ExitError, OutputStream, Process};
use crate::{AppError, Result};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

fn pty_size(cols: Option<u16>, rows: Option<u16>) -> PtySize {
    PtySize {
        rows: rows.unwrap_or(DEFAULT_ROWS),
        cols: cols.unwrap_or(DEFAULT_COLS),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Resize `master`, keeping the current value on any missing axis.
fn resize_master(
    master: &dyn MasterPty,
    cols: Option<u16>,
    rows: Option<u16>,
) -> Result<()> {
    let current = master
        .get_size()
        .map_err(|err| AppError::Process(format!("failed to query pty size: {err}")))?;
    master
        .resize(PtySize {
            rows: rows.unwrap_or(current.rows),
            cols: cols.unwrap_or(current.cols),
            pixel_width: current.pixel_width,
            pixel_height: current.pixel_height,
        })
        .map_err(|err| AppError::Process(format!("failed to resize pty: {err}")))
}

/// Fork `spec.file` under a fresh PTY that becomes its controlling terminal.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] when PTY allocation, handle capture, or the
/// fork itself fails.
pub fn create_terminal(spec: &TerminalSpec) -> Result<Box<dyn Process>> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(pty_size(spec.cols, spec.rows))
        .map_err(|err| AppError::Spawn(format!("failed to allocate pty: {err}")))?;

    let mut cmd = CommandBuilder::new(&spec.file);
    cmd.args(&spec.args);
    if !spec.name.is_empty() {
        cmd.env("TERM", &spec.name);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if !spec.cwd.is_empty() {
        cmd.cwd(&spec.cwd);
    }
    if spec.uid.is_some() || spec.gid.is_some() {
        // The pty backend cannot drop privileges for the child.
        warn!(uid = ?spec.uid, gid = ?spec.gid, "uid/gid overrides are not supported");
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| AppError::Spawn(format!("failed to fork '{}': {err}", spec.file)))?;

    let writer = pair
        .master
        .take_writer()
        .map_err(|err| AppError::Spawn(format!("failed to capture pty writer: {err}")))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| AppError::Spawn(format!("failed to capture pty reader: {err}")))?;

    debug!(file = %spec.file, pid = ?child.process_id(), "forked pty child");

    // Drop the slave handle so the master sees EOF once the child exits.
    Ok(Box::new(PtyProcess {
        master: pair.master,
        writer: Some(writer),
        stdout: Some(reader),
        child: Some(child),
    }))
}

/// Allocate a raw PTY pair with no child attached.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] when allocation or handle capture fails.
pub fn open_terminal(cols: Option<u16>, rows: Option<u16>) -> Result<Box<dyn Process>> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(pty_size(cols, rows))
        .map_err(|err| AppError::Spawn(format!("failed to allocate pty: {err}")))?;

    let writer = pair
        .master
        .take_writer()
        .map_err(|err| AppError::Spawn(format!("failed to capture pty writer: {err}")))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| AppError::Spawn(format!("failed to capture pty reader: {err}")))?;

    debug!("opened raw pty pair");

    Ok(Box::new(PtyPairProcess {
        master: pair.master,
        // Keeping the slave open is what keeps the master readable.
        slave: Some(pair.slave),
        writer: Some(writer),
        stdout: Some(reader),
    }))
}

/// Interactive child forked under a PTY.
struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    stdout: Option<Box<dyn Read + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
}

fn write_pty(writer: Option<&mut Box<dyn Write + Send>>, data: &[u8]) -> std::io::Result<()> {
    let writer = writer.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pty writer already closed")
    })?;
    writer.write_all(data)?;
    writer.flush()
}

impl Process for PtyProcess {
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()> {
        write_pty(self.writer.as_mut(), data)
    }

    fn take_stdout(&mut self) -> OutputStream {
        self.stdout
            .take()
            .map_or(OutputStream::Empty, OutputStream::Stream)
    }

    fn take_stderr(&mut self) -> OutputStream {
        // Child stderr is interleaved on the master stream.
        OutputStream::Empty
    }

    fn resize(&mut self, cols: Option<u16>, rows: Option<u16>) -> Result<()> {
        resize_master(self.master.as_ref(), cols, rows)
    }

    fn kill(&mut self, sig: Option<i32>) -> Result<()> {
        let child = self
            .child
            .as_ref()
            .ok_or_else(|| AppError::Process("child already reaped".into()))?;
        let pid = child
            .process_id()
            .ok_or_else(|| AppError::Process("child has no process id".into()))?;
        let signal = match sig {
            Some(n) => Signal::try_from(n)
                .map_err(|err| AppError::Process(format!("invalid signal {n}: {err}")))?,
            None => Signal::SIGTERM,
        };
        let pid = Pid::from_raw(
            i32::try_from(pid).map_err(|_| AppError::Process("child pid out of range".into()))?,
        );
        signal::kill(pid, signal)
            .map_err(|err| AppError::Process(format!("failed to signal pid {pid}: {err}")))
    }

    fn wait(&mut self) -> std::result::Result<(), ExitError> {
        let Some(child) = self.child.as_mut() else {
            return Err(ExitError::new("child already reaped"));
        };
        match child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ExitError::new(format!(
                "exit status {}",
                status.exit_code()
            ))),
            Err(err) => Err(ExitError::new(format!("wait failed: {err}"))),
        }
    }

    fn close(&mut self) {
        drop(self.writer.take());
        drop(self.stdout.take());
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Still running with its transport gone; terminate and reap.
                    let _ = child.kill();
                    let _ = child.wait();
                }
                Err(err) => debug!(%err, "failed to poll pty child during close"),
            }
        }
    }
}

/// Raw PTY pair with no child process attached.
struct PtyPairProcess {
    master: Box<dyn MasterPty + Send>,
    slave: Option<Box<dyn SlavePty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    stdout: Option<Box<dyn Read + Send>>,
}

impl Process for PtyPairProcess {
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()> {
        write_pty(self.writer.as_mut(), data)
    }

    fn take_stdout(&mut self) -> OutputStream {
        self.stdout
            .take()
            .map_or(OutputStream::Empty, OutputStream::Stream)
    }

    fn take_stderr(&mut self) -> OutputStream {
        OutputStream::Empty
    }

    fn resize(&mut self, cols: Option<u16>, rows: Option<u16>) -> Result<()> {
        resize_master(self.master.as_ref(), cols, rows)
    }

    fn kill(&mut self, _sig: Option<i32>) -> Result<()> {
        // Nothing is attached to the pair.
        Ok(())
    }

    fn wait(&mut self) -> std::result::Result<(), ExitError> {
        Ok(())
    }

    fn close(&mut self) {
        drop(self.writer.take());
        drop(self.stdout.take());
        drop(self.slave.take());
    }
}
