//! Non-interactive command variant of the process contract.
//!
//! Spawns the child with all three stdio streams piped. There is no
//! terminal, so `resize` succeeds without effect; signals go to the child's
//! pid directly.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use super::{ExitError, OutputStream, Process};
use crate::{AppError, Result};

/// A plain command wired up with stdin/stdout/stderr pipes.
pub struct ExecProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

/// Launch `file` with `args`, all three streams piped.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] when the OS spawn fails or a stdio handle
/// cannot be captured.
pub fn create_command(file: &str, args: &[String]) -> Result<Box<dyn Process>> {
    let mut child = Command::new(file)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn '{file}': {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

    debug!(file, pid = child.id(), "spawned exec child");

    Ok(Box::new(ExecProcess {
        child,
        stdin: Some(stdin),
        stdout: Some(stdout),
        stderr: Some(stderr),
    }))
}

/// Render a reaped exit status the way the terminal `Result` frame wants it.
fn render_status(status: std::process::ExitStatus) -> std::result::Result<(), ExitError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExitError::new(format!("exit status {code}")));
    }
    match status.signal() {
        Some(n) => Err(ExitError::new(format!("terminated by signal {n}"))),
        None => Err(ExitError::new("exited abnormally")),
    }
}

impl Process for ExecProcess {
    fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin already closed")
        })?;
        stdin.write_all(data)?;
        stdin.flush()
    }

    fn take_stdout(&mut self) -> OutputStream {
        self.stdout
            .take()
            .map_or(OutputStream::Empty, |s| OutputStream::Stream(Box::new(s)))
    }

    fn take_stderr(&mut self) -> OutputStream {
        self.stderr
            .take()
            .map_or(OutputStream::Empty, |s| OutputStream::Stream(Box::new(s)))
    }

    fn resize(&mut self, _cols: Option<u16>, _rows: Option<u16>) -> Result<()> {
        // No terminal behind a pipe pair.
        Ok(())
    }

    fn kill(&mut self, sig: Option<i32>) -> Result<()> {
        let signal = match sig {
            Some(n) => Signal::try_from(n)
                .map_err(|err| AppError::Process(format!("invalid signal {n}: {err}")))?,
            None => Signal::SIGTERM,
        };
        let pid = Pid::from_raw(
            i32::try_from(self.child.id())
                .map_err(|_| AppError::Process("child pid out of range".into()))?,
        );
        signal::kill(pid, signal)
            .map_err(|err| AppError::Process(format!("failed to signal pid {pid}: {err}")))
    }

    fn wait(&mut self) -> std::result::Result<(), ExitError> {
        match self.child.wait() {
            Ok(status) => render_status(status),
            Err(err) => Err(ExitError::new(format!("wait failed: {err}"))),
        }
    }

    fn close(&mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Still running with its transport gone; terminate and reap.
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
            Err(err) => debug!(%err, "failed to poll exec child during close"),
        }
    }
}
