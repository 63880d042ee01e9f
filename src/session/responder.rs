//! Output fan-in and exit collection for one child lifecycle.
//!
//! The responder owns the child's output for as long as the child lives. It
//! multiplexes the two per-stream event channels and a one-second flush
//! timer, assembles terminator-inclusive line frames, latches the first
//! end-of-file, and after the second reaps the child and reports how it
//! exited. Teardown always closes the child exactly once and clears the
//! session's child slot, returning the session to its idle state.
//!
//! The slot is cleared only after the final exit frame has been enqueued,
//! so a subsequent spawn on the same session cannot race with the previous
//! exit notification.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::ChildSlot;
use crate::process::StreamEvent;
use crate::protocol::Response;

/// How long a stream may stay quiet before accumulated output is flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Which child stream an event belongs to.
#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn frame(self, text: String) -> Response {
        match self {
            Self::Stdout => Response::stdout(text),
            Self::Stderr => Response::stderr(text),
        }
    }
}

/// Start the responder task for a freshly adopted child.
///
/// `stdout` and `stderr` are the piped event channels taken from the child
/// at adoption; `slot` is the session's child slot, which the responder
/// clears on its way out.
pub fn spawn(
    session_id: String,
    slot: ChildSlot,
    stdout: mpsc::Receiver<StreamEvent>,
    stderr: mpsc::Receiver<StreamEvent>,
    outbound: mpsc::Sender<Response>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        respond(&session_id, &slot, stdout, stderr, &outbound).await;
        teardown(&session_id, &slot).await;
    })
}

async fn respond(
    session_id: &str,
    slot: &ChildSlot,
    mut stdout_rx: mpsc::Receiver<StreamEvent>,
    mut stderr_rx: mpsc::Receiver<StreamEvent>,
    outbound: &mpsc::Sender<Response>,
) {
    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut stderr_buf: Vec<u8> = Vec::new();
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut eof_seen = false;

    loop {
        let (kind, event) = tokio::select! {
            ev = stdout_rx.recv(), if !stdout_done => (StreamKind::Stdout, ev),
            ev = stderr_rx.recv(), if !stderr_done => (StreamKind::Stderr, ev),
            () = sleep(FLUSH_INTERVAL) => {
                // Quiet child; dump whatever sits in the accumulators.
                let stdout_text = drain(&mut stdout_buf);
                let stderr_text = drain(&mut stderr_buf);
                if stdout_text.is_some() || stderr_text.is_some() {
                    let frame = Response::flush(stdout_text, stderr_text);
                    if outbound.send(frame).await.is_err() {
                        return;
                    }
                }
                continue;
            }
        };

        let (buf, done) = match kind {
            StreamKind::Stdout => (&mut stdout_buf, &mut stdout_done),
            StreamKind::Stderr => (&mut stderr_buf, &mut stderr_done),
        };

        match event {
            Some(StreamEvent::Data(chunk)) => {
                for &byte in &chunk {
                    buf.push(byte);
                    if byte == b'\n' {
                        let text = String::from_utf8_lossy(buf).into_owned();
                        buf.clear();
                        if outbound.send(kind.frame(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Some(StreamEvent::Eof) => {
                *done = true;
                if let Some(text) = drain(buf) {
                    if outbound.send(kind.frame(text)).await.is_err() {
                        return;
                    }
                }
                if eof_seen {
                    let result = collect_exit(slot).await;
                    debug!(session = session_id, result = %result, "child exited");
                    let _ = outbound.send(Response::result(result)).await;
                    return;
                }
                eof_seen = true;
            }
            Some(StreamEvent::Failed(msg)) => {
                warn!(session = session_id, error = %msg, "child stream failed");
                let _ = outbound
                    .send(Response::result("connection closed unexpectedly"))
                    .await;
                return;
            }
            None => {
                warn!(session = session_id, "child stream channel dropped");
                let _ = outbound
                    .send(Response::result("connection closed unexpectedly"))
                    .await;
                return;
            }
        }
    }
}

/// Reap the child and render the terminal status text.
async fn collect_exit(slot: &ChildSlot) -> String {
    let mut guard = slot.lock().await;
    match guard.as_mut() {
        Some(child) => match child.wait() {
            Ok(()) => "0".to_owned(),
            Err(err) => err.to_string(),
        },
        None => "0".to_owned(),
    }
}

/// Release the child and free the session's child slot.
async fn teardown(session_id: &str, slot: &ChildSlot) {
    let mut guard = slot.lock().await;
    if let Some(mut child) = guard.take() {
        child.close();
    }
    drop(guard);
    debug!(session = session_id, "responder finished; session idle");
}

fn drain(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Some(text)
}
