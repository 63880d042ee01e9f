//! One transport connection bound to at most one child process.
//!
//! Three concurrent activities compose a session:
//!
//! - the **reader** (this module's [`RelaySession::run`]) consumes framed
//!   requests, drives the idle/busy state machine, and produces child
//!   control side effects;
//! - the **writer** task drains the bounded outbound queue and serialises
//!   each frame onto the transport in order;
//! - the **responder** ([`responder`]) owns the child's output streams for
//!   the lifetime of one child.
//!
//! The child slot transitions `absent -> present -> absent`, never
//! `present -> present`: the reader fills it while idle, the responder
//! clears it at teardown, and the handoff is strictly sequential.

pub mod responder;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::process::{pipe, Process, Spawner, TerminalSpec};
use crate::protocol::{self, Request, Response};

/// The session's single child slot, shared between the reader (control
/// operations while busy) and the responder (reaping and release).
pub type ChildSlot = Arc<Mutex<Option<Box<dyn Process>>>>;

/// One framed duplex transport bound to at most one child process.
pub struct RelaySession<R> {
    id: String,
    frames: FramedRead<R, FrameCodec>,
    outbound: mpsc::Sender<Response>,
    writer: JoinHandle<()>,
    child: ChildSlot,
    spawner: Arc<dyn Spawner>,
}

impl<R> RelaySession<R>
where
    R: AsyncRead + Unpin,
{
    /// Bind a transport's two halves into a session and start the writer
    /// task. `queue_depth` bounds the outbound frame queue; values below 2
    /// are raised to 2 so a producer can never block the writer while the
    /// writer is reporting that producer's own failure.
    pub fn new<W>(
        id: String,
        reader: R,
        writer: W,
        spawner: Arc<dyn Spawner>,
        queue_depth: usize,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::channel(queue_depth.max(2));
        let writer = spawn_writer(id.clone(), writer, rx);
        Self {
            id,
            frames: FramedRead::new(reader, FrameCodec::new()),
            outbound,
            writer,
            child: Arc::new(Mutex::new(None)),
            spawner,
        }
    }

    /// Run the reader until the transport fails or the peer closes it,
    /// then shut the transport down.
    pub async fn run(mut self) {
        info!(session = %self.id, "session started");
        loop {
            let line = match self.frames.next().await {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    debug!(session = %self.id, %err, "transport decode failed");
                    break;
                }
                None => {
                    debug!(session = %self.id, "transport closed by peer");
                    break;
                }
            };
            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    debug!(session = %self.id, %err, "unreadable request frame");
                    break;
                }
            };
            self.dispatch(request).await;
        }
        debug!(session = %self.id, "closing transport");
        self.writer.abort();
    }

    /// Apply one request to the `(child present?, action)` state machine.
    async fn dispatch(&mut self, request: Request) {
        if request.action.is_empty() {
            self.send_result("required field 'Action'").await;
            return;
        }

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match request.action.as_str() {
                protocol::RESIZE => {
                    if let Err(err) = child.resize(request.term_cols, request.term_rows) {
                        warn!(session = %self.id, %err, "resize failed");
                    }
                }
                protocol::SIGNAL => {
                    if let Err(err) = child.kill(request.signal) {
                        warn!(session = %self.id, %err, "signal delivery failed");
                    }
                }
                protocol::EXEC => {
                    // Once a child exists, EXEC carries input for its stdin:
                    // a single-space join with no trailing newline. Clients
                    // that need the newline include it in a token.
                    let input = request.argv.join(" ");
                    let written = child.write_stdin(input.as_bytes());
                    drop(guard);
                    match written {
                        Ok(()) => {
                            debug!(session = %self.id, input = %input, "forwarded stdin");
                            self.send(Response::stdin(input)).await;
                        }
                        Err(err) => {
                            warn!(session = %self.id, %err, "stdin write failed");
                            self.send_result("message failed to send").await;
                        }
                    }
                }
                other => {
                    debug!(session = %self.id, action = other, "ignoring action while child is running");
                }
            }
            return;
        }
        drop(guard);

        match request.action.as_str() {
            protocol::FORK => {
                if request.argv.is_empty() {
                    self.send_result("missing required field 'Argv'").await;
                    return;
                }
                let spec = TerminalSpec {
                    name: request.term_name,
                    file: request.argv[0].clone(),
                    args: request.argv[1..].to_vec(),
                    env: request.term_env,
                    cwd: request.term_cwd,
                    cols: request.term_cols,
                    rows: request.term_rows,
                    uid: request.term_uid,
                    gid: request.term_gid,
                };
                match self.spawner.create_terminal(&spec) {
                    Ok(child) => self.adopt(child).await,
                    Err(err) => {
                        warn!(session = %self.id, %err, "pty fork failed");
                        self.send_result("unable to fork pty").await;
                    }
                }
            }
            protocol::OPEN => {
                match self
                    .spawner
                    .open_terminal(request.term_cols, request.term_rows)
                {
                    Ok(child) => self.adopt(child).await,
                    Err(err) => {
                        warn!(session = %self.id, %err, "pty open failed");
                        self.send_result("unable to open pty").await;
                    }
                }
            }
            protocol::EXEC => {
                if request.argv.is_empty() {
                    self.send_result("missing required field 'Argv'").await;
                    return;
                }
                match self
                    .spawner
                    .create_command(&request.argv[0], &request.argv[1..])
                {
                    Ok(child) => self.adopt(child).await,
                    Err(err) => {
                        warn!(session = %self.id, %err, "exec failed");
                        self.send_result("unable to run exec").await;
                    }
                }
            }
            other => {
                debug!(session = %self.id, action = other, "no running process");
                self.send_result("no running process").await;
            }
        }
    }

    /// Take the child's output streams, fill the slot, and start the
    /// responder. Only called while the slot is empty.
    async fn adopt(&mut self, mut child: Box<dyn Process>) {
        let stdout = pipe(child.take_stdout(), "stdout");
        let stderr = pipe(child.take_stderr(), "stderr");
        *self.child.lock().await = Some(child);
        responder::spawn(
            self.id.clone(),
            Arc::clone(&self.child),
            stdout,
            stderr,
            self.outbound.clone(),
        );
        debug!(session = %self.id, "child adopted; responder started");
    }

    async fn send(&self, frame: Response) {
        if self.outbound.send(frame).await.is_err() {
            debug!(session = %self.id, "outbound queue closed");
        }
    }

    async fn send_result(&self, text: &str) {
        self.send(Response::result(text)).await;
    }
}

/// Writer task: drain the outbound queue and serialise each frame, one in,
/// one out. Exits when the queue closes or a transport write fails, then
/// shuts the transport down.
fn spawn_writer<W>(id: String, mut sink: W, mut rx: mpsc::Receiver<Response>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut bytes = match serde_json::to_vec(&frame) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(session = %id, %err, "failed to serialise outbound frame");
                    continue;
                }
            };
            bytes.push(b'\n');
            if let Err(err) = sink.write_all(&bytes).await {
                debug!(session = %id, %err, "transport write failed");
                break;
            }
        }
        let _ = sink.shutdown().await;
        debug!(session = %id, "writer finished; transport closed");
    })
}
