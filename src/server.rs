//! TCP accept loop: one [`RelaySession`] per connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::process::Spawner;
use crate::session::RelaySession;
use crate::{AppError, Result};

/// Bind the configured address and serve sessions until `ct` fires.
///
/// Each accepted connection gets a fresh session id and its own task; a
/// failed accept is logged and the loop continues.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if the listener cannot be bound.
pub async fn run(
    config: &GlobalConfig,
    spawner: Arc<dyn Spawner>,
    ct: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await.map_err(|err| {
        AppError::Transport(format!("failed to bind '{}': {err}", config.listen_addr))
    })?;

    info!(addr = %config.listen_addr, "relay listening");

    loop {
        tokio::select! {
            () = ct.cancelled() => {
                info!("relay server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let session_id = Uuid::new_v4().to_string();
                        let (reader, writer) = stream.into_split();
                        let session = RelaySession::new(
                            session_id.clone(),
                            reader,
                            writer,
                            Arc::clone(&spawner),
                            config.outbound_queue_depth,
                        );
                        let span = info_span!("session", id = %session_id, peer = %peer);
                        tokio::spawn(session.run().instrument(span));
                    }
                    Err(err) => {
                        error!(%err, "accept failed");
                    }
                }
            }
        }
    }
}
