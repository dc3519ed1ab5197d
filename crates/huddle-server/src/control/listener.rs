//! Control listener: accepts TCP connections and spawns a session for each.

use super::session::serve_connection;
use super::ControlContext;

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Pause after an accept error (fd exhaustion and the like) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop on an already-bound listener.
pub struct ControlListener {
    listener: TcpListener,
    context: ControlContext,
    cancel_token: CancellationToken,
}

impl ControlListener {
    /// Spawn the accept loop. Each session gets a child of `cancel_token`.
    pub fn spawn(
        listener: TcpListener,
        context: ControlContext,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let accept_loop = Self {
            listener,
            context,
            cancel_token,
        };
        tokio::spawn(accept_loop.run())
    }

    #[instrument(skip_all, name = "huddle.control.listener")]
    async fn run(self) {
        info!(
            target: "huddle.control",
            addr = ?self.listener.local_addr().ok(),
            "Control listener started"
        );

        loop {
            let accepted = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(target: "huddle.control", peer = %peer, "Accepted control connection");
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        self.context.clone(),
                        self.cancel_token.child_token(),
                    ));
                }
                Err(e) => {
                    warn!(target: "huddle.control", error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        info!(target: "huddle.control", "Control listener stopped");
    }
}
