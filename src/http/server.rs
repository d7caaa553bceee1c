//! Relay server setup and accept loop.
//!
//! # Responsibilities
//! - Own the shared relay state (room registry, router, connection tracker)
//! - Accept connections and spawn one session task per connection
//! - Stop accepting on shutdown, ask sessions to close, wait for the drain

use std::sync::Arc;
use std::time::Duration;

use crate::config::{RelayConfig, WebSocketConfig};
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::rooms::{BroadcastRouter, RoomRegistry};
use crate::ws::session;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by every connection task.
#[derive(Debug)]
pub struct RelayContext {
    pub router: BroadcastRouter,
    pub config: WebSocketConfig,
    pub tracker: ConnectionTracker,
}

impl RelayContext {
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.router.registry()
    }
}

/// WebSocket room relay server.
pub struct RelayServer {
    context: Arc<RelayContext>,
    drain_timeout: Duration,
}

impl RelayServer {
    /// Create a server with an empty registry.
    pub fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let context = RelayContext {
            router: BroadcastRouter::new(registry),
            config: config.websocket.clone(),
            tracker: ConnectionTracker::new(),
        };
        Self {
            context: Arc::new(context),
            drain_timeout: config.lifecycle.drain_timeout(),
        }
    }

    /// Shared state, for inspection while the server runs.
    pub fn context(&self) -> Arc<RelayContext> {
        Arc::clone(&self.context)
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// A dropped shutdown sender counts as a shutdown request.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Relay server starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let context = Arc::clone(&self.context);
                        let guard = context.tracker.track();
                        tokio::spawn(async move {
                            session::serve(stream, peer, context, guard).await;
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.drain().await;
        tracing::info!("Relay server stopped");
        Ok(())
    }

    async fn drain(&self) {
        let tracker = &self.context.tracker;
        tracing::info!(active = tracker.active_count(), "Draining connections");
        tracker.begin_drain();

        if tokio::time::timeout(self.drain_timeout, tracker.wait_for_shutdown())
            .await
            .is_err()
        {
            tracing::warn!(remaining = tracker.active_count(), "Drain timeout elapsed");
        }
    }
}
