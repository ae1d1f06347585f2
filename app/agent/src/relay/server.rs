//! Peer relay server: accept loop and the per-peer bridge.

use super::{pipe::Listener, queue::DelegateQueue};
use crate::{Result, cancel::CancelHandle, context::AppContext, error::Error};
use protocol::{
    DelegateMessage,
    codec::{self, FrameError},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    task::JoinHandle,
};

/// Lifecycle state of the relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Constructed, not started.
    Idle,
    /// Waiting for a peer to connect.
    Listening,
    /// Moving messages between a connected peer and the queues.
    Bridging,
    /// Stopped for good.
    Stopped,
}

/// Bridges one pipe-connected peer at a time to the delegate queues.
pub struct RelayServer {
    endpoint: PathBuf,
    retry_delay: Duration,
    /// Controller → peer.
    to_peer: DelegateQueue,
    /// Peer → controller.
    from_peer: DelegateQueue,
    stop: CancelHandle,
    state: watch::Sender<RelayState>,
}

impl RelayServer {
    /// Build a relay server from the relay section of the configuration.
    ///
    /// The server also stops when the agent shuts down.
    pub fn new(ctx: &AppContext) -> Self {
        let config = &ctx.config.relay;
        let (state, _) = watch::channel(RelayState::Idle);
        Self {
            endpoint: config.endpoint(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            to_peer: DelegateQueue::new(config.queue_capacity),
            from_peer: DelegateQueue::new(config.queue_capacity),
            stop: ctx.shutdown.child(),
            state,
        }
    }

    /// Endpoint the server listens on.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Spawn the accept loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Queue a message for the connected (or next) peer.
    pub fn forward(&self, message: DelegateMessage) -> bool {
        self.to_peer.push(message)
    }

    /// Take every message received from peers so far.
    pub fn take_messages(&self) -> Vec<DelegateMessage> {
        self.from_peer.pop_all()
    }

    /// Messages still waiting to be written to a peer.
    pub fn pending(&self) -> usize {
        self.to_peer.len()
    }

    /// Stop the server permanently. Honoured within one loop iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    async fn run(&self) {
        tracing::info!("relay listening on {}", self.endpoint.display());
        while !self.stop.is_cancelled() {
            let listener = match Listener::bind(&self.endpoint) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!("failed to bind {}: {e}", self.endpoint.display());
                    if !self.back_off().await {
                        break;
                    }
                    continue;
                }
            };
            self.state.send_replace(RelayState::Listening);

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.stop.cancelled() => break,
            };
            let mut stream = match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("failed to accept peer: {e}");
                    if !self.back_off().await {
                        break;
                    }
                    continue;
                }
            };

            tracing::info!("peer connected");
            self.state.send_replace(RelayState::Bridging);
            match self.bridge(&mut stream).await {
                Ok(()) => tracing::debug!("bridge stopped"),
                Err(Error::Transport(FrameError::ConnectionClosed)) => {
                    tracing::info!("peer disconnected");
                    self.from_peer.clear();
                }
                Err(e) => {
                    tracing::warn!("relay transport failed, restarting: {e}");
                    self.from_peer.clear();
                }
            }
        }

        self.state.send_replace(RelayState::Stopped);
        tracing::info!("relay stopped");
    }

    /// Wait out the retry delay. Returns `false` if the server was stopped
    /// meanwhile.
    async fn back_off(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_delay) => true,
            _ = self.stop.cancelled() => false,
        }
    }

    /// Exchange messages with one peer until the transport fails or the
    /// server is stopped.
    ///
    /// Each round reads one inbound frame, then waits for outbound traffic
    /// and writes it out. Outbound messages are removed only once written.
    async fn bridge<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let message = tokio::select! {
                read = codec::read_message::<_, DelegateMessage>(&mut *stream) => read?,
                _ = self.stop.cancelled() => return Ok(()),
            };
            tracing::trace!("received {} bytes from peer", message.message.len());
            self.from_peer.push(message);

            if !self.to_peer.wait_non_empty(&self.stop).await {
                return Ok(());
            }
            while let Some(message) = self.to_peer.front() {
                tokio::select! {
                    written = codec::write_message(&mut *stream, &message) => written?,
                    _ = self.stop.cancelled() => return Ok(()),
                }
                self.to_peer.pop_front();
            }
        }
    }
}
