//! Peer side of the relay pipe.

use super::pipe::{self, ClientStream};
use crate::Result;
use protocol::{DelegateMessage, codec};
use std::path::Path;

/// An established connection to a relay server.
///
/// Not Clone; one connection per peer.
pub struct PeerConnection {
    stream: ClientStream,
}

impl PeerConnection {
    /// Connect to the relay listening at `endpoint`.
    pub async fn connect(endpoint: &Path) -> Result<Self> {
        let stream = pipe::connect(endpoint).await?;
        tracing::debug!("connected to {}", endpoint.display());
        Ok(Self { stream })
    }

    pub async fn send(&mut self, message: &DelegateMessage) -> Result<()> {
        codec::write_message(&mut self.stream, message).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<DelegateMessage> {
        Ok(codec::read_message(&mut self.stream).await?)
    }

    /// Send a message and wait for the next one from the server.
    pub async fn exchange(&mut self, message: &DelegateMessage) -> Result<DelegateMessage> {
        self.send(message).await?;
        self.recv().await
    }
}
