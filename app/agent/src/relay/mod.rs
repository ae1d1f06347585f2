//! Peer relay: length-prefixed message bridging between a pipe-connected
//! peer and the controller-facing delegate queues.

pub mod client;
pub mod pipe;
pub mod queue;
pub mod server;

pub use client::PeerConnection;
pub use queue::DelegateQueue;
pub use server::{RelayServer, RelayState};
