//! Application context shared by the dispatcher and the relay server.

use crate::{
    cancel::CancelHandle,
    config::AgentConfig,
    notify::{Notification, Notifier},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// State constructed once at startup and passed by reference into the
/// dispatcher and relay server constructors.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Agent configuration (immutable after init).
    pub config: Arc<AgentConfig>,
    /// Root cancellation handle; fires on agent shutdown.
    pub shutdown: CancelHandle,
    /// Outbound lifecycle notifications.
    pub notifier: Notifier,
}

impl AppContext {
    /// Build a context and return the receiving end of its notifications.
    pub fn new(config: AgentConfig) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        let ctx = Self {
            config: Arc::new(config),
            shutdown: CancelHandle::new(),
            notifier,
        };
        (ctx, rx)
    }
}
