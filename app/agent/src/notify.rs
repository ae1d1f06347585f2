//! Lifecycle notifications raised by the dispatcher.
//!
//! Each notification has exactly one subscriber per agent instance: the
//! receiver returned by [`Notifier::channel`].

use crate::job::Job;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A request for an external lifecycle manager, carrying the originating job.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Terminate the agent.
    ExitRequested(Arc<Job>),
    /// Start the peer forwarder (`link`).
    StartForwarder(Arc<Job>),
    /// Stop the peer forwarder (`unlink`).
    StopForwarder(Arc<Job>),
    /// Start the SOCKS proxy.
    StartSocks(Arc<Job>),
    /// Stop the SOCKS proxy.
    StopSocks(Arc<Job>),
    /// Reconfigure sleep and jitter.
    SetSleepAndJitter(Arc<Job>),
}

impl Notification {
    /// The job that raised the notification.
    pub fn job(&self) -> &Arc<Job> {
        match self {
            Self::ExitRequested(job)
            | Self::StartForwarder(job)
            | Self::StopForwarder(job)
            | Self::StartSocks(job)
            | Self::StopSocks(job)
            | Self::SetSleepAndJitter(job) => job,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExitRequested(_) => "exit",
            Self::StartForwarder(_) => "start-forwarder",
            Self::StopForwarder(_) => "stop-forwarder",
            Self::StartSocks(_) => "start-socks",
            Self::StopSocks(_) => "stop-socks",
            Self::SetSleepAndJitter(_) => "sleep",
        }
    }
}

/// Fire-and-forget sender side of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Create a notifier and its single subscriber.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit a notification. Dropped with a warning when nobody listens.
    pub fn notify(&self, notification: Notification) {
        let kind = notification.kind();
        let id = notification.job().task.id.clone();
        if self.tx.send(notification).is_err() {
            tracing::warn!("no subscriber for {kind} notification from task {id}");
        } else {
            tracing::debug!("raised {kind} notification for task {id}");
        }
    }
}
