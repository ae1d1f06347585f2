//! Bounded FIFO of delegate messages with an awaitable non-empty signal.

use crate::cancel::CancelHandle;
use parking_lot::Mutex;
use protocol::DelegateMessage;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// One direction of the relay.
///
/// Producers append at the back; the single consumer peeks the front,
/// handles it and only then pops it.
#[derive(Debug)]
pub struct DelegateQueue {
    messages: Mutex<VecDeque<DelegateMessage>>,
    notify: Notify,
    capacity: usize,
}

impl DelegateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message. Returns `false` if the queue was full and the
    /// message was dropped.
    pub fn push(&self, message: DelegateMessage) -> bool {
        {
            let mut messages = self.messages.lock();
            if messages.len() >= self.capacity {
                tracing::warn!(
                    "relay queue full ({} messages), dropping message",
                    self.capacity
                );
                return false;
            }
            messages.push_back(message);
        }
        self.notify.notify_waiters();
        true
    }

    /// Take every queued message in order.
    pub fn pop_all(&self) -> Vec<DelegateMessage> {
        self.messages.lock().drain(..).collect()
    }

    /// Clone of the oldest message.
    pub fn front(&self) -> Option<DelegateMessage> {
        self.messages.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<DelegateMessage> {
        self.messages.lock().pop_front()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Wait until the queue holds a message.
    ///
    /// Returns `false` if `stop` fired first.
    pub async fn wait_non_empty(&self, stop: &CancelHandle) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent push cannot be missed.
            notified.as_mut().enable();
            if !self.is_empty() {
                return true;
            }
            if stop.is_cancelled() {
                return false;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = stop.cancelled() => return false,
            }
        }
    }
}
