//! Cooperative cancellation handles.
//!
//! Cancellation is advisory: long-running code polls [`CancelHandle::is_cancelled`]
//! at loop boundaries or races its I/O against [`CancelHandle::cancelled`].

use std::{pin::Pin, sync::Arc};
use tokio::sync::watch;

/// A cloneable cancellation flag, optionally chained to a parent.
///
/// A handle reports cancellation when it or any of its ancestors is
/// cancelled; cancelling a handle never affects its ancestors.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    own: Arc<watch::Sender<bool>>,
    parent: Option<Arc<CancelHandle>>,
}

impl CancelHandle {
    /// Create a root handle.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            parent: None,
        }
    }

    /// Derive a handle that also observes this handle and its ancestors.
    pub fn child(&self) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.own.send_replace(true);
    }

    /// Whether cancellation has been requested on this handle or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        *self.own.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolve once cancellation has been requested.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut own = self.own.subscribe();
            match &self.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own.wait_for(|c| *c) => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => {
                    let _ = own.wait_for(|c| *c).await;
                }
            }
        })
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn child_observes_parent() {
        let root = CancelHandle::new();
        let child = root.child();
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn grandchild_observes_root() {
        let root = CancelHandle::new();
        let grandchild = root.child().child();
        assert!(!grandchild.is_cancelled());

        let waiter = grandchild.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        root.cancel();
        assert!(grandchild.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn child_cancel_leaves_parent() {
        let root = CancelHandle::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiter() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_set() {
        let root = CancelHandle::new();
        root.cancel();
        let child = root.child();
        tokio::time::timeout(Duration::from_millis(100), child.cancelled())
            .await
            .unwrap();
    }
}
