//! Cancellation Scopes
//!
//! A [`Scope`] is a cancellation/resource-cleanup boundary. Each port
//! session owns one, forked as a child of the runner's root scope: closing
//! the root transitively closes every child, while closing one child never
//! affects its siblings. Closing a session's scope interrupts every fiber
//! forked under it; this is the only cancellation path. There is no
//! per-message cancellation token.
//!
//! Built on `tokio::sync::watch` so that any number of observers can await
//! closure without polling.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation boundary
///
/// Cheap to clone; all clones observe the same closure. Closing is
/// idempotent and cannot be undone.
#[derive(Debug, Clone)]
pub struct Scope {
    closed: Arc<watch::Sender<bool>>,
}

impl Scope {
    /// Create a new open scope with no parent
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            closed: Arc::new(tx),
        }
    }

    /// Fork a child scope
    ///
    /// Closing `self` transitively closes the child; closing the child has
    /// no effect on `self` or on sibling children.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn child(&self) -> Scope {
        let child = Scope::new();

        let mut parent = self.closed.subscribe();
        let link = Arc::clone(&child.closed);
        tokio::spawn(async move {
            // wait_for errs when the parent scope is dropped without
            // closing; in that case the child is on its own.
            if parent.wait_for(|closed| *closed).await.is_ok() {
                link.send_replace(true);
            }
        });

        child
    }

    /// Close this scope, interrupting everything forked under it
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether this scope has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once this scope is closed
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives at least as long as &self, so this cannot err.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
