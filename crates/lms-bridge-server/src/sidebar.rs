//! Handle to the sidebar frame that last called into the server

use lms_bridge_core::FrameRef;
use std::fmt;
use tokio::sync::watch;

/// Frame and origin of the embedded client, captured from the first valid
/// JSON-RPC message the server receives.
#[derive(Clone)]
pub struct SidebarWindow {
    pub frame: FrameRef,
    pub origin: String,
}

impl fmt::Debug for SidebarWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidebarWindow")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Single-assignment slot: only the first `resolve` takes effect.
pub(crate) struct SidebarLatch {
    tx: watch::Sender<Option<SidebarWindow>>,
}

impl SidebarLatch {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Returns true if this call set the value.
    pub(crate) fn resolve(&self, window: SidebarWindow) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(window);
            true
        })
    }

    pub(crate) fn get(&self) -> Option<SidebarWindow> {
        self.tx.borrow().clone()
    }

    pub(crate) async fn wait(&self) -> SidebarWindow {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(window) = current {
                return window;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender
                std::future::pending::<()>().await;
            }
        }
    }
}
