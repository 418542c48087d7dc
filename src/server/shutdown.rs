//! Shutdown signalling for a running [`Server`](crate::server::Server).

use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable handle that asks the server loop to stop.
///
/// A request made before the loop starts waiting is remembered, so a
/// shutdown is never lost.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}
