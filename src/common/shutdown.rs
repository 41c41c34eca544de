//! One-shot shutdown signal shared between a component and its background tasks.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

/// Signals shutdown to any number of waiters.
///
/// Once [`Shutdown::shutdown`] is called every pending and future
/// [`Shutdown::wait`] resolves immediately.
#[derive(Debug)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            sender: Arc::new(tx),
        }
    }

    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.sender.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let shutdown = Shutdown::new();
        let wait = shutdown.wait();
        assert!(!shutdown.is_shutdown());
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap();
        // late waiters resolve immediately
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
    }
}
