use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::warn;

/// Raises an interrupt for every [`InterruptListener`] created from it
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
        }
    }

    pub fn interrupt(&self) {
        self.sender.send_replace(true);
    }

    pub fn listener(&self) -> InterruptListener {
        InterruptListener {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptListener {
    receiver: watch::Receiver<bool>,
}

impl InterruptListener {
    /// Point in time check
    pub fn is_interrupted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once an interrupt was raised. Never resolves if the handle
    /// is gone without interrupting. Cancel safe.
    pub async fn interrupted(&mut self) {
        if self.receiver.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Raise an interrupt on Ctrl-C
pub fn listen_for_ctrl_c(runtime: &tokio::runtime::Handle) -> InterruptHandle {
    let handle = InterruptHandle::new();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        warn!("Received interrupt, stopping after the current poll");
        listener_handle.interrupt();
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_point_in_time_check() {
        let handle = InterruptHandle::new();
        let listener = handle.listener();
        assert!(!listener.is_interrupted());
        handle.interrupt();
        assert!(listener.is_interrupted());
    }

    #[tokio::test]
    async fn test_late_listener_sees_interrupt() {
        let handle = InterruptHandle::new();
        handle.interrupt();
        let mut listener = handle.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.interrupted())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_never_interrupts() {
        let mut listener = InterruptHandle::new().listener();
        let waited = tokio::time::timeout(Duration::from_millis(30), listener.interrupted()).await;
        assert!(waited.is_err());
    }
}
