use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// One-shot shutdown latch shared by every long-running component.
/// Trips on SIGINT/SIGTERM, on `/api/quit`, or on an unrecoverable
/// camera failure.
pub struct ShutdownHandler {
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Install the signal listeners and hand out the guard.
    pub fn install(self) -> Arc<ShutdownGuard> {
        let guard = Arc::new(ShutdownGuard {
            shutdown_requested: self.shutdown_requested,
            shutdown_notify: self.shutdown_notify,
        });

        let signal_guard = Arc::clone(&guard);
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown requested via signal");
            signal_guard.request_shutdown();
        });

        guard
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};
    let mut term = match unix_signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            let _ = signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = signal::ctrl_c().await;
}

pub struct ShutdownGuard {
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.shutdown_notify.notified().await;
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_request() {
        let guard = ShutdownHandler::new().install();
        let waiter = Arc::clone(&guard);
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(guard.is_shutdown_requested());
    }

    #[tokio::test]
    async fn wait_is_immediate_once_tripped() {
        let guard = ShutdownHandler::new().install();
        guard.request_shutdown();
        tokio::time::timeout(Duration::from_millis(100), guard.wait())
            .await
            .expect("already-tripped guard must not block");
    }
}
