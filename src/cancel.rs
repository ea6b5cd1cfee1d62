use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloneable handle used by external triggers (signal handlers, UI threads, tests) to stop a run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Idempotent; safe from any thread.
    pub fn signal(&self) {
        self.token.cancel();
    }

    pub fn is_signaled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is raised.
    pub async fn signaled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
struct Listener {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-run stop signal plus the listener tasks that may raise it.
///
/// Cancellation is cooperative: workers check the flag between probes, so an in-flight
/// probe always finishes and is recorded.
#[derive(Debug, Default)]
pub struct CancellationController {
    token: CancellationToken,
    listeners: Vec<Listener>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    pub fn signal(&self) {
        if !self.token.is_cancelled() {
            info!("cancellation requested");
        }
        self.token.cancel();
    }

    pub fn is_signaled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is raised.
    pub async fn signaled(&self) {
        self.token.cancelled().await
    }

    /// Spawn a listener that raises the flag when `trigger` completes.
    ///
    /// Must be called from within a tokio runtime. The listener is stopped and joined by
    /// [`CancellationController::shutdown`].
    pub fn watch<F>(&mut self, trigger: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let stop = CancellationToken::new();
        let stop_listener = stop.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = stop_listener.cancelled() => {}
                _ = token.cancelled() => {}
                _ = trigger => {
                    debug!("cancel trigger fired");
                    token.cancel();
                }
            }
        });
        self.listeners.push(Listener { stop, handle });
    }

    /// Raise the flag on Ctrl-C.
    pub fn watch_ctrl_c(&mut self) {
        self.watch(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C; cancellation only via handle");
                std::future::pending::<()>().await;
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop every listener and wait for it to exit. Does not raise the flag.
    pub async fn shutdown(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.stop.cancel();
            if let Err(e) = listener.handle.await {
                warn!(error = %e, "cancel listener ended abnormally");
            }
        }
    }
}
