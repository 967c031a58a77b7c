use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct CancellationState {
    signal: Notify,
    is_cancellation_requested: AtomicBool,
}

/// Lightweight scoped-shutdown signal shared by the Supervisor, Connector
/// and every Trader. Cloning is cheap (an `Arc` clone); every clone observes
/// the same cancellation.
#[derive(Default, Clone)]
pub struct CancellationToken {
    state: Arc<CancellationState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let state = &self.state;
        state
            .is_cancellation_requested
            .store(true, Ordering::SeqCst);
        state.signal.notify_waiters();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.is_cancellation_requested.load(Ordering::SeqCst)
    }

    pub async fn when_cancelled(&self) {
        let action = async {
            if self.is_cancellation_requested() {
                return;
            }
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = self.state.signal.notified() => {}
            _ = action => {}
        }
    }
}
