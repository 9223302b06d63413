use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct ArmedTimer {
    id: u64,
    token: CancellationToken,
}

/// Single-shot cancellable inactivity timer.
///
/// At most one arm is live: arming again cancels the previous one. The
/// expiry callback runs on its own task, never on the caller of `arm`.
#[derive(Debug, Default)]
pub struct IdleTimer {
    slot: Arc<Mutex<Option<ArmedTimer>>>,
    next_id: AtomicU64,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the countdown. `on_expire` runs exactly once unless the timer is
    /// cancelled or re-armed first.
    pub fn arm<F, Fut>(&self, after: Duration, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.replace(ArmedTimer {
                id,
                token: token.clone(),
            }) {
                debug!("⏲️ Re-arming idle timer, cancelling previous arm");
                previous.token.cancel();
            }
        }

        debug!("⏲️ Idle timer armed for {:?}", after);
        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("⏲️ Idle timer cancelled");
                }
                _ = tokio::time::sleep(after) => {
                    // A cancel that raced with the deadline has already cleared the slot.
                    let fire = {
                        let mut slot = slot.lock();
                        match slot.as_ref() {
                            Some(armed) if armed.id == id => {
                                slot.take();
                                true
                            }
                            _ => false,
                        }
                    };

                    if fire {
                        debug!("⏲️ Idle timeout reached");
                        on_expire().await;
                    }
                }
            }
        });
    }

    /// Disarms the timer. Safe to call when not armed.
    pub fn cancel(&self) {
        if let Some(armed) = self.slot.lock().take() {
            debug!("⏲️ Stopping idle timer");
            armed.token.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (
        Arc<AtomicUsize>,
        impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Clone,
    ) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&fired);
        let make = move || {
            let fired = Arc::clone(&handle);
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let timer = IdleTimer::new();
        let (fired, make) = counter();

        timer.arm(Duration::from_millis(50), make);
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timer = IdleTimer::new();
        let (fired, make) = counter();

        timer.arm(Duration::from_millis(50), make);
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let timer = IdleTimer::new();
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_keeps_single_live_timer() {
        let timer = IdleTimer::new();
        let (fired, make) = counter();

        timer.arm(Duration::from_millis(50), make.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        timer.arm(Duration::from_millis(50), make);

        // First deadline passes without firing.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
