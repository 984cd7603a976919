use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Change signal with a generation counter, shared by state writers and one
/// consuming worker.
///
/// Writers call `bump()` after mutating their state; the worker waits on
/// `notified()`, snapshots the generation, recomputes, and compares the
/// generation afterwards. A mismatch means some input moved mid-computation
/// and the result must be thrown away and recomputed from the latest values.
/// `Notify` alone would coalesce wakeups but could not tell the worker that
/// its inputs changed under it.
///
/// Bumps that land while the worker is busy coalesce into a single stored
/// permit plus a generation jump, so the worker recomputes exactly once more
/// with the newest state. No change is ever lost and no stale result is ever
/// published.
pub(crate) struct ChangeSignal {
    generation: AtomicU64,
    notify: Notify,
}

impl ChangeSignal {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Record a change and wake the worker.
    pub(crate) fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wait for the next bump. A permit stored by a bump that happened while
    /// nobody was waiting makes this return immediately once.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bump_wakes_a_waiter() {
        let signal = Arc::new(ChangeSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move {
                signal.notified().await;
            })
        };

        // Give the waiter a chance to park first
        tokio::task::yield_now().await;
        signal.bump();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after bump")
            .unwrap();
    }

    #[tokio::test]
    async fn test_bump_before_wait_is_not_lost() {
        let signal = ChangeSignal::new();
        signal.bump();

        tokio::time::timeout(Duration::from_millis(100), signal.notified())
            .await
            .expect("stored permit should satisfy the next wait");
    }

    #[tokio::test]
    async fn test_generation_counts_every_bump() {
        let signal = ChangeSignal::new();
        let start = signal.generation();
        signal.bump();
        signal.bump();
        signal.bump();
        assert_eq!(signal.generation(), start + 3);
    }

    #[tokio::test]
    async fn test_coalesced_bumps_move_generation() {
        let signal = ChangeSignal::new();

        // Several bumps with no waiter: one permit, three generations
        signal.bump();
        let seen = signal.generation();
        signal.bump();
        signal.bump();

        tokio::time::timeout(Duration::from_millis(100), signal.notified())
            .await
            .expect("permit present");
        assert_ne!(
            signal.generation(),
            seen,
            "a worker that snapshotted early must observe the drift"
        );
    }
}
