use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Single-flight gate: at most one task holds it at a time.
#[derive(Debug, Default)]
pub struct AdmissionGuard {
    busy: AtomicBool,
    released: Notify,
}

impl AdmissionGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test-and-set. `None` means a task is already in flight; nothing changes.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AdmissionPermit {
                guard: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Waits until no task is in flight or `grace` elapses. Returns whether the
    /// guard was idle at the end.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.released.notified();
                if !self.is_busy() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }
}

/// Held by the running task. Dropping it releases the guard, so every exit
/// path releases exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    guard: Arc<AdmissionGuard>,
}

impl AdmissionPermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
        self.guard.released.notify_waiters();
    }
}
