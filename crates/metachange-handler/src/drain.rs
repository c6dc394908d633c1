//! A task group that can be drained.
//!
//! Every task that touches shared state holds a [`DrainLock`]. Draining
//! stops new locks from being issued and waits for the outstanding ones to be
//! released, after which the shared state can be torn down.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Drainer {
    inner: Arc<DrainerInner>,
}

#[derive(Default)]
struct DrainerInner {
    state: Mutex<DrainState>,
    released: Notify,
}

#[derive(Default)]
struct DrainState {
    outstanding: usize,
    draining: bool,
}

impl Drainer {
    /// A drainer with no outstanding locks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a lock, or `None` once draining has begun.
    pub fn lock(&self) -> Option<DrainLock> {
        let mut state = self.inner.state.lock();
        if state.draining {
            return None;
        }
        state.outstanding += 1;
        Some(DrainLock {
            inner: self.inner.clone(),
        })
    }

    /// Locks handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Whether [`drain`](Self::drain) has been called.
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Refuse new locks and wait until every outstanding lock is released.
    pub async fn drain(&self) {
        self.inner.state.lock().draining = true;
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            if self.inner.state.lock().outstanding == 0 {
                return;
            }
            released.await;
        }
    }
}

/// Keeps a [`Drainer`] from completing its drain while held.
pub struct DrainLock {
    inner: Arc<DrainerInner>,
}

impl Drop for DrainLock {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.inner.released.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_locks() {
        let drainer = Drainer::new();
        let lock = drainer.lock().unwrap();
        assert_eq!(drainer.outstanding(), 1);

        let waiter = {
            let drainer = drainer.clone();
            tokio::spawn(async move { drainer.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(drainer.is_draining());
        assert!(drainer.lock().is_none());

        drop(lock);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain should complete")
            .unwrap();
        assert_eq!(drainer.outstanding(), 0);
    }

    #[tokio::test]
    async fn drain_with_nothing_outstanding_is_immediate() {
        let drainer = Drainer::new();
        drop(drainer.lock());
        drainer.drain().await;
    }
}
