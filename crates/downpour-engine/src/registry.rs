//! Live transfer registry.
//!
//! One entry per task with an attempt in flight. Each entry carries the
//! control surface a running attempt shares with the outside world: a
//! pause flag, a cancellation token, and a lease number that makes stale
//! attempts unable to clobber registry state after they've been replaced.
//!
//! The inner mutex is a `std::sync` one and is never held across an
//! await point.

use downpour_core::{TaskId, TransferError, TransferResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveTransfer {
    paused: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
    cancel: CancellationToken,
    lease: u64,
    /// Resolves when the attempt holding the matching sender finishes.
    done_rx: Option<oneshot::Receiver<()>>,
}

/// Sends the completion signal when the owning attempt drops its handle.
#[derive(Debug)]
struct DoneGuard(Option<oneshot::Sender<()>>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Control handle owned by one transfer attempt.
#[derive(Debug)]
pub struct TransferHandle {
    id: TaskId,
    paused: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
    cancel: CancellationToken,
    lease: u64,
    prior_done: Option<oneshot::Receiver<()>>,
    _done: DoneGuard,
}

impl TransferHandle {
    /// The task this attempt belongs to.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Lease number identifying this attempt in the registry.
    #[must_use]
    pub const fn lease(&self) -> u64 {
        self.lease
    }

    /// Whether a pause was requested for this attempt.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether this attempt was evicted by a newer one. A detached
    /// attempt must stop without emitting terminal events.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// The cancellation token to select against in the transfer loop.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the previous attempt on the same task to fully finish,
    /// so two attempts never hold the destination file at once.
    pub async fn wait_for_predecessor(&mut self) {
        if let Some(rx) = self.prior_done.take() {
            // a dropped sender counts as finished
            let _ = rx.await;
        }
    }
}

/// Registry of transfers with an attempt in flight.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    inner: Mutex<HashMap<TaskId, ActiveTransfer>>,
    next_lease: AtomicU64,
}

impl TransferRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new attempt for `id`, returning its control handle.
    ///
    /// Any prior attempt for the same task is detached and cancelled;
    /// the returned handle can wait for it to release the file before
    /// touching disk.
    pub fn register(&self, id: &TaskId) -> TransferHandle {
        let lease = self.next_lease.fetch_add(1, Ordering::SeqCst);
        let paused = Arc::new(AtomicBool::new(false));
        let detached = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prior_done = inner.remove(id).and_then(|prior| {
            prior.detached.store(true, Ordering::SeqCst);
            prior.cancel.cancel();
            prior.done_rx
        });
        inner.insert(
            id.clone(),
            ActiveTransfer {
                paused: Arc::clone(&paused),
                detached: Arc::clone(&detached),
                cancel: cancel.clone(),
                lease,
                done_rx: Some(done_rx),
            },
        );
        drop(inner);

        TransferHandle {
            id: id.clone(),
            paused,
            detached,
            cancel,
            lease,
            prior_done,
            _done: DoneGuard(Some(done_tx)),
        }
    }

    /// Request a pause for the live transfer of `id`.
    ///
    /// The pause flag is raised before the token is cancelled so the
    /// transfer loop observing cancellation can tell pause from failure.
    pub fn pause(&self, id: &TaskId) -> TransferResult<()> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = inner.get(id) else {
            return Err(TransferError::not_found(id.as_str()));
        };
        entry.paused.store(true, Ordering::SeqCst);
        entry.cancel.cancel();
        Ok(())
    }

    /// Remove the entry for `id` if it still belongs to `lease`.
    ///
    /// A stale attempt deregistering after replacement is a no-op.
    pub fn deregister(&self, id: &TaskId, lease: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.get(id).is_some_and(|entry| entry.lease == lease) {
            inner.remove(id);
        }
    }

    /// Drop all control state for `id`, cancelling any live attempt
    /// silently. Idempotent.
    pub fn cleanup(&self, id: &TaskId) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = inner.remove(id) {
            entry.detached.store(true, Ordering::SeqCst);
            entry.cancel.cancel();
        }
    }

    /// Whether `id` currently has a registered attempt.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(id)
    }
}
