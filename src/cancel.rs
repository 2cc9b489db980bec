//! One-shot broadcast cancellation.
//!
//! A [`CancellationToken`] is created fresh for every archive or extraction
//! run and threaded into each suspend point of the operation. Anything
//! holding a clone may flip it exactly once; in-flight work observes the
//! flag between filesystem steps and between copy chunks, and registered
//! callbacks fire synchronously on the cancelling thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::ArchiveError;

type Callback = Box<dyn FnOnce() + Send>;

/// Recovers the guard from a poisoned lock.
///
/// Callbacks never run while the subscriber lock is held, so poisoning is
/// not expected; recovering keeps `cancel` usable even if it happens.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

/// A shareable, one-shot cancellation signal.
///
/// The token transitions once from not-cancelled to cancelled and stays
/// there; a fresh token is created per operation rather than reset. Clones
/// share state, so any clone can cancel and every clone observes it.
///
/// # Examples
///
/// ```
/// use zipyard::CancellationToken;
///
/// let token = CancellationToken::new();
/// let seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
/// let flag = seen.clone();
/// let _sub = token.on_cancelled(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Flips the token and fires every registered callback exactly once.
    ///
    /// The first call drains and invokes the subscriber set; later calls
    /// are no-ops. Callbacks run synchronously on the cancelling thread,
    /// outside the internal lock, so they may interact with the token.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = std::mem::take(&mut *lock(&self.inner.subscribers));
        for (_, callback) in drained {
            callback();
        }
    }

    /// Registers a callback to fire on cancellation.
    ///
    /// If the token is already cancelled the callback is invoked
    /// synchronously and an inert [`Subscription`] is returned. Otherwise
    /// the callback fires exactly once when [`cancel`](Self::cancel) runs,
    /// unless the returned subscription is dropped first.
    ///
    /// A registration racing a concurrent `cancel` still fires exactly
    /// once: the flag is re-checked under the subscriber lock, so either
    /// the drain sees the callback or this call sees the flag.
    pub fn on_cancelled(&self, callback: impl FnOnce() + Send + 'static) -> Subscription {
        {
            let mut subscribers = lock(&self.inner.subscribers);
            if !self.is_cancelled() {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                subscribers.push((id, Box::new(callback)));
                return Subscription {
                    inner: Arc::downgrade(&self.inner),
                    id,
                };
            }
        }
        callback();
        Subscription {
            inner: Weak::new(),
            id: 0,
        }
    }

    /// Returns `Err(Canceled)` once the token has fired.
    pub(crate) fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(ArchiveError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Substitutes `Canceled` for any error that co-occurred with a
    /// cancellation request, so callers can always branch on the kind.
    pub(crate) fn wrap(&self, err: ArchiveError) -> ArchiveError {
        if self.is_cancelled() {
            ArchiveError::Canceled
        } else {
            err
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Guard for a callback registered with
/// [`CancellationToken::on_cancelled`].
///
/// Dropping the guard (or calling [`unsubscribe`](Self::unsubscribe))
/// removes the callback if it has not fired yet; after the token fired,
/// both are no-ops.
#[must_use = "dropping a Subscription immediately unregisters its callback"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Removes the callback without waiting for the guard to go out of
    /// scope.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Cross-thread cancel control for a [`Zip`](crate::Zip) or
/// [`Unzip`](crate::Unzip) instance.
///
/// `archive` and `extract` take `&mut self`, so the instance itself cannot
/// be shared with another thread while an operation runs. A `CancelHandle`
/// can: it tracks whichever token the instance's current operation
/// installed, and [`cancel`](Self::cancel) fires that token. Cancelling
/// between operations flips a token nobody is watching; the next operation
/// installs a fresh one and is unaffected.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Replaces the slot with a fresh token for a new operation.
    pub(crate) fn install_fresh(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.slot) = token.clone();
        token
    }

    /// Cancels the operation currently using this handle's instance.
    ///
    /// Idempotent, and a no-op when no operation is in flight (the stale
    /// token fires without observers). For an archive run this also means
    /// the partially-written output file is removed before the operation
    /// returns [`Canceled`](crate::ArchiveError::Canceled).
    pub fn cancel(&self) {
        let token = lock(&self.slot).clone();
        token.cancel();
    }

    /// Returns `true` while the current token is in the cancelled state.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        lock(&self.slot).is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
