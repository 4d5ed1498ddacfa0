#![forbid(unsafe_code)]

//! One-shot cancellation signals and callback registration.
//!
//! # Design
//!
//! [`CancelSource`] is the firing side; [`CancelToken`] is the handle
//! observers register against. Firing is idempotent: the first
//! [`cancel()`](CancelSource::cancel) drains and runs the registered
//! callbacks, every later call is a no-op. Callbacks run outside the
//! registration lock, so a callback may release its own
//! [`Registration`] re-entrantly.
//!
//! A token built with [`CancelToken::never()`] can never fire; callers
//! can test for that with
//! [`can_be_cancelled()`](CancelSignal::can_be_cancelled) and skip
//! registration entirely.
//!
//! # Invariants
//!
//! 1. Each registered callback runs at most once, whether consumed by
//!    the fire path or raced by its own release.
//! 2. `Registration::release()` is idempotent; releasing after the
//!    signal fired is a no-op.
//! 3. Registering on an already-fired signal runs the callback inline
//!    and returns an already-released registration.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

/// Callback type accepted by [`CancelSignal::register`].
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// External cancellation interface consumed by the subscription layer.
pub trait CancelSignal {
    /// Whether this signal can ever fire. A signal that cannot fire
    /// needs no bridging at all.
    fn can_be_cancelled(&self) -> bool;

    /// Whether the signal has already fired.
    fn is_cancelled(&self) -> bool;

    /// Register a callback to run when the signal fires. If the signal
    /// already fired, the callback runs inline and the returned
    /// registration is already released.
    fn register(&self, callback: CancelCallback) -> Registration;
}

struct CancelInner {
    fired: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, CancelCallback)>>,
}

impl CancelInner {
    fn remove(&self, id: u64) -> Option<CancelCallback> {
        let mut callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let index = callbacks.iter().position(|(entry, _)| *entry == id)?;
        Some(callbacks.swap_remove(index).1)
    }
}

/// The firing side of a one-shot cancellation signal.
pub struct CancelSource {
    inner: Arc<CancelInner>,
}

impl CancelSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                fired: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A token observers can register against.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Fire the signal. The first call runs every registered callback
    /// (outside the lock); later calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("cancellation fired");
        let callbacks = {
            let mut table = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *table)
        };
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Observer-side handle to a [`CancelSource`], or a signal that can
/// never fire ([`CancelToken::never()`]).
#[derive(Clone)]
pub struct CancelToken {
    inner: Option<Arc<CancelInner>>,
}

impl CancelToken {
    /// A token that can never be cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self { inner: None }
    }
}

impl CancelSignal for CancelToken {
    fn can_be_cancelled(&self) -> bool {
        self.inner.is_some()
    }

    fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.fired.load(Ordering::Acquire))
    }

    fn register(&self, callback: CancelCallback) -> Registration {
        let Some(inner) = &self.inner else {
            // Can never fire: the callback is unreachable, drop it.
            return Registration::released();
        };
        if inner.fired.load(Ordering::Acquire) {
            callback();
            return Registration::released();
        }
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        // The fire path may have drained the table between our check
        // and the push. If it fired, whoever removes the entry runs it.
        if inner.fired.load(Ordering::Acquire) {
            if let Some(callback) = inner.remove(id) {
                callback();
            }
            return Registration::released();
        }
        Registration {
            entry: Mutex::new(Some((Arc::clone(inner), id))),
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A registered cancellation callback. Releasing unregisters the
/// callback if it has not already fired; dropping releases too.
pub struct Registration {
    entry: Mutex<Option<(Arc<CancelInner>, u64)>>,
}

impl Registration {
    fn released() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    /// Unregister the callback. Idempotent; a no-op once the signal
    /// has consumed the callback.
    pub fn release(&self) {
        let taken = self
            .entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((inner, id)) = taken {
            // Dropping the callback (if still present) unregisters it.
            drop(inner.remove(id));
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
