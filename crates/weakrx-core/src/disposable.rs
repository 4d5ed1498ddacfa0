#![forbid(unsafe_code)]

//! Idempotent resource release and the race-safe single-assignment slot.
//!
//! # Design
//!
//! [`Disposable`] is the release contract every subscription resource
//! honors: calling [`dispose()`](Disposable::dispose) any number of
//! times releases the underlying resource at most once, and release
//! never panics.
//!
//! [`SingleAssignmentDisposable`] exists for one specific race: a
//! `subscribe` call returns its resource only after the call completes,
//! but termination can happen synchronously *during* that same call
//! (the source errors immediately, before the resource was captured).
//! The slot resolves this by making late assignment safe: a resource
//! assigned after disposal is released on the spot instead of stored.
//!
//! # Invariants
//!
//! 1. A held resource is released exactly once, no matter how many
//!    `dispose()` calls race.
//! 2. `set()` after `dispose()` releases the incoming resource
//!    immediately and stores nothing.
//! 3. No internal lock is held while a resource's `dispose()` runs, so
//!    release may re-enter the slot without deadlock.
//!
//! # Failure Modes
//!
//! - **Double `set` while not disposed**: a programmer error (the slot
//!   is single-assignment by contract). Debug builds assert; release
//!   builds dispose the extra resource so nothing leaks.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

/// An idempotent, non-panicking resource release.
///
/// Implementations must tolerate any number of `dispose` calls,
/// including concurrent ones, and must not panic: release runs inside
/// termination paths that cannot recover from an unwinding resource.
pub trait Disposable: Send + Sync {
    /// Release the underlying resource. Idempotent.
    fn dispose(&self);
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

/// Adapts a closure into a [`Disposable`] that runs it at most once.
pub struct DisposeFn {
    f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DisposeFn {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Mutex::new(Some(Box::new(f))),
        }
    }
}

impl Disposable for DisposeFn {
    fn dispose(&self) {
        let f = self
            .f
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(f) = f {
            f();
        }
    }
}

impl std::fmt::Debug for DisposeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeFn").finish_non_exhaustive()
    }
}

/// Slot state. `Disposed` is terminal.
enum Slot {
    Empty,
    Set(Box<dyn Disposable>),
    Disposed,
}

/// A race-safe, single-assignment resource slot.
///
/// Holds at most one resource over its lifetime. Disposal releases the
/// held resource exactly once; a resource assigned after disposal is
/// released immediately rather than stored.
///
/// The exactly-once decision on observer paths is made by the owning
/// observer's atomic flag; this slot's own critical sections are
/// swap-sized and never enclose user code.
pub struct SingleAssignmentDisposable {
    /// Fast-path mirror of `Slot::Disposed`, readable without the lock.
    disposed: AtomicBool,
    slot: Mutex<Slot>,
}

impl SingleAssignmentDisposable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            disposed: AtomicBool::new(false),
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Whether the slot has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Assign the subscription resource.
    ///
    /// If the slot was already disposed (termination raced ahead of the
    /// `subscribe` call), the resource is released immediately. A second
    /// `set` while not disposed is a programmer error: debug builds
    /// assert, release builds dispose the extra resource.
    pub fn set(&self, resource: Box<dyn Disposable>) {
        let late = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Empty => {
                    *slot = Slot::Set(resource);
                    None
                }
                Slot::Disposed => Some(resource),
                Slot::Set(_) => {
                    debug_assert!(false, "SingleAssignmentDisposable::set called twice");
                    Some(resource)
                }
            }
        };
        if let Some(resource) = late {
            trace!("late assignment, releasing immediately");
            resource.dispose();
        }
    }
}

impl Default for SingleAssignmentDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SingleAssignmentDisposable {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let taken = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *slot, Slot::Disposed) {
                Slot::Set(resource) => Some(resource),
                Slot::Empty | Slot::Disposed => None,
            }
        };
        // Lock dropped before release: the resource may re-enter dispose().
        if let Some(resource) = taken {
            trace!("releasing held subscription resource");
            resource.dispose();
        }
    }
}

impl std::fmt::Debug for SingleAssignmentDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleAssignmentDisposable")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    impl Disposable for Counting {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Box<dyn Disposable>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (Box::new(Counting(Arc::clone(&count))), count)
    }

    #[test]
    fn set_then_dispose_releases_once() {
        let slot = SingleAssignmentDisposable::new();
        let (resource, count) = counting();

        slot.set(resource);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!slot.is_disposed());

        slot.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(slot.is_disposed());
    }

    #[test]
    fn dispose_is_idempotent() {
        let slot = SingleAssignmentDisposable::new();
        let (resource, count) = counting();

        slot.set(resource);
        slot.dispose();
        slot.dispose();
        slot.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_before_set_releases_late_resource() {
        let slot = SingleAssignmentDisposable::new();
        slot.dispose();

        let (resource, count) = counting();
        slot.set(resource);
        // Released immediately, never stored.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_without_resource_is_noop() {
        let slot = SingleAssignmentDisposable::new();
        slot.dispose();
        assert!(slot.is_disposed());
    }

    #[test]
    fn reentrant_dispose_from_release_does_not_deadlock() {
        let slot = Arc::new(SingleAssignmentDisposable::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_slot = Arc::clone(&slot);
        let inner_count = Arc::clone(&count);
        slot.set(Box::new(DisposeFn::new(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            // Release runs outside the slot lock, so this must not hang.
            inner_slot.dispose();
        })));

        slot.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_fn_runs_at_most_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let d = DisposeFn::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        d.dispose();
        d.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_dispose_releases_exactly_once() {
        use std::thread;

        for _ in 0..64 {
            let slot = Arc::new(SingleAssignmentDisposable::new());
            let (resource, count) = counting();
            slot.set(resource);

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let slot = Arc::clone(&slot);
                    thread::spawn(move || slot.dispose())
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }
}
