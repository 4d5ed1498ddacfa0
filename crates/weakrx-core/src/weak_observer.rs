#![forbid(unsafe_code)]

//! The weak-target observer and its termination state machine.
//!
//! # Design
//!
//! [`WeakObserver`] holds its target behind [`std::sync::Weak`] and
//! resolves it only at delivery time. A successful `upgrade()` yields a
//! strong handle scoped to that one callback invocation: the target
//! cannot be dropped mid-callback, but the observer never extends its
//! lifetime between deliveries.
//!
//! Termination is a single irreversible transition:
//!
//! ```text
//! Active --(error | completed | dispose | target gone)--> Terminated
//! ```
//!
//! Every trigger path runs the same atomic swap on the termination
//! flag; only the winner releases the underlying subscription slot.
//! No lock guards the transition, so a callback that re-enters
//! [`dispose()`](WeakObserver::dispose) (an error handler tearing down
//! its own subscription, say) cannot deadlock.
//!
//! # Invariants
//!
//! 1. `Active → Terminated` happens exactly once, whichever trigger
//!    fires first; later triggers are no-ops.
//! 2. The subscription resource is released exactly once, on the
//!    winning path, including when a terminal callback panics.
//! 3. No callback is invoked once the observer is `Terminated`.
//!
//! # Failure Modes
//!
//! - **`on_next` callback panics**: the panic propagates to the
//!   delivery caller and the observer stays `Active`. A value-callback
//!   panic is deliberately not treated as terminal; whether the source
//!   itself keeps delivering afterward is the source's contract.
//! - **`on_error` / `on_completed` callback panics**: termination and
//!   resource release still happen (drop guard), then the panic
//!   surfaces to the delivery caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::disposable::{Disposable, SingleAssignmentDisposable};
use crate::observer::Observer;

/// Error-path behavior: the fail-loud default, or a user handler.
enum ErrorHandler<T, E> {
    /// No handler supplied: re-raise the error on the delivery thread
    /// after cleanup. The panic closure is built where `E: Debug` is
    /// known so the observer type itself carries no `Debug` bound.
    Rethrow(Box<dyn Fn(E) + Send + Sync>),
    Handler(Box<dyn Fn(&T, E) + Send + Sync>),
}

/// The callback set for a weak subscription: `on_next` is required,
/// `on_error` defaults to rethrow, `on_completed` defaults to no-op.
///
/// Each callback receives the resolved target as its first argument.
///
/// ```
/// use weakrx_core::Callbacks;
///
/// struct View;
/// let callbacks = Callbacks::<View, u32, String>::next(|_view, n| {
///     let _ = n;
/// })
/// .on_error(|_view, err| eprintln!("stream failed: {err}"))
/// .on_completed(|_view| {});
/// ```
pub struct Callbacks<T, I, E> {
    on_next: Box<dyn Fn(&T, I) + Send + Sync>,
    on_error: ErrorHandler<T, E>,
    on_completed: Option<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T: 'static, I: 'static, E: 'static> Callbacks<T, I, E> {
    /// Start a callback set from the value callback alone.
    ///
    /// Unhandled errors are rethrown (panic) on the delivery thread
    /// rather than swallowed, which is why `E: Debug` is required here.
    pub fn next(f: impl Fn(&T, I) + Send + Sync + 'static) -> Self
    where
        E: fmt::Debug,
    {
        Self {
            on_next: Box::new(f),
            on_error: ErrorHandler::Rethrow(Box::new(|err: E| {
                panic!("unhandled error on weak subscription: {err:?}")
            })),
            on_completed: None,
        }
    }

    /// Replace the default rethrow with an explicit error handler.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&T, E) + Send + Sync + 'static) -> Self {
        self.on_error = ErrorHandler::Handler(Box::new(f));
        self
    }

    /// Replace the default no-op completion handler.
    #[must_use]
    pub fn on_completed(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }
}

impl<T, I, E> fmt::Debug for Callbacks<T, I, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field(
                "on_error",
                &match &self.on_error {
                    ErrorHandler::Rethrow(_) => "rethrow",
                    ErrorHandler::Handler(_) => "handler",
                },
            )
            .field("on_completed", &self.on_completed.is_some())
            .finish_non_exhaustive()
    }
}

/// Observer adapter holding its target weakly.
///
/// Created once per subscription attempt, never reused. Implements
/// [`Observer`] so it can be handed straight to a source's `subscribe`,
/// and [`Disposable`] so it can serve as the subscription handle
/// returned to the caller.
pub struct WeakObserver<T, I, E> {
    target: Weak<T>,
    callbacks: Callbacks<T, I, E>,
    /// The termination flag. Single swap-to-true winner across all
    /// trigger paths.
    terminated: AtomicBool,
    subscription: SingleAssignmentDisposable,
}

impl<T, I, E> WeakObserver<T, I, E>
where
    T: Send + Sync + 'static,
    I: 'static,
    E: 'static,
{
    /// Build an observer for `target`. Holds only a weak reference; the
    /// subscription never keeps the target alive.
    #[must_use]
    pub fn new(target: &Arc<T>, callbacks: Callbacks<T, I, E>) -> Self {
        Self {
            target: Arc::downgrade(target),
            callbacks,
            terminated: AtomicBool::new(false),
            subscription: SingleAssignmentDisposable::new(),
        }
    }

    /// Whether the observer has reached its terminal state.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Attach the live subscription resource returned by the source.
    ///
    /// Safe to call after termination has already happened (the source
    /// errored synchronously during `subscribe`): the resource is then
    /// released immediately instead of stored.
    pub fn bind_subscription(&self, resource: Box<dyn Disposable>) {
        self.subscription.set(resource);
    }

    /// Force termination. Idempotent; safe to call from any thread,
    /// including re-entrantly from inside a callback. Only the first
    /// caller across all termination paths performs the release.
    pub fn dispose(&self) {
        if self.claim_termination() {
            trace!("weak subscription disposed");
            self.subscription.dispose();
        }
    }

    /// Swap the termination flag; true if this caller won.
    fn claim_termination(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }
}

/// Releases the subscription slot on drop, so terminal deliveries
/// release on every exit path, panicking callbacks included.
struct ReleaseOnExit<'a>(&'a SingleAssignmentDisposable);

impl Drop for ReleaseOnExit<'_> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

impl<T, I, E> Observer<I, E> for WeakObserver<T, I, E>
where
    T: Send + Sync + 'static,
    I: 'static,
    E: 'static,
{
    /// Deliver a value. If the target is gone, the observer terminates
    /// and releases the subscription; no callback runs for this or any
    /// later delivery. A panicking callback is not terminal.
    fn on_next(&self, item: I) {
        if self.is_terminated() {
            return;
        }
        match self.target.upgrade() {
            // `strong` keeps the target alive for this one invocation.
            Some(strong) => (self.callbacks.on_next)(&strong, item),
            None => {
                trace!("target dropped, terminating subscription");
                self.dispose();
            }
        }
    }

    /// Deliver the terminal error. Termination and release happen on
    /// all exit paths; with no explicit handler the error is re-raised
    /// on this thread after cleanup.
    fn on_error(&self, err: E) {
        if !self.claim_termination() {
            return;
        }
        let _release = ReleaseOnExit(&self.subscription);
        match (self.target.upgrade(), &self.callbacks.on_error) {
            (Some(strong), ErrorHandler::Handler(handler)) => handler(&strong, err),
            // Rethrow fails loudly whether or not the target survived.
            (_, ErrorHandler::Rethrow(rethrow)) => rethrow(err),
            (None, ErrorHandler::Handler(_)) => {}
        }
    }

    /// Deliver completion. Symmetric to [`on_error`](Self::on_error)
    /// without a payload; the completion callback defaults to no-op.
    fn on_completed(&self) {
        if !self.claim_termination() {
            return;
        }
        let _release = ReleaseOnExit(&self.subscription);
        if let Some(strong) = self.target.upgrade() {
            if let Some(completed) = &self.callbacks.on_completed {
                completed(&strong);
            }
        }
    }
}

impl<T, I, E> Disposable for WeakObserver<T, I, E>
where
    T: Send + Sync + 'static,
    I: 'static,
    E: 'static,
{
    fn dispose(&self) {
        WeakObserver::dispose(self);
    }
}

impl<T, I, E> fmt::Debug for WeakObserver<T, I, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObserver")
            .field("terminated", &self.terminated.load(Ordering::Relaxed))
            .field("target_alive", &(self.target.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
