#![forbid(unsafe_code)]

//! Push-notification contracts: [`Observer`], [`Observable`], and the
//! three-closure [`CallbackObserver`].
//!
//! The observable source is an external collaborator. Its contract: it
//! delivers notifications without overlap for a single subscription and
//! emits at most one terminal event (`on_error` or `on_completed`).

use std::sync::Arc;

use crate::disposable::Disposable;

/// Receiver side of a push subscription.
///
/// Methods take `&self`: a single observer may be shared between the
/// source's delivery path and external disposal paths.
pub trait Observer<I, E>: Send + Sync {
    /// A value notification. Non-terminal.
    fn on_next(&self, item: I);
    /// Terminal error notification.
    fn on_error(&self, err: E);
    /// Terminal completion notification.
    fn on_completed(&self);
}

/// A source of push notifications.
///
/// `subscribe` returns the resource that, when disposed, detaches the
/// observer from the source. The resource is idempotent and does not
/// panic.
pub trait Observable<I, E> {
    fn subscribe(&self, observer: Arc<dyn Observer<I, E>>) -> Arc<dyn Disposable>;
}

/// An [`Observer`] built from three raw closures.
///
/// Used by the cancellation bridge, which needs to interpose on the
/// terminal paths before forwarding to the weak observer.
pub struct CallbackObserver<I, E> {
    next: Box<dyn Fn(I) + Send + Sync>,
    error: Box<dyn Fn(E) + Send + Sync>,
    completed: Box<dyn Fn() + Send + Sync>,
}

impl<I: 'static, E: 'static> CallbackObserver<I, E> {
    pub fn new(
        next: impl Fn(I) + Send + Sync + 'static,
        error: impl Fn(E) + Send + Sync + 'static,
        completed: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            next: Box::new(next),
            error: Box::new(error),
            completed: Box::new(completed),
        }
    }
}

impl<I: 'static, E: 'static> Observer<I, E> for CallbackObserver<I, E> {
    fn on_next(&self, item: I) {
        (self.next)(item);
    }

    fn on_error(&self, err: E) {
        (self.error)(err);
    }

    fn on_completed(&self) {
        (self.completed)();
    }
}

impl<I, E> std::fmt::Debug for CallbackObserver<I, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackObserver").finish_non_exhaustive()
    }
}
