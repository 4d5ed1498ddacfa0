#![forbid(unsafe_code)]

//! Public subscription entry points and the cancellation bridge.
//!
//! # Design
//!
//! [`subscribe_weak`] is the plain form: build a [`WeakObserver`],
//! subscribe it, bind the returned resource into its slot, hand the
//! observer back as the disposable subscription handle.
//!
//! [`subscribe_weak_until`] bridges an external one-shot
//! [`CancelSignal`] to observer disposal and returns nothing: the
//! signal alone governs the subscription's lifetime. The bridge
//! subscribes three raw callbacks instead of the observer itself so
//! the terminal paths can release the cancellation registration
//! *before* delivering the terminal event. That ordering closes the
//! race where cancellation fires after natural termination has already
//! begun releasing the same resource; both the registration release
//! and the observer's termination flag are independently idempotent,
//! so either interleaving of the two triggers is safe.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::cancel::CancelSignal;
use crate::disposable::Disposable;
use crate::observer::{CallbackObserver, Observable, Observer};
use crate::weak_observer::{Callbacks, WeakObserver};

/// Subscribe `target` weakly to `source`.
///
/// The subscription holds no strong reference to the target: when the
/// target is dropped, the subscription tears itself down on the next
/// delivery attempt. The returned handle disposes the subscription
/// explicitly; dropping the handle alone does nothing.
pub fn subscribe_weak<S, T, I, E>(
    source: &S,
    target: &Arc<T>,
    callbacks: Callbacks<T, I, E>,
) -> Arc<dyn Disposable>
where
    S: Observable<I, E> + ?Sized,
    T: Send + Sync + 'static,
    I: 'static,
    E: 'static,
{
    let observer = Arc::new(WeakObserver::new(target, callbacks));
    let resource = source.subscribe(Arc::clone(&observer) as Arc<dyn Observer<I, E>>);
    // The source may have terminated synchronously during subscribe;
    // binding then releases the resource immediately.
    observer.bind_subscription(Box::new(resource));
    observer
}

/// Subscribe `target` weakly to `source`, with lifetime governed by a
/// cancellation signal instead of a returned handle.
///
/// - A signal that can never fire degenerates to a plain weak
///   subscription.
/// - A signal that already fired produces no subscription and no
///   notifications at all (silent no-op).
/// - Otherwise the signal's firing disposes the observer exactly once,
///   and natural termination unregisters the cancellation callback so
///   no stale registration outlives the subscription.
pub fn subscribe_weak_until<S, T, I, E>(
    source: &S,
    target: &Arc<T>,
    callbacks: Callbacks<T, I, E>,
    signal: &dyn CancelSignal,
) where
    S: Observable<I, E> + ?Sized,
    T: Send + Sync + 'static,
    I: 'static,
    E: 'static,
{
    if !signal.can_be_cancelled() {
        trace!("signal can never fire, subscribing directly");
        let observer = Arc::new(WeakObserver::new(target, callbacks));
        let resource = source.subscribe(Arc::clone(&observer) as Arc<dyn Observer<I, E>>);
        observer.bind_subscription(Box::new(resource));
        return;
    }
    if signal.is_cancelled() {
        debug!("signal already fired, skipping subscription");
        return;
    }

    let observer = Arc::new(WeakObserver::new(target, callbacks));

    let registration = {
        let observer = Arc::clone(&observer);
        Arc::new(signal.register(Box::new(move || observer.dispose())))
    };

    // Terminal paths release the registration first, then deliver.
    let next_observer = Arc::clone(&observer);
    let error_observer = Arc::clone(&observer);
    let completed_observer = Arc::clone(&observer);
    let error_registration = Arc::clone(&registration);
    let completed_registration = Arc::clone(&registration);
    let bridged = CallbackObserver::new(
        move |item: I| next_observer.on_next(item),
        move |err: E| {
            error_registration.release();
            error_observer.on_error(err);
        },
        move || {
            completed_registration.release();
            completed_observer.on_completed();
        },
    );

    let resource = source.subscribe(Arc::new(bridged));
    observer.bind_subscription(Box::new(resource));
}
