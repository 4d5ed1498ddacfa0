#![forbid(unsafe_code)]

//! Weak-target observer adapter for push-based notification sources.
//!
//! A subscriber ("target") often wants to receive values from an
//! observable source without the subscription keeping it alive. This
//! crate holds the target behind a [`std::sync::Weak`] reference: when
//! the target is dropped, the subscription tears itself down on the
//! next delivery attempt instead of leaking forever.
//!
//! The hard part is the lifecycle discipline, not the plumbing.
//! Termination can be triggered by natural completion, an error,
//! explicit disposal, external cancellation, or the target going away,
//! and all of those may race with each other and with an in-flight
//! delivery. The crate centers on three pieces:
//!
//! - [`SingleAssignmentDisposable`]: a race-safe single-assignment
//!   resource slot with idempotent release.
//! - [`WeakObserver`]: the termination state machine wrapping the weak
//!   target and up to three callbacks.
//! - the cancellation bridge in [`subscribe`], tying a one-shot
//!   [`CancelSignal`] to observer disposal.
//!
//! # Delivery contract
//!
//! The source is assumed to deliver notifications without overlap for a
//! single subscription and to emit at most one terminal event. Disposal
//! and cancellation, however, may arrive from any thread at any time,
//! including re-entrantly from inside a callback. No lock is ever held
//! while user code runs.

pub mod cancel;
pub mod disposable;
pub mod observer;
pub mod subscribe;
pub mod weak_observer;

pub use cancel::{CancelCallback, CancelSignal, CancelSource, CancelToken, Registration};
pub use disposable::{Disposable, DisposeFn, SingleAssignmentDisposable};
pub use observer::{CallbackObserver, Observable, Observer};
pub use subscribe::{subscribe_weak, subscribe_weak_until};
pub use weak_observer::{Callbacks, WeakObserver};
