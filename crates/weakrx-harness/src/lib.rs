#![forbid(unsafe_code)]

//! Test fixtures for weakrx: a deterministic in-process push source,
//! counting disposables, and a recording target.
//!
//! [`TestSubject`] honors the source contract the core assumes: it
//! delivers notifications without overlap per subscription (callers
//! drive it from one thread at a time) and detaches an observer when
//! its subscription resource is disposed. It exists only as a fixture;
//! it is not a reactive runtime.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use weakrx_core::{Disposable, Observable, Observer};

struct SubjectInner<I, E> {
    observers: Mutex<Vec<(u64, Arc<dyn Observer<I, E>>)>>,
    next_id: AtomicU64,
    detached: AtomicUsize,
}

/// A push source driven by hand from tests.
pub struct TestSubject<I, E> {
    inner: Arc<SubjectInner<I, E>>,
}

impl<I: 'static, E: 'static> TestSubject<I, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                detached: AtomicUsize::new(0),
            }),
        }
    }

    /// Deliver a value to every attached observer.
    pub fn push(&self, item: I)
    where
        I: Clone,
    {
        for observer in self.snapshot() {
            observer.on_next(item.clone());
        }
    }

    /// Deliver the terminal error.
    ///
    /// Observers are not force-detached: a well-behaved observer
    /// releases its own subscription resource on a terminal event, and
    /// tests assert exactly that.
    pub fn error(&self, err: E)
    where
        E: Clone,
    {
        for observer in self.snapshot() {
            observer.on_error(err.clone());
        }
    }

    /// Deliver completion. Same detach policy as [`error`](Self::error).
    pub fn complete(&self) {
        for observer in self.snapshot() {
            observer.on_completed();
        }
    }

    /// Observers currently attached.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// How many subscriptions have been detached via their resource.
    #[must_use]
    pub fn detach_count(&self) -> usize {
        self.inner.detached.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer<I, E>>> {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

impl<I: 'static, E: 'static> Default for TestSubject<I, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: 'static, E: 'static> Clone for TestSubject<I, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: 'static, E: 'static> Observable<I, E> for TestSubject<I, E> {
    fn subscribe(&self, observer: Arc<dyn Observer<I, E>>) -> Arc<dyn Disposable> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        Arc::new(SubjectSubscription {
            inner: Arc::clone(&self.inner),
            id,
        })
    }
}

/// Resource returned by [`TestSubject::subscribe`]; disposing it
/// detaches the observer.
struct SubjectSubscription<I, E> {
    inner: Arc<SubjectInner<I, E>>,
    id: u64,
}

impl<I: 'static, E: 'static> Disposable for SubjectSubscription<I, E> {
    fn dispose(&self) {
        let removed = {
            let mut observers = self
                .inner
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let before = observers.len();
            observers.retain(|(id, _)| *id != self.id);
            before != observers.len()
        };
        if removed {
            self.inner.detached.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A disposable that counts how many times it was actually released.
pub struct CountingDisposable {
    releases: AtomicUsize,
}

impl CountingDisposable {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            releases: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Disposable for CountingDisposable {
    fn dispose(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// A target that records everything delivered to it.
pub struct RecordingTarget<I> {
    values: Mutex<Vec<I>>,
    errors: AtomicUsize,
    completions: AtomicUsize,
}

impl<I> RecordingTarget<I> {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(Vec::new()),
            errors: AtomicUsize::new(0),
            completions: AtomicUsize::new(0),
        })
    }

    pub fn record(&self, item: I) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn values(&self) -> Vec<I>
    where
        I: Clone,
    {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}
