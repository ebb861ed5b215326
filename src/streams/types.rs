//! Core stream types shared by the derived-state machinery.

use crate::error::StoreError;
use parking_lot::Mutex;
use std::sync::Arc;

/// An emission on a stream: a value, or a terminal failure.
///
/// After a `Failed` event a stream delivers nothing further to the
/// subscribers that received it; derived handles reset so a later
/// subscription recomputes from a clean slate.
#[derive(Clone, Debug)]
pub enum StreamEvent<T> {
    Next(T),
    Failed(StoreError),
}

/// Subscriber callback. Invoked synchronously, never under an engine lock.
pub type Callback<T> = Arc<dyn Fn(&StreamEvent<T>) + Send + Sync>;

/// Anything that can be observed: state cells, paths, selectors, or
/// caller-supplied streams unrelated to any store.
pub trait Source<T>: Send + Sync {
    fn subscribe(&self, callback: Callback<T>) -> Subscription;
}

pub type SourceRef<T> = Arc<dyn Source<T>>;

/// Handle for tearing down a subscription.
///
/// Teardown is idempotent and cascades: unsubscribing a derived handle's last
/// subscriber releases its upstream subscription transitively.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn noop() -> Self {
        Subscription {
            cancel: Mutex::new(None),
        }
    }

    /// Tear down. Calling again is a no-op.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

/// Derive a stream by applying `f` to every value of `source`.
pub fn map_source<T, U, F>(source: SourceRef<T>, f: F) -> SourceRef<U>
where
    T: 'static,
    U: 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    struct MapSource<T, U> {
        source: SourceRef<T>,
        f: Arc<dyn Fn(&T) -> U + Send + Sync>,
    }

    impl<T: 'static, U: 'static> Source<U> for MapSource<T, U> {
        fn subscribe(&self, callback: Callback<U>) -> Subscription {
            let f = Arc::clone(&self.f);
            self.source.subscribe(Arc::new(move |event| match event {
                StreamEvent::Next(value) => callback(&StreamEvent::Next(f(value))),
                StreamEvent::Failed(err) => callback(&StreamEvent::Failed(err.clone())),
            }))
        }
    }

    Arc::new(MapSource {
        source,
        f: Arc::new(f),
    })
}

/// Derive a stream keeping only the values `predicate` accepts.
pub fn filter_source<T, F>(source: SourceRef<T>, predicate: F) -> SourceRef<T>
where
    T: 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    struct FilterSource<T> {
        source: SourceRef<T>,
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    }

    impl<T: 'static> Source<T> for FilterSource<T> {
        fn subscribe(&self, callback: Callback<T>) -> Subscription {
            let predicate = Arc::clone(&self.predicate);
            self.source.subscribe(Arc::new(move |event| match event {
                StreamEvent::Next(value) => {
                    if predicate(value) {
                        callback(event);
                    }
                }
                StreamEvent::Failed(_) => callback(event),
            }))
        }
    }

    Arc::new(FilterSource {
        source,
        predicate: Arc::new(predicate),
    })
}
