//! Reference-counted replay-1 multicast over an upstream source.

use super::types::{Callback, StreamEvent, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Comparator used to suppress consecutive equal emissions.
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Factory that connects the upstream computation. Invoked once per 0->1
/// subscriber transition; the returned subscription is torn down at 1->0.
pub type UpstreamFn<T> = Box<dyn Fn(Callback<T>) -> Subscription + Send + Sync>;

/// The shared-handle state machine behind every path and selector:
/// `{subscribers, last value, upstream subscription}`.
///
/// - Subscribing connects the upstream only if this is the first live
///   subscriber; later subscribers immediately receive the last computed
///   value instead.
/// - A value passing the comparator as "unchanged" is swallowed.
/// - When the last subscriber detaches, the upstream subscription is torn
///   down and the replay slot cleared; nothing computes with zero consumers.
/// - An upstream failure is terminal for the current subscribers: they
///   receive `Failed`, the upstream is torn down, and the machine resets so
///   a later subscription reconnects from a clean slate.
///
/// An optional idle hook fires whenever the machine returns to zero
/// subscribers (including the failure path); the memoized selector cache
/// uses it to evict its entry.
pub struct Shared<T> {
    inner: Arc<ShareInner<T>>,
}

struct ShareInner<T> {
    upstream: UpstreamFn<T>,
    compare: CompareFn<T>,
    state: Mutex<ShareState<T>>,
    next_id: AtomicU64,
    idle_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

struct ShareState<T> {
    subscribers: Vec<(u64, Callback<T>)>,
    last: Option<T>,
    upstream_sub: Option<Subscription>,
    /// Guards the window where the upstream is being connected but its
    /// subscription handle is not stored yet.
    connecting: bool,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    pub fn new(upstream: UpstreamFn<T>, compare: CompareFn<T>) -> Self {
        Shared {
            inner: Arc::new(ShareInner {
                upstream,
                compare,
                state: Mutex::new(ShareState {
                    subscribers: Vec::new(),
                    last: None,
                    upstream_sub: None,
                    connecting: false,
                }),
                next_id: AtomicU64::new(1),
                idle_hook: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);

        let (replay, connect) = {
            let mut state = inner.state.lock();
            state.subscribers.push((id, callback.clone()));
            let connect = state.upstream_sub.is_none() && !state.connecting;
            if connect {
                state.connecting = true;
            }
            (state.last.clone(), connect)
        };

        if let Some(value) = replay {
            callback(&StreamEvent::Next(value));
        }

        if connect {
            let weak = Arc::downgrade(inner);
            let upstream_sub = (inner.upstream)(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    Self::handle_upstream(&inner, event);
                }
            }));
            let mut state = inner.state.lock();
            state.connecting = false;
            if state.subscribers.is_empty() {
                // Torn down (or failed) while connecting.
                drop(state);
                upstream_sub.unsubscribe();
            } else {
                state.upstream_sub = Some(upstream_sub);
            }
        }

        let weak = Arc::downgrade(inner);
        Subscription::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let (became_idle, upstream_sub) = {
                let mut state = inner.state.lock();
                let before = state.subscribers.len();
                state.subscribers.retain(|(sid, _)| *sid != id);
                let removed = state.subscribers.len() != before;
                if removed && state.subscribers.is_empty() {
                    state.last = None;
                    (true, state.upstream_sub.take())
                } else {
                    (false, None)
                }
            };
            if became_idle {
                if let Some(sub) = upstream_sub {
                    sub.unsubscribe();
                }
                Self::fire_idle(&inner);
            }
        })
    }

    fn handle_upstream(inner: &Arc<ShareInner<T>>, event: &StreamEvent<T>) {
        match event {
            StreamEvent::Next(value) => {
                let targets: Vec<Callback<T>> = {
                    let mut state = inner.state.lock();
                    if let Some(last) = &state.last {
                        if (inner.compare)(last, value) {
                            return;
                        }
                    }
                    state.last = Some(value.clone());
                    state.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
                };
                let event = StreamEvent::Next(value.clone());
                for target in targets {
                    target(&event);
                }
            }
            StreamEvent::Failed(err) => {
                tracing::debug!(error = %err, "shared stream failed; resetting");
                let (targets, upstream_sub) = {
                    let mut state = inner.state.lock();
                    let targets: Vec<Callback<T>> =
                        state.subscribers.drain(..).map(|(_, cb)| cb).collect();
                    state.last = None;
                    (targets, state.upstream_sub.take())
                };
                if let Some(sub) = upstream_sub {
                    sub.unsubscribe();
                }
                let event = StreamEvent::Failed(err.clone());
                for target in targets {
                    target(&event);
                }
                Self::fire_idle(inner);
            }
        }
    }

    fn fire_idle(inner: &Arc<ShareInner<T>>) {
        let hook = inner.idle_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Install the zero-subscribers hook. Replaces any previous hook.
    pub fn set_idle_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.idle_hook.lock() = Some(Arc::new(hook));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether the upstream is currently connected.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().upstream_sub.is_some()
    }

    /// Handle identity: do two handles share the same state machine?
    pub fn ptr_eq(a: &Shared<T>, b: &Shared<T>) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::streams::{Source, StateCell};
    use std::sync::atomic::AtomicUsize;

    /// A shared node over a state cell, counting upstream connections.
    fn shared_over(
        cell: &StateCell<i64>,
    ) -> (Shared<i64>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let cell = cell.clone();
        let counter = Arc::clone(&connects);
        let shared = Shared::new(
            Box::new(move |callback| {
                counter.fetch_add(1, Ordering::SeqCst);
                cell.subscribe(callback)
            }),
            Arc::new(|a: &i64, b: &i64| a == b),
        );
        (shared, connects)
    }

    fn collector() -> (Callback<i64>, Arc<Mutex<Vec<i64>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let callback: Callback<i64> = Arc::new(move |event| {
            if let StreamEvent::Next(v) = event {
                sink.lock().push(*v);
            }
        });
        (callback, values)
    }

    #[test]
    fn test_connects_once_for_many_subscribers() {
        let cell = StateCell::with_value(0);
        let (shared, connects) = shared_over(&cell);

        let (cb1, v1) = collector();
        let (cb2, v2) = collector();
        let s1 = shared.subscribe(cb1);
        let s2 = shared.subscribe(cb2);

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        // First subscriber gets the upstream replay; second the stored value.
        assert_eq!(*v1.lock(), vec![0]);
        assert_eq!(*v2.lock(), vec![0]);

        cell.publish(5);
        assert_eq!(*v1.lock(), vec![0, 5]);
        assert_eq!(*v2.lock(), vec![0, 5]);

        s1.unsubscribe();
        s2.unsubscribe();
        assert!(!shared.is_connected());
    }

    #[test]
    fn test_reconnects_after_full_teardown() {
        let cell = StateCell::with_value(0);
        let (shared, connects) = shared_over(&cell);

        for _ in 0..3 {
            let (cb, _) = collector();
            let sub = shared.subscribe(cb);
            sub.unsubscribe();
        }
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(shared.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_subscribers_means_no_computation() {
        let cell = StateCell::with_value(0);
        let (shared, connects) = shared_over(&cell);

        cell.publish(1);
        cell.publish(2);
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert_eq!(cell.observer_count(), 0);
        assert_eq!(shared.subscriber_count(), 0);
    }

    #[test]
    fn test_suppresses_unchanged_values() {
        let cell = StateCell::with_value(0);
        let (shared, _) = shared_over(&cell);

        let (cb, values) = collector();
        let _sub = shared.subscribe(cb);

        cell.publish(0);
        cell.publish(1);
        cell.publish(1);
        cell.publish(2);
        assert_eq!(*values.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failure_is_terminal_and_resets() {
        let cell: StateCell<StreamEvent<i64>> = StateCell::new();
        // Upstream that forwards injected events verbatim.
        let forwarding = {
            let cell = cell.clone();
            Shared::new(
                Box::new(move |callback: Callback<i64>| {
                    cell.subscribe(Arc::new(move |event| {
                        if let StreamEvent::Next(inner) = event {
                            callback(inner);
                        }
                    }))
                }),
                Arc::new(|a: &i64, b: &i64| a == b),
            )
        };

        let errors = Arc::new(AtomicUsize::new(0));
        let (sink, values) = collector();
        let error_count = Arc::clone(&errors);
        let callback: Callback<i64> = Arc::new(move |event| match event {
            StreamEvent::Next(_) => sink(event),
            StreamEvent::Failed(_) => {
                error_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        let idle_fired = Arc::new(AtomicUsize::new(0));
        {
            let idle_fired = Arc::clone(&idle_fired);
            forwarding.set_idle_hook(move || {
                idle_fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let _sub = forwarding.subscribe(callback);
        cell.publish(StreamEvent::Next(1));
        cell.publish(StreamEvent::Failed(StoreError::Projection("boom".into())));

        assert_eq!(*values.lock(), vec![1]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(forwarding.subscriber_count(), 0);
        assert!(!forwarding.is_connected());
        assert_eq!(idle_fired.load(Ordering::SeqCst), 1);

        // A fresh subscription reconnects from a clean slate.
        let (cb2, v2) = collector();
        let _sub2 = forwarding.subscribe(cb2);
        cell.publish(StreamEvent::Next(9));
        assert_eq!(*v2.lock(), vec![9]);
    }

    #[test]
    fn test_idle_hook_fires_on_last_unsubscribe() {
        let cell = StateCell::with_value(0);
        let (shared, _) = shared_over(&cell);

        let idle_fired = Arc::new(AtomicUsize::new(0));
        {
            let idle_fired = Arc::clone(&idle_fired);
            shared.set_idle_hook(move || {
                idle_fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (cb1, _) = collector();
        let (cb2, _) = collector();
        let s1 = shared.subscribe(cb1);
        let s2 = shared.subscribe(cb2);

        s1.unsubscribe();
        assert_eq!(idle_fired.load(Ordering::SeqCst), 0);
        s2.unsubscribe();
        assert_eq!(idle_fired.load(Ordering::SeqCst), 1);
    }
}
