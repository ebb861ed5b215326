//! Lens paths bound to the live state stream.

use crate::error::Result;
use crate::lens::Lens;
use crate::streams::{Callback, Shared, Source, SourceRef, StateCell, StreamEvent, Subscription};
use crate::value::Value;
use std::sync::Arc;

/// A [`Lens`] plus a live derived stream of the targeted field.
///
/// The stream is the state stream mapped through the lens, with unchanged
/// values suppressed ([`Value::identical`]) behind a reference-counted
/// replay-1 share: the state stream is subscribed exactly once per 0->1
/// subscriber transition, late subscribers immediately receive the last
/// computed value, and the last unsubscribe tears the upstream down.
///
/// Paths are cheap handles; clones share the same machinery. Create them once
/// at setup time via [`Store::path`](crate::Store::path).
#[derive(Clone)]
pub struct Path {
    lens: Arc<Lens>,
    shared: Shared<Value>,
}

impl Path {
    /// Bind a lens to a state stream.
    pub(crate) fn over(states: &StateCell<Value>, lens: Lens) -> Path {
        let lens = Arc::new(lens);
        let states = states.clone();
        let upstream_lens = Arc::clone(&lens);
        let shared = Shared::new(
            Box::new(move |callback: Callback<Value>| {
                let lens = Arc::clone(&upstream_lens);
                states.subscribe(Arc::new(move |event| match event {
                    StreamEvent::Next(state) => callback(&StreamEvent::Next(lens.get(state))),
                    StreamEvent::Failed(err) => callback(&StreamEvent::Failed(err.clone())),
                }))
            }),
            Arc::new(|a: &Value, b: &Value| a.identical(b)),
        );
        Path { lens, shared }
    }

    /// Read the targeted value out of a state snapshot.
    pub fn get(&self, state: &Value) -> Value {
        self.lens.get(state)
    }

    /// Produce a new state with the targeted value replaced.
    pub fn set(&self, state: &Value, value: Value) -> Result<Value> {
        self.lens.set(state, value)
    }

    /// Produce a new state with the targeted key removed.
    pub fn unset(&self, state: &Value) -> Value {
        self.lens.unset(state)
    }

    pub fn lens(&self) -> &Lens {
        &self.lens
    }

    pub fn subscribe(&self, callback: Callback<Value>) -> Subscription {
        self.shared.subscribe(callback)
    }

    /// This path as a selector input.
    pub fn as_source(&self) -> SourceRef<Value> {
        Arc::new(self.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count()
    }

    /// Whether the path currently holds a live state-stream subscription.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

impl Source<Value> for Path {
    fn subscribe(&self, callback: Callback<Value>) -> Subscription {
        self.shared.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn initial() -> Value {
        Value::from(json!({
            "counter": 0,
            "a": {"b": {"c": {"number": 1, "string": "a"}}},
            "collection": [],
        }))
    }

    fn collector() -> (Callback<Value>, Arc<Mutex<Vec<Value>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let callback: Callback<Value> = Arc::new(move |event| {
            if let StreamEvent::Next(v) = event {
                sink.lock().push(v.clone());
            }
        });
        (callback, values)
    }

    #[test]
    fn test_emits_initial_value_on_subscribe() {
        let states = StateCell::with_value(initial());
        let counter = Path::over(&states, Lens::new(["counter"]));

        let (callback, values) = collector();
        let _sub = counter.subscribe(callback);
        assert_eq!(*values.lock(), vec![Value::Int(0)]);
    }

    #[test]
    fn test_emits_most_recent_value_on_late_subscribe() {
        let states = StateCell::with_value(initial());
        let counter = Path::over(&states, Lens::new(["counter"]));

        let s = states.current().unwrap();
        let s = counter.set(&s, Value::Int(1)).unwrap();
        states.publish(s.clone());
        let s = counter.set(&s, Value::Int(2)).unwrap();
        states.publish(s);

        let (callback, values) = collector();
        let _sub = counter.subscribe(callback);
        assert_eq!(*values.lock(), vec![Value::Int(2)]);
    }

    #[test]
    fn test_emits_on_each_change_only() {
        let states = StateCell::with_value(initial());
        let counter = Path::over(&states, Lens::new(["counter"]));
        let nested = Path::over(&states, Lens::new(["a", "b", "c", "string"]));

        let (callback, values) = collector();
        let _sub = counter.subscribe(callback);

        let s = states.current().unwrap();
        let s = counter.set(&s, Value::Int(1)).unwrap();
        states.publish(s.clone());
        // A change elsewhere in the tree does not re-emit the counter.
        let s = nested.set(&s, Value::from("heyo")).unwrap();
        states.publish(s.clone());
        let s = counter.set(&s, Value::Int(2)).unwrap();
        states.publish(s);

        assert_eq!(
            *values.lock(),
            vec![Value::Int(0), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_default_value_emission() {
        let states = StateCell::with_value(initial());
        let counter = Path::over(&states, Lens::with_default(["counter"], Value::Int(10)));

        let (callback, values) = collector();
        let _sub = counter.subscribe(callback);

        // Null resolves to the default; a later write of the same resolved
        // value is suppressed.
        let s = states.current().unwrap();
        let s = counter.set(&s, Value::Null).unwrap();
        states.publish(s.clone());
        let s = counter.set(&s, Value::Int(10)).unwrap();
        states.publish(s.clone());
        let s = counter.set(&s, Value::Int(2)).unwrap();
        states.publish(s);

        assert_eq!(
            *values.lock(),
            vec![Value::Int(0), Value::Int(10), Value::Int(2)]
        );
    }

    /// Wraps a state cell and counts upstream subscriptions.
    struct CountingStates {
        cell: StateCell<Value>,
        subscribes: Arc<AtomicUsize>,
    }

    impl Source<Value> for CountingStates {
        fn subscribe(&self, callback: Callback<Value>) -> Subscription {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.cell.subscribe(callback)
        }
    }

    #[test]
    fn test_refcounted_upstream_subscription() {
        let states = StateCell::with_value(initial());
        let subscribes = Arc::new(AtomicUsize::new(0));
        let counting = Arc::new(CountingStates {
            cell: states.clone(),
            subscribes: Arc::clone(&subscribes),
        });

        // A path over the counting source, built the way Path::over does it.
        let source: SourceRef<Value> = counting;
        let lens = Arc::new(Lens::new(["counter"]));
        let shared = {
            let source = Arc::clone(&source);
            let lens = Arc::clone(&lens);
            Shared::new(
                Box::new(move |callback: Callback<Value>| {
                    let lens = Arc::clone(&lens);
                    source.subscribe(Arc::new(move |event| match event {
                        StreamEvent::Next(state) => {
                            callback(&StreamEvent::Next(lens.get(state)))
                        }
                        StreamEvent::Failed(err) => callback(&StreamEvent::Failed(err.clone())),
                    }))
                }),
                Arc::new(|a: &Value, b: &Value| a.identical(b)),
            )
        };

        // No subscribers: no upstream work.
        assert_eq!(subscribes.load(Ordering::SeqCst), 0);

        // Many subscribers share one upstream subscription.
        let (cb1, _) = collector();
        let (cb2, _) = collector();
        let (cb3, _) = collector();
        let s1 = shared.subscribe(cb1);
        let s2 = shared.subscribe(cb2);
        let s3 = shared.subscribe(cb3);
        assert_eq!(subscribes.load(Ordering::SeqCst), 1);

        // Full teardown releases it; the next subscriber reconnects.
        s1.unsubscribe();
        s2.unsubscribe();
        s3.unsubscribe();
        assert_eq!(states.observer_count(), 0);

        let (cb4, _) = collector();
        let _s4 = shared.subscribe(cb4);
        assert_eq!(subscribes.load(Ordering::SeqCst), 2);
    }
}
