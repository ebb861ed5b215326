//! Argument-keyed cache of selector instances with refcount eviction.

use super::select::Selector;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A parameterized selector: `args -> Selector`, cached per argument list.
///
/// Arguments are keyed by their canonical encoding, so deep-equal argument
/// values hit the same entry regardless of container identity (and lookups
/// stay a hash probe rather than a scan). While an entry is alive, every call
/// returns the identical instance; the entry is removed exactly when the
/// selector's subscriber count returns to zero (or its stream fails
/// terminally), and the next call builds a fresh instance.
pub struct MemoizedSelector {
    factory: Arc<dyn Fn(&[Value]) -> Selector + Send + Sync>,
    cache: Arc<Mutex<HashMap<String, Selector>>>,
}

/// Wrap a selector factory in a memoizing cache.
pub fn memoize(factory: impl Fn(&[Value]) -> Selector + Send + Sync + 'static) -> MemoizedSelector {
    MemoizedSelector {
        factory: Arc::new(factory),
        cache: Arc::new(Mutex::new(HashMap::new())),
    }
}

impl MemoizedSelector {
    /// Fetch or build the selector for this argument list.
    ///
    /// The cached selector owns its idle hook: eviction replaces any hook the
    /// factory may have installed.
    pub fn call(&self, args: &[Value]) -> Selector {
        let key = cache_key(args);
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit.clone();
        }

        let selector = (self.factory)(args);
        let weak = Arc::downgrade(&self.cache);
        let evict_key = key.clone();
        selector.shared().set_idle_hook(move || {
            if let Some(cache) = weak.upgrade() {
                cache.lock().remove(&evict_key);
            }
        });
        self.cache.lock().insert(key, selector.clone());
        selector
    }

    /// Number of live cache entries.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Clone for MemoizedSelector {
    fn clone(&self) -> Self {
        MemoizedSelector {
            factory: Arc::clone(&self.factory),
            cache: Arc::clone(&self.cache),
        }
    }
}

fn cache_key(args: &[Value]) -> String {
    Value::list(args.to_vec()).canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::scheduler::Scheduler;
    use crate::streams::{Callback, StateCell, StreamEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_callback() -> Callback<Value> {
        Arc::new(|_| {})
    }

    /// A memoized selector over one cell, scaling it by the argument.
    fn scaled(
        cell: &StateCell<Value>,
        scheduler: &Scheduler,
    ) -> (MemoizedSelector, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cell = cell.clone();
        let scheduler = scheduler.clone();
        let memo = memoize(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            let factor = args[0].as_int().unwrap_or(1);
            Selector::new(
                &scheduler,
                vec![Arc::new(cell.clone())],
                move |inputs| Ok(Value::Int(inputs[0].as_int().unwrap_or(0) * factor)),
            )
        });
        (memo, builds)
    }

    #[test]
    fn test_deep_equal_args_hit_same_instance() {
        let cell = StateCell::with_value(Value::Int(2));
        let scheduler = Scheduler::new();
        let (memo, builds) = scaled(&cell, &scheduler);

        // Deep-equal but not identical argument values.
        let args_a = [Value::from(json!({"factor": 3}))];
        let args_b = [Value::from(json!({"factor": 3}))];
        assert!(!args_a[0].identical(&args_b[0]));

        let first = memo.call(&args_a);
        let _sub = first.subscribe(noop_callback());
        let second = memo.call(&args_b);

        assert!(Selector::same_instance(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_eviction_after_full_unsubscribe() {
        let cell = StateCell::with_value(Value::Int(2));
        let scheduler = Scheduler::new();
        let (memo, builds) = scaled(&cell, &scheduler);

        let args = [Value::Int(3)];
        let first = memo.call(&args);
        let s1 = first.subscribe(noop_callback());
        let s2 = first.subscribe(noop_callback());

        s1.unsubscribe();
        assert_eq!(memo.len(), 1);
        s2.unsubscribe();
        assert_eq!(memo.len(), 0);

        let rebuilt = memo.call(&args);
        assert!(!Selector::same_instance(&first, &rebuilt));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_distinct_args_get_distinct_entries() {
        let cell = StateCell::with_value(Value::Int(2));
        let scheduler = Scheduler::new();
        let (memo, _) = scaled(&cell, &scheduler);

        let by_two = memo.call(&[Value::Int(2)]);
        let by_three = memo.call(&[Value::Int(3)]);
        assert!(!Selector::same_instance(&by_two, &by_three));
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_failed_projector_evicts_entry() {
        let cell = StateCell::with_value(Value::Int(0));
        let scheduler = Scheduler::new();

        let memo = {
            let cell = cell.clone();
            let scheduler = scheduler.clone();
            memoize(move |_args| {
                Selector::new(
                    &scheduler,
                    vec![Arc::new(cell.clone())],
                    |inputs| match inputs[0].as_int() {
                        Some(n) if n < 5 => Ok(Value::Int(n)),
                        _ => Err(StoreError::Projection("overflow".to_string())),
                    },
                )
            })
        };

        let selector = memo.call(&[]);
        let failures = Arc::new(AtomicUsize::new(0));
        let callback: Callback<Value> = {
            let failures = Arc::clone(&failures);
            Arc::new(move |event| {
                if let StreamEvent::Failed(_) = event {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let _sub = selector.subscribe(callback);
        assert_eq!(memo.len(), 1);

        cell.publish(Value::Int(5));
        scheduler.drain();

        // Terminal failure: subscribers notified, entry gone, not wedged.
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(memo.len(), 0);

        let fresh = memo.call(&[]);
        assert!(!Selector::same_instance(&selector, &fresh));
    }
}
