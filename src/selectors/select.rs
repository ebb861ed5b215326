//! N-ary derived streams over batched inputs.

use crate::compare;
use crate::error::{Result, StoreError};
use crate::scheduler::Scheduler;
use crate::streams::{
    latest_batched, Callback, CompareFn, Shared, Source, SourceRef, StreamEvent, Subscription,
};
use crate::value::Value;
use std::sync::Arc;

/// Projection from the current input tuple to the derived value.
///
/// Fallible: an `Err` is a terminal failure for the selector's current
/// subscribers (sibling selectors and the store are unaffected), and the
/// selector resets so a later subscription recomputes from scratch.
pub type Projector = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Tuning for a selector: the equality comparator used to suppress
/// consecutive equal results. Defaults to identity ([`Value::identical`]).
#[derive(Clone)]
pub struct SelectorOptions {
    pub compare: CompareFn<Value>,
}

impl SelectorOptions {
    pub fn with_compare(compare: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        SelectorOptions {
            compare: Arc::new(compare),
        }
    }

    /// Suppress results whose top-level entries are all identical.
    pub fn shallow() -> Self {
        Self::with_compare(compare::shallow_equal)
    }

    /// Suppress results when a collection keeps its length.
    pub fn same_length() -> Self {
        Self::with_compare(compare::same_length)
    }
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self::with_compare(compare::identical)
    }
}

/// A derived stream over N inputs (paths, other selectors, or unrelated
/// streams), recomputed at most once per flush boundary.
///
/// Same lifecycle contract as [`Path`](crate::Path): ref-counted replay-1
/// sharing over the batched upstream. Handles are cheap clones of one
/// instance; [`Selector::same_instance`] observes that identity.
#[derive(Clone)]
pub struct Selector {
    shared: Shared<Value>,
}

impl Selector {
    pub(crate) fn new(
        scheduler: &Scheduler,
        inputs: Vec<SourceRef<Value>>,
        projector: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Selector {
        Self::with_options(scheduler, inputs, projector, SelectorOptions::default())
    }

    pub(crate) fn with_options(
        scheduler: &Scheduler,
        inputs: Vec<SourceRef<Value>>,
        projector: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
        options: SelectorOptions,
    ) -> Selector {
        let projector: Projector = Arc::new(projector);
        let batched = latest_batched(inputs, scheduler.clone());
        let shared = Shared::new(
            Box::new(move |callback: Callback<Value>| {
                let projector = Arc::clone(&projector);
                batched.subscribe(Arc::new(move |event| match event {
                    StreamEvent::Next(tuple) => match projector(tuple) {
                        Ok(value) => callback(&StreamEvent::Next(value)),
                        Err(err) => {
                            let err = match err {
                                StoreError::Projection(_) => err,
                                other => StoreError::Projection(other.to_string()),
                            };
                            callback(&StreamEvent::Failed(err));
                        }
                    },
                    StreamEvent::Failed(err) => callback(&StreamEvent::Failed(err.clone())),
                }))
            }),
            options.compare,
        );
        Selector { shared }
    }

    pub fn subscribe(&self, callback: Callback<Value>) -> Subscription {
        self.shared.subscribe(callback)
    }

    /// This selector as an input to another selector.
    pub fn as_source(&self) -> SourceRef<Value> {
        Arc::new(self.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count()
    }

    /// Whether the selector currently holds live upstream subscriptions.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Do two handles share one underlying instance?
    pub fn same_instance(a: &Selector, b: &Selector) -> bool {
        Shared::ptr_eq(&a.shared, &b.shared)
    }

    pub(crate) fn shared(&self) -> &Shared<Value> {
        &self.shared
    }
}

impl Source<Value> for Selector {
    fn subscribe(&self, callback: Callback<Value>) -> Subscription {
        self.shared.subscribe(callback)
    }
}
