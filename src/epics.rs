//! Side-effect pipelines over the action stream.
//!
//! An epic is a long-lived transform from an incoming action stream to an
//! outgoing one. Epics bound to a single action type receive a pre-filtered
//! stream; cross-cutting epics and middleware receive the full stream. Every
//! action an epic emits re-enters dispatch and is processed after the action
//! that triggered it, before unrelated later dispatches.
//!
//! Synchronous emissions happen before the triggering `dispatch` call
//! returns. For delayed work (timers, I/O), capture a
//! [`Dispatcher`](crate::Dispatcher) in the epic's dependencies and send the
//! derived action from there; it is processed on the next
//! [`Store::pump`](crate::Store::pump).

use crate::actions::Action;
use crate::streams::{filter_source, SourceRef};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A stream of actions, usable as an epic input or output.
pub type ActionSource = SourceRef<Action>;

/// `(filtered actions, dependencies, all actions) -> emitted actions`.
///
/// The third argument carries the unfiltered action stream for epics that
/// correlate their own action type with others.
pub type Epic =
    Arc<dyn Fn(ActionSource, &Dependencies, ActionSource) -> ActionSource + Send + Sync>;

/// Keep only actions of the given types.
pub fn of_type(source: ActionSource, types: &[&str]) -> ActionSource {
    let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    filter_source(source, move |action: &Action| {
        types.iter().any(|t| t == &action.action_type)
    })
}

/// Collaborators injected into epics: clients, clocks, dispatch handles.
///
/// Entries are type-erased and fetched back by key and type. Feature stores
/// see only the dependency scope registered under their mount key.
#[derive(Clone, Default)]
pub struct Dependencies {
    entries: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
    features: BTreeMap<String, Dependencies>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependency under a key.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.entries.insert(key.into(), Arc::new(value));
        self
    }

    /// Register the dependency scope for a feature mounted at `key`.
    pub fn with_feature(mut self, key: impl Into<String>, deps: Dependencies) -> Self {
        self.features.insert(key.into(), deps);
        self
    }

    /// Fetch a dependency by key and concrete type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
    }

    /// The scope handed to a feature's epics. Empty if none was registered.
    pub fn feature(&self, key: &str) -> Dependencies {
        self.features.get(key).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("features", &self.features.keys().collect::<Vec<_>>())
            .finish()
    }
}
