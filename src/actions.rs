//! Action types, creators, and per-type implementations.

use crate::epics::{ActionSource, Dependencies, Epic};
use crate::error::{Result, StoreError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A dispatched action: a type discriminant plus structured payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    pub payload: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Action {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// A pure transition for one action type: `(state, action) -> next state`.
///
/// Fallible because lens writes are; an error aborts the dispatch and leaves
/// the committed state standing.
pub type Reducer = Arc<dyn Fn(&Value, &Action) -> Result<Value> + Send + Sync>;

/// The registered behavior for one action type: a creator plus an optional
/// reducer and an optional epic.
///
/// Immutable once registered. The reducer is testable as a pure function via
/// [`ActionImplementation::reduce`]; the epic via [`ActionImplementation::epic`].
#[derive(Clone)]
pub struct ActionImplementation {
    action_type: String,
    reducer: Option<Reducer>,
    epic: Option<Epic>,
}

impl ActionImplementation {
    pub fn new(action_type: impl Into<String>) -> Self {
        ActionImplementation {
            action_type: action_type.into(),
            reducer: None,
            epic: None,
        }
    }

    pub fn with_reducer(
        mut self,
        reducer: impl Fn(&Value, &Action) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn with_epic(
        mut self,
        epic: impl Fn(ActionSource, &Dependencies, ActionSource) -> ActionSource
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.epic = Some(Arc::new(epic));
        self
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// The action creator: wrap a payload in this implementation's type.
    pub fn create(&self, payload: Value) -> Action {
        Action::new(self.action_type.clone(), payload)
    }

    /// Run the reducer as a pure function. Identity when none is registered.
    pub fn reduce(&self, state: &Value, action: &Action) -> Result<Value> {
        match &self.reducer {
            Some(reducer) => reducer(state, action),
            None => Ok(state.clone()),
        }
    }

    pub fn reducer(&self) -> Option<&Reducer> {
        self.reducer.as_ref()
    }

    pub fn epic(&self) -> Option<&Epic> {
        self.epic.as_ref()
    }
}

impl fmt::Debug for ActionImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionImplementation")
            .field("action_type", &self.action_type)
            .field("reducer", &self.reducer.is_some())
            .field("epic", &self.epic.is_some())
            .finish()
    }
}

/// Per-type bindings owned by a store. Unknown types are simply absent:
/// dispatching them is a no-op, not an error.
#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    implementations: BTreeMap<String, ActionImplementation>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, implementation: ActionImplementation) -> Result<()> {
        let action_type = implementation.action_type().to_string();
        if self.implementations.contains_key(&action_type) {
            return Err(StoreError::DuplicateAction(action_type));
        }
        self.implementations.insert(action_type, implementation);
        Ok(())
    }

    pub fn get(&self, action_type: &str) -> Option<&ActionImplementation> {
        self.implementations.get(action_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionImplementation> {
        self.implementations.values()
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}
