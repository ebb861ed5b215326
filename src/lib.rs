//! # Tributary
//!
//! A reactive derived-state engine: a single committed-state stream, lens
//! paths and batched selectors derived from it, and a dispatch/store runtime
//! that advances the stream in response to actions.
//!
//! ## Core Concepts
//!
//! - **Value**: an immutable state tree with `Arc`-shared containers
//! - **Lens / Path**: get/set over a key path, plus a live derived stream
//! - **Selector**: an N-ary derived stream, recomputed once per transition
//! - **Store**: reducers and epics composed across nested feature stores
//!
//! ## Example
//!
//! ```ignore
//! use tributary::{Action, ActionImplementation, CreateStoreParams, Store, Value};
//! use serde_json::json;
//!
//! let store = Store::new(Value::from(json!({ "name": "", "numbers": [] })));
//! let name = store.path(["name"]);
//!
//! {
//!     let name = name.clone();
//!     store.register(
//!         ActionImplementation::new("SET_NAME").with_reducer(move |state, action| {
//!             name.set(state, action.payload.get("name").cloned().unwrap_or(Value::Null))
//!         }),
//!     )?;
//! }
//!
//! store.create_store(CreateStoreParams::default())?;
//! store.dispatch(Action::new("SET_NAME", Value::from(json!({ "name": "ted" }))))?;
//! ```

pub mod actions;
pub mod compare;
pub mod epics;
pub mod error;
pub mod lens;
pub mod paths;
pub mod scheduler;
pub mod selectors;
pub mod store;
pub mod streams;
pub mod value;

// Re-exports
pub use actions::{Action, ActionImplementation, ActionRegistry, Reducer};
pub use epics::{of_type, ActionSource, Dependencies, Epic};
pub use error::{Result, StoreError};
pub use lens::Lens;
pub use paths::Path;
pub use scheduler::Scheduler;
pub use selectors::{memoize, MemoizedSelector, Projector, Selector, SelectorOptions};
pub use store::{CreateStoreParams, Dispatcher, Store};
pub use streams::{
    filter_source, latest_batched, map_source, Broadcast, Callback, CompareFn, Shared, Source,
    SourceRef, StateCell, StreamEvent, Subscription, UpstreamFn,
};
pub use value::Value;
