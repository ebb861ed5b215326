//! Stream primitives for the derived-state machinery.
//!
//! Everything downstream of the store is built from four pieces:
//! - [`StateCell`]: hot multicast holding a current value, replayed to new
//!   subscribers (the state stream)
//! - [`Broadcast`]: plain hot multicast (the action stream)
//! - [`Shared`]: reference-counted replay-1 multicast over an upstream
//!   source, with comparator-based change suppression
//! - [`latest_batched`]: N inputs merged into one tuple stream, collapsing
//!   same-tick updates into a single flush
//!
//! Observers are plain callbacks receiving [`StreamEvent`]s; no lock is held
//! while a callback runs.

mod batch;
mod share;
mod subject;
mod types;

pub use batch::latest_batched;
pub use share::{CompareFn, Shared, UpstreamFn};
pub use subject::{Broadcast, StateCell};
pub use types::{filter_source, map_source, Callback, Source, SourceRef, StreamEvent, Subscription};
