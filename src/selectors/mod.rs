//! Derived streams combining many inputs through a pure projection.
//!
//! A selector batches its inputs (one recomputation per flush boundary, no
//! matter how many inputs changed inside it), projects the tuple, suppresses
//! unchanged results, and shares the result behind a reference-counted
//! replay-1 handle. [`memoize`] adds an argument-keyed cache of selector
//! instances whose entries live exactly as long as their subscribers.

mod memo;
mod select;

pub use memo::{memoize, MemoizedSelector};
pub use select::{Projector, Selector, SelectorOptions};
