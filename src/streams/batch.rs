//! Collapses same-tick emissions from many inputs into one tuple emission.

use super::types::{Callback, Source, SourceRef, StreamEvent, Subscription};
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;

/// Merge a fixed list of inputs into a stream of current-value tuples.
///
/// The first tuple is emitted synchronously as soon as every input has
/// produced a value (for replaying inputs, during `subscribe` itself). After
/// that, any input emission marks the tuple dirty and schedules exactly one
/// flush on the scheduler; emissions arriving before the flush only update
/// the pending tuple. At flush, one merged tuple goes downstream.
///
/// N synchronous updates across the inputs inside one drain window therefore
/// collapse into exactly one emission carrying the latest value of each
/// input.
pub fn latest_batched<T: Clone + Send + Sync + 'static>(
    inputs: Vec<SourceRef<T>>,
    scheduler: Scheduler,
) -> SourceRef<Vec<T>> {
    Arc::new(BatchSource { inputs, scheduler })
}

struct BatchSource<T> {
    inputs: Vec<SourceRef<T>>,
    scheduler: Scheduler,
}

struct BatchState<T> {
    latest: Vec<Option<T>>,
    /// Set once the first full tuple has been emitted.
    primed: bool,
    /// A flush is scheduled and not yet run.
    dirty: bool,
    failed: bool,
    active: bool,
}

fn snapshot<T: Clone>(latest: &[Option<T>]) -> Vec<T> {
    latest
        .iter()
        .map(|slot| slot.clone().expect("tuple slot filled"))
        .collect()
}

impl<T: Clone + Send + Sync + 'static> Source<Vec<T>> for BatchSource<T> {
    fn subscribe(&self, callback: Callback<Vec<T>>) -> Subscription {
        let state = Arc::new(Mutex::new(BatchState {
            latest: (0..self.inputs.len()).map(|_| None).collect(),
            primed: false,
            dirty: false,
            failed: false,
            active: true,
        }));

        let mut input_subs = Vec::with_capacity(self.inputs.len());
        for (index, input) in self.inputs.iter().enumerate() {
            let state = Arc::clone(&state);
            let callback = callback.clone();
            let scheduler = self.scheduler.clone();
            input_subs.push(input.subscribe(Arc::new(move |event| match event {
                StreamEvent::Next(value) => {
                    let emit_now = {
                        let mut st = state.lock();
                        if st.failed || !st.active {
                            return;
                        }
                        st.latest[index] = Some(value.clone());
                        if !st.primed {
                            if st.latest.iter().all(Option::is_some) {
                                st.primed = true;
                                Some(snapshot(&st.latest))
                            } else {
                                None
                            }
                        } else if !st.dirty {
                            st.dirty = true;
                            let state = Arc::clone(&state);
                            let callback = callback.clone();
                            scheduler.schedule(Box::new(move || {
                                let tuple = {
                                    let mut st = state.lock();
                                    if !st.dirty || !st.active || st.failed {
                                        return;
                                    }
                                    st.dirty = false;
                                    snapshot(&st.latest)
                                };
                                callback(&StreamEvent::Next(tuple));
                            }));
                            None
                        } else {
                            None
                        }
                    };
                    if let Some(tuple) = emit_now {
                        callback(&StreamEvent::Next(tuple));
                    }
                }
                StreamEvent::Failed(err) => {
                    let forward = {
                        let mut st = state.lock();
                        if st.failed {
                            false
                        } else {
                            st.failed = true;
                            true
                        }
                    };
                    if forward {
                        callback(&StreamEvent::Failed(err.clone()));
                    }
                }
            })));
        }

        Subscription::new(move || {
            state.lock().active = false;
            for sub in &input_subs {
                sub.unsubscribe();
            }
        })
    }
}
