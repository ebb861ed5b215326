//! Hot multicast subjects: the state stream and the action stream.

use super::types::{Callback, Source, StreamEvent, Subscription};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A hot multicast channel that always holds a current value and delivers it
/// immediately to new subscribers (replay-1), then streams every subsequent
/// published value.
///
/// One cell per store carries the committed state snapshots; mounted features
/// receive the projected subtree of the parent's cell into their own.
pub struct StateCell<T> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    state: Mutex<CellState<T>>,
    next_id: AtomicU64,
}

struct CellState<T> {
    current: Option<T>,
    observers: Vec<(u64, Callback<T>)>,
    watchers: Vec<Sender<T>>,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> {
    /// An empty cell: subscribers receive nothing until the first publish.
    pub fn new() -> Self {
        StateCell {
            inner: Arc::new(CellInner {
                state: Mutex::new(CellState {
                    current: None,
                    observers: Vec::new(),
                    watchers: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn with_value(initial: T) -> Self {
        let cell = Self::new();
        cell.publish(initial);
        cell
    }

    /// The latest published value, if any.
    pub fn current(&self) -> Option<T> {
        self.inner.state.lock().current.clone()
    }

    /// Publish a new value: stores it as current and notifies every observer.
    ///
    /// Watcher channels that are full or disconnected are dropped here, the
    /// slow-subscriber policy; in-process observers are unaffected.
    pub fn publish(&self, value: T) {
        let observers: Vec<Callback<T>> = {
            let mut state = self.inner.state.lock();
            state.current = Some(value.clone());
            state
                .watchers
                .retain(|sender| sender.try_send(value.clone()).is_ok());
            state.observers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        let event = StreamEvent::Next(value);
        for observer in observers {
            observer(&event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers.len()
    }

    /// Bounded channel adapter for external consumers. The current value (if
    /// any) is delivered immediately; the receiver is dropped at publish time
    /// once its buffer overflows or the receiving side disconnects.
    pub fn watch(&self, buffer: usize) -> Receiver<T> {
        let (sender, receiver) = bounded(buffer);
        let mut state = self.inner.state.lock();
        if let Some(current) = &state.current {
            let _ = sender.try_send(current.clone());
        }
        state.watchers.push(sender);
        receiver
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for StateCell<T> {
    fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let replay = {
            let mut state = self.inner.state.lock();
            state.observers.push((id, callback.clone()));
            state.current.clone()
        };
        if let Some(value) = replay {
            callback(&StreamEvent::Next(value));
        }
        let weak: Weak<CellInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().observers.retain(|(oid, _)| *oid != id);
            }
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for StateCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        StateCell {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A hot multicast channel with no replay: observers see only values
/// published while they are subscribed. Carries the committed action stream.
pub struct Broadcast<T> {
    inner: Arc<BroadcastInner<T>>,
}

struct BroadcastInner<T> {
    observers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Broadcast<T> {
    pub fn new() -> Self {
        Broadcast {
            inner: Arc::new(BroadcastInner {
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn publish(&self, value: T) {
        let observers: Vec<Callback<T>> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        let event = StreamEvent::Next(value);
        for observer in observers {
            observer(&event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for Broadcast<T> {
    fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.observers.lock().push((id, callback));
        let weak: Weak<BroadcastInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.lock().retain(|(oid, _)| *oid != id);
            }
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Broadcast {
            inner: Arc::clone(&self.inner),
        }
    }
}
