//! Main Store struct tying all components together.

use crate::actions::{Action, ActionImplementation, ActionRegistry, Reducer};
use crate::epics::{of_type, ActionSource, Dependencies, Epic};
use crate::error::{Result, StoreError};
use crate::lens::Lens;
use crate::paths::Path;
use crate::scheduler::Scheduler;
use crate::selectors::{Selector, SelectorOptions};
use crate::streams::{Broadcast, Source, SourceRef, StateCell, StreamEvent, Subscription};
use crate::value::Value;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// One-time initialization parameters for [`Store::create_store`].
#[derive(Clone, Default)]
pub struct CreateStoreParams {
    /// Collaborators injected into every epic.
    pub dependencies: Dependencies,

    /// Log every dispatched action with its payload at debug level.
    pub dev_mode: bool,
}

/// The root of the engine: one state stream, one action stream, a registry
/// of action implementations, and the dispatch loop that ties them together.
///
/// A store goes through two phases:
/// 1. **Setup** — define paths and selectors, [`register`](Store::register)
///    action implementations, [`mount`](Store::mount) feature stores, add
///    cross-cutting epics.
/// 2. **Initialized** — [`create_store`](Store::create_store) builds the root
///    reducer map and epic pipeline and publishes the initial state; from
///    then on [`dispatch`](Store::dispatch) drives everything and setup calls
///    fail.
///
/// Dispatching before initialization is an error, not a silent no-op.
///
/// Handles are cheap clones sharing one instance. A store mounted as a
/// feature forwards its dispatch to the root.
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// The state stream: committed snapshots, replay-1.
    states: StateCell<Value>,

    /// The committed action stream observed by epics.
    actions: Broadcast<Action>,

    /// Flush queue defining the batching boundary; forwards to the root's
    /// queue once mounted as a feature.
    scheduler: Scheduler,

    /// This store's own initial state (features merge in at their keys).
    initial_state: Value,

    registry: Mutex<ActionRegistry>,

    /// Cross-cutting epics and middleware.
    extra_epics: Mutex<Vec<Epic>>,

    /// Mounted feature stores by subtree key.
    features: Mutex<BTreeMap<String, Store>>,

    /// Present once initialized.
    runtime: Mutex<Option<Arc<Runtime>>>,

    /// Epic pipeline and feature wiring subscriptions, kept alive here.
    wiring: Mutex<Vec<Subscription>>,

    dispatch_queue: Mutex<DispatchQueue>,

    /// Root store when mounted as a feature.
    root: Mutex<Option<Weak<StoreInner>>>,

    /// Inbox for actions arriving from outside the synchronous dispatch path.
    inbox_tx: Sender<Action>,
    inbox_rx: Receiver<Action>,
}

struct Runtime {
    reducers: BTreeMap<String, Reducer>,
    dev_mode: bool,
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Action>,
    /// A dispatch loop is running; nested dispatches only enqueue.
    active: bool,
    /// A reducer is executing; dispatching now is a re-entrancy hazard.
    in_reducer: bool,
}

impl Store {
    /// A store in the setup phase, holding its own initial state.
    pub fn new(initial_state: Value) -> Store {
        let (inbox_tx, inbox_rx) = unbounded();
        Store {
            inner: Arc::new(StoreInner {
                states: StateCell::new(),
                actions: Broadcast::new(),
                scheduler: Scheduler::new(),
                initial_state,
                registry: Mutex::new(ActionRegistry::new()),
                extra_epics: Mutex::new(Vec::new()),
                features: Mutex::new(BTreeMap::new()),
                runtime: Mutex::new(None),
                wiring: Mutex::new(Vec::new()),
                dispatch_queue: Mutex::new(DispatchQueue::default()),
                root: Mutex::new(None),
                inbox_tx,
                inbox_rx,
            }),
        }
    }

    // --- Setup ---

    /// A path over this store's state. For a mounted feature, keys are
    /// relative to the feature's own subtree.
    pub fn path<K, I>(&self, keys: I) -> Path
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        Path::over(&self.inner.states, Lens::new(keys))
    }

    /// A path with a default for null/absent values.
    pub fn path_with_default<K, I>(&self, keys: I, default: Value) -> Path
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        Path::over(&self.inner.states, Lens::with_default(keys, default))
    }

    /// A selector over the given inputs with the default (identity)
    /// comparator.
    pub fn selector(
        &self,
        inputs: Vec<SourceRef<Value>>,
        projector: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Selector {
        Selector::new(&self.inner.scheduler, inputs, projector)
    }

    pub fn selector_with(
        &self,
        inputs: Vec<SourceRef<Value>>,
        projector: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
        options: SelectorOptions,
    ) -> Selector {
        Selector::with_options(&self.inner.scheduler, inputs, projector, options)
    }

    /// Register an action implementation. Setup phase only.
    pub fn register(&self, implementation: ActionImplementation) -> Result<()> {
        self.ensure_setup_phase()?;
        self.inner.registry.lock().register(implementation)
    }

    /// Add a cross-cutting epic receiving the full action stream.
    pub fn add_epic(
        &self,
        epic: impl Fn(ActionSource, &Dependencies, ActionSource) -> ActionSource
            + Send
            + Sync
            + 'static,
    ) -> Result<()> {
        self.ensure_setup_phase()?;
        self.inner.extra_epics.lock().push(Arc::new(epic));
        Ok(())
    }

    /// Add a middleware epic: observes the full action stream and is expected
    /// to emit nothing. Combined into the pipeline like any other epic.
    pub fn add_middleware(
        &self,
        epic: impl Fn(ActionSource, &Dependencies, ActionSource) -> ActionSource
            + Send
            + Sync
            + 'static,
    ) -> Result<()> {
        self.add_epic(epic)
    }

    /// Mount a feature store at a subtree key. The feature's reducers and
    /// epics are lifted into this store at initialization; its dispatch
    /// forwards to the root from then on.
    pub fn mount(&self, key: impl Into<String>, feature: Store) -> Result<()> {
        self.ensure_setup_phase()?;
        if feature.is_initialized() {
            return Err(StoreError::AlreadyInitialized);
        }
        self.inner.features.lock().insert(key.into(), feature);
        Ok(())
    }

    /// An action creator for the given type.
    pub fn action_creator(&self, action_type: &str) -> impl Fn(Value) -> Action {
        let action_type = action_type.to_string();
        move |payload| Action::new(action_type.clone(), payload)
    }

    // --- Initialization ---

    /// Build the root reducer map and epic pipeline, wire mounted features,
    /// and publish the initial state. One-time transition; a second call (or
    /// a call on a mounted feature) fails with `AlreadyInitialized`.
    pub fn create_store(&self, params: CreateStoreParams) -> Result<()> {
        if self.inner.root.lock().is_some() || self.inner.runtime.lock().is_some() {
            return Err(StoreError::AlreadyInitialized);
        }

        let initial = self.collect_initial_state()?;

        let mut reducers = BTreeMap::new();
        self.collect_reducers(&mut reducers);

        let mut wiring = Vec::new();
        {
            let features = self.inner.features.lock();
            for (key, feature) in features.iter() {
                feature.wire_up(self, &self.inner.states, key, &mut wiring);
            }
        }

        // The runtime and the first snapshot must exist before the epic
        // pipeline comes alive so epic emissions can re-enter dispatch.
        let reducer_count = reducers.len();
        *self.inner.runtime.lock() = Some(Arc::new(Runtime {
            reducers,
            dev_mode: params.dev_mode,
        }));
        self.inner.states.publish(initial);

        let all: ActionSource = Arc::new(self.inner.actions.clone());
        for epic_output in self.collect_epics(&all, &params.dependencies) {
            let store = self.clone();
            wiring.push(epic_output.subscribe(Arc::new(move |event| {
                if let StreamEvent::Next(action) = event {
                    if let Err(err) = store.dispatch(action.clone()) {
                        warn!(error = %err, action = %action.action_type,
                            "epic-emitted action failed to dispatch");
                    }
                }
            })));
        }
        *self.inner.wiring.lock() = wiring;

        info!(
            reducers = reducer_count,
            features = self.inner.features.lock().len(),
            dev_mode = params.dev_mode,
            "store initialized"
        );

        self.inner.scheduler.drain();
        Ok(())
    }

    /// Own initial state merged with every feature's at its mount key.
    fn collect_initial_state(&self) -> Result<Value> {
        let features = self.inner.features.lock();
        if features.is_empty() {
            return Ok(self.inner.initial_state.clone());
        }
        let Value::Map(own) = &self.inner.initial_state else {
            return Err(StoreError::InvalidStateRoot);
        };
        let mut merged = (**own).clone();
        for (key, feature) in features.iter() {
            merged.insert(key.clone(), feature.collect_initial_state()?);
        }
        Ok(Value::Map(Arc::new(merged)))
    }

    /// Own reducers plus lifted feature reducers. A feature implementing the
    /// same action type replaces the parent's entry.
    fn collect_reducers(&self, out: &mut BTreeMap<String, Reducer>) {
        for implementation in self.inner.registry.lock().iter() {
            if let Some(reducer) = implementation.reducer() {
                out.insert(
                    implementation.action_type().to_string(),
                    Arc::clone(reducer),
                );
            }
        }
        let features = self.inner.features.lock();
        for (key, feature) in features.iter() {
            let mut nested = BTreeMap::new();
            feature.collect_reducers(&mut nested);
            for (action_type, reducer) in nested {
                out.insert(action_type, lift_reducer(key.clone(), reducer));
            }
        }
    }

    /// Attach a mounted feature: adopt its scheduler, forward its dispatch,
    /// and feed the projected parent subtree into its state cell.
    fn wire_up(
        &self,
        root: &Store,
        parent_states: &StateCell<Value>,
        key: &str,
        wiring: &mut Vec<Subscription>,
    ) {
        self.inner.scheduler.attach_to(&root.inner.scheduler);
        *self.inner.root.lock() = Some(Arc::downgrade(&root.inner));

        let cell = self.inner.states.clone();
        let subtree_key = key.to_string();
        wiring.push(parent_states.subscribe(Arc::new(move |event| {
            if let StreamEvent::Next(state) = event {
                if let Some(subtree) = state.get(&subtree_key) {
                    cell.publish(subtree.clone());
                }
            }
        })));

        let features = self.inner.features.lock();
        for (child_key, child) in features.iter() {
            child.wire_up(root, &self.inner.states, child_key, wiring);
        }
    }

    /// The merged epic pipeline: per-type epics get a pre-filtered stream,
    /// cross-cutting epics and middleware the full stream, feature epics
    /// their scoped dependencies.
    ///
    /// Epic factories are user code; no engine lock is held while they run.
    fn collect_epics(&self, all: &ActionSource, deps: &Dependencies) -> Vec<ActionSource> {
        let implementations: Vec<ActionImplementation> =
            self.inner.registry.lock().iter().cloned().collect();
        let extra: Vec<Epic> = self.inner.extra_epics.lock().clone();
        let features: Vec<(String, Store)> = self
            .inner
            .features
            .lock()
            .iter()
            .map(|(key, feature)| (key.clone(), feature.clone()))
            .collect();

        let mut outputs = Vec::new();
        for implementation in &implementations {
            if let Some(epic) = implementation.epic() {
                let filtered = of_type(Arc::clone(all), &[implementation.action_type()]);
                outputs.push(epic(filtered, deps, Arc::clone(all)));
            }
        }
        for epic in &extra {
            outputs.push(epic(Arc::clone(all), deps, Arc::clone(all)));
        }
        for (key, feature) in &features {
            outputs.extend(feature.collect_epics(all, &deps.feature(key)));
        }
        outputs
    }

    // --- Dispatch ---

    /// Run the matching reducer, republish the state if it changed by
    /// reference, and feed the action to the epic pipeline.
    ///
    /// Actions dispatched by epics while this call runs (nested dispatches)
    /// are queued and processed, in emission order, before it returns.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        if let Some(root) = self.resolve_root() {
            return root.dispatch(action);
        }
        let runtime = self
            .inner
            .runtime
            .lock()
            .clone()
            .ok_or(StoreError::NotInitialized)?;

        {
            let mut queue = self.inner.dispatch_queue.lock();
            if queue.in_reducer {
                return Err(StoreError::ReentrantDispatch);
            }
            queue.pending.push_back(action);
            if queue.active {
                return Ok(());
            }
            queue.active = true;
        }

        let result = self.run_dispatch_loop(&runtime);
        {
            let mut queue = self.inner.dispatch_queue.lock();
            queue.active = false;
            if result.is_err() {
                queue.pending.clear();
            }
        }
        result
    }

    fn run_dispatch_loop(&self, runtime: &Runtime) -> Result<()> {
        loop {
            let action = self.inner.dispatch_queue.lock().pending.pop_front();
            match action {
                Some(action) => self.process_action(runtime, &action)?,
                None => return Ok(()),
            }
        }
    }

    fn process_action(&self, runtime: &Runtime, action: &Action) -> Result<()> {
        if runtime.dev_mode {
            debug!(action = %action.action_type, payload = %action.payload, "dispatch");
        } else {
            trace!(action = %action.action_type, "dispatch");
        }

        let current = self
            .inner
            .states
            .current()
            .expect("initialized store holds a state");

        let next = match runtime.reducers.get(&action.action_type) {
            Some(reducer) => {
                self.inner.dispatch_queue.lock().in_reducer = true;
                let result = reducer(&current, action);
                self.inner.dispatch_queue.lock().in_reducer = false;
                result?
            }
            None => current.clone(),
        };

        if !next.identical(&current) {
            self.inner.states.publish(next);
        }
        self.inner.actions.publish(action.clone());

        // One processed action is one batching boundary.
        self.inner.scheduler.drain();
        Ok(())
    }

    // --- External Dispatch ---

    /// A clonable handle for enqueueing actions from timers, threads, or
    /// other event-loop turns. Queued actions run on the next
    /// [`pump`](Store::pump).
    pub fn dispatcher(&self) -> Dispatcher {
        match self.resolve_root() {
            Some(root) => root.dispatcher(),
            None => Dispatcher {
                sender: self.inner.inbox_tx.clone(),
            },
        }
    }

    /// Process every action currently queued in the inbox. Returns how many
    /// were dispatched.
    pub fn pump(&self) -> Result<usize> {
        if let Some(root) = self.resolve_root() {
            return root.pump();
        }
        let mut count = 0;
        loop {
            match self.inner.inbox_rx.try_recv() {
                Ok(action) => {
                    self.dispatch(action)?;
                    count += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(count)
    }

    // --- Accessors ---

    /// The state stream: replay-1, hot, carrying committed snapshots.
    pub fn state_stream(&self) -> StateCell<Value> {
        self.inner.states.clone()
    }

    /// The committed action stream.
    pub fn action_stream(&self) -> Broadcast<Action> {
        self.inner.actions.clone()
    }

    pub fn current_state(&self) -> Option<Value> {
        self.inner.states.current()
    }

    /// Drive the batching boundary for inputs that emit outside dispatch.
    pub fn settle(&self) {
        self.inner.scheduler.drain();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.runtime.lock().is_some() || self.resolve_root().is_some()
    }

    fn resolve_root(&self) -> Option<Store> {
        self.inner
            .root
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Store { inner })
    }

    fn ensure_setup_phase(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(StoreError::AlreadyInitialized);
        }
        Ok(())
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Wrap a feature reducer so it reads and writes only the mounted subtree,
/// returning the parent state untouched (by reference) when the subtree
/// result is unchanged.
fn lift_reducer(key: String, reducer: Reducer) -> Reducer {
    Arc::new(move |state: &Value, action: &Action| {
        let subtree = state
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::FeatureStateMissing(key.clone()))?;
        let next = reducer(&subtree, action)?;
        if next.identical(&subtree) {
            Ok(state.clone())
        } else {
            Lens::new([key.as_str()]).set(state, next)
        }
    })
}

/// Handle for enqueueing actions into a store's inbox from outside the
/// synchronous dispatch path.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<Action>,
}

impl Dispatcher {
    /// Queue an action for the next [`Store::pump`]. Sending to a dropped
    /// store is a no-op.
    pub fn send(&self, action: Action) {
        let _ = self.sender.send(action);
    }
}
