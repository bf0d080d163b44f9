/// Core Emitter implementation
use super::contexts::ListenerContext;
use crate::events::Event;
use crate::listener::Listener;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::types::{Nice, SYNC};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Mutable bus storage: listener registry, contexts, state cache and settings.
pub(crate) struct BusState {
    /// Default nice value of emissions without an override
    pub(crate) nice: Nice,
    pub(crate) interruptible: bool,
    /// Depth of nested dispatch loops, drives the negative-nice throttle
    pub(crate) recursion: usize,
    /// Listener count above which a warning is logged; 0 disables it
    pub(crate) max_listeners: usize,
    pub(crate) overflow_warned: HashSet<String>,
    /// Event name to listeners, in registration order
    pub(crate) listeners: HashMap<String, Vec<Rc<Listener>>>,
    pub(crate) contexts: HashMap<String, ListenerContext>,
    /// State event name to its cached emission, `None` when cleared
    pub(crate) states: BTreeMap<String, Option<Event>>,
    /// State event name to every member of its exclusive group
    pub(crate) state_groups: HashMap<String, Rc<[String]>>,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            nice: SYNC,
            interruptible: false,
            recursion: 0,
            max_listeners: 0,
            overflow_warned: HashSet::new(),
            listeners: HashMap::new(),
            contexts: HashMap::new(),
            states: BTreeMap::new(),
            state_groups: HashMap::new(),
        }
    }
}

/// Shared storage behind one or more emitter handles.
pub(crate) struct Core {
    pub(crate) state: RefCell<BusState>,
    pub(crate) scheduler: Rc<dyn Scheduler>,
}

impl Core {
    pub(crate) fn new(scheduler: Rc<dyn Scheduler>) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(BusState::default()),
            scheduler,
        })
    }

    pub(crate) fn has_listeners(&self, event_name: &str) -> bool {
        self.state
            .borrow()
            .listeners
            .get(event_name)
            .is_some_and(|list| !list.is_empty())
    }
}

/// An event emitter handle.
///
/// Cloning is cheap and every clone addresses the same storage. The storage
/// holds the listener registry, the listener contexts, the state cache and the
/// emitter settings. [`Emitter::share`] points a handle at another handle's
/// storage and [`Emitter::reset`] gives it fresh storage.
///
/// Emitters are single-threaded (`!Send`): deferred listeners run through the
/// emitter's [`Scheduler`].
#[derive(Clone)]
pub struct Emitter {
    slot: Rc<RefCell<Rc<Core>>>,
}

impl Emitter {
    /// Creates an emitter deferring work to the tokio runtime.
    ///
    /// Deferred listeners are spawned with `spawn_local`, so the emitter must
    /// be driven from a `tokio::task::LocalSet`. Emitters whose listeners are
    /// all synchronous never touch the scheduler.
    pub fn new() -> Self {
        Self::with_scheduler(Rc::new(TokioScheduler))
    }

    /// Creates an emitter using a custom scheduler.
    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        Self::from_core(Core::new(scheduler))
    }

    pub(crate) fn from_core(core: Rc<Core>) -> Self {
        Self {
            slot: Rc::new(RefCell::new(core)),
        }
    }

    pub(crate) fn core(&self) -> Rc<Core> {
        self.slot.borrow().clone()
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.core().scheduler.clone()
    }

    /// Returns a non-owning handle, for listeners that refer back to their
    /// own emitter.
    pub fn downgrade(&self) -> WeakEmitter {
        WeakEmitter {
            slot: Rc::downgrade(&self.slot),
        }
    }

    /// Makes `target` use the storage of `source`.
    ///
    /// Afterwards both handles (and all of their clones) see the same
    /// listeners, contexts, states and settings. Whatever `target` held before
    /// is dropped.
    pub fn share(source: &Emitter, target: &Emitter) {
        let core = source.core();
        debug!("sharing emitter storage");
        *target.slot.borrow_mut() = core;
    }

    /// Replaces the storage with a fresh, empty one using the same scheduler.
    ///
    /// Handles that were sharing the old storage keep it.
    pub fn reset(&self) {
        let scheduler = self.scheduler();
        *self.slot.borrow_mut() = Core::new(scheduler);
    }

    /// True when both handles address the same storage.
    pub fn same_storage(&self, other: &Emitter) -> bool {
        Rc::ptr_eq(&self.core(), &other.core())
    }

    /// Sets the default nice value of emissions ([`SYNC`] initially).
    pub fn set_nice(&self, nice: Nice) {
        self.core().state.borrow_mut().nice = nice;
    }

    pub fn nice(&self) -> Nice {
        self.core().state.borrow().nice
    }

    /// Turns listener interruption on or off.
    pub fn set_interruptible(&self, value: bool) {
        self.core().state.borrow_mut().interruptible = value;
    }

    pub fn is_interruptible(&self) -> bool {
        self.core().state.borrow().interruptible
    }

    /// Sets the listener count above which registration logs a warning.
    ///
    /// Zero disables the check. Changing the limit re-arms warnings for every
    /// event.
    pub fn set_max_listeners(&self, max: usize) {
        let core = self.core();
        let mut state = core.state.borrow_mut();
        state.max_listeners = max;
        state.overflow_warned.clear();
    }

    pub fn max_listeners(&self) -> usize {
        self.core().state.borrow().max_listeners
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        let state = core.state.borrow();
        f.debug_struct("Emitter")
            .field("nice", &state.nice)
            .field("interruptible", &state.interruptible)
            .field("events", &state.listeners.len())
            .field("contexts", &state.contexts.len())
            .field("states", &state.states.len())
            .finish()
    }
}

/// Non-owning emitter handle, see [`Emitter::downgrade`].
#[derive(Clone)]
pub struct WeakEmitter {
    slot: Weak<RefCell<Rc<Core>>>,
}

impl WeakEmitter {
    pub fn upgrade(&self) -> Option<Emitter> {
        self.slot.upgrade().map(|slot| Emitter { slot })
    }
}

impl fmt::Debug for WeakEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEmitter")
            .field("alive", &(self.slot.strong_count() > 0))
            .finish()
    }
}

/// Increments the recursion depth for its lifetime.
///
/// Dropping it on unwind keeps the counter consistent when a listener panics.
pub(crate) struct RecursionGuard {
    core: Rc<Core>,
}

impl RecursionGuard {
    pub(crate) fn enter(core: &Rc<Core>) -> Self {
        core.state.borrow_mut().recursion += 1;
        Self { core: core.clone() }
    }
}

impl Drop for RecursionGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.core.state.try_borrow_mut() {
            state.recursion = state.recursion.saturating_sub(1);
        }
    }
}
