//! # Event Records
//!
//! One [`Event`] is created per dispatch. It carries the arguments, the
//! resolved nice value and the listener snapshot, plus the mutable progress
//! shared by every scheduled invocation: how many listeners are done, whether
//! the event was interrupted and the completion callback still pending.
//!
//! [`Emission`] is the builder used to start a dispatch with options beyond
//! the plain `emit()` shortcuts.

use crate::listener::{Listener, Outcome};
use crate::system::{Core, Emitter};
use crate::types::Nice;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// Completion callback of one emission.
///
/// Called at most once: with the interruption as soon as a listener
/// interrupts, otherwise with [`Outcome::Continue`] once every listener of the
/// snapshot is done.
pub type CompletionFn = Box<dyn FnOnce(Outcome, &Event)>;

#[derive(Default)]
pub(crate) struct Progress {
    pub(crate) interrupt: Option<Value>,
    pub(crate) listeners_done: usize,
    pub(crate) callback: Option<CompletionFn>,
}

pub(crate) struct EventInner {
    id: u64,
    name: String,
    args: Vec<Value>,
    nice: Nice,
    core: Weak<Core>,
    listeners: Vec<Rc<Listener>>,
    progress: RefCell<Progress>,
}

/// The record of one dispatch, shared by all of its listener invocations.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl Event {
    pub(crate) fn new(
        core: &Rc<Core>,
        name: String,
        args: Vec<Value>,
        nice: Nice,
        listeners: Vec<Rc<Listener>>,
        callback: Option<CompletionFn>,
    ) -> Self {
        Self {
            inner: Rc::new(EventInner {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                name,
                args,
                nice,
                core: Rc::downgrade(core),
                listeners,
                progress: RefCell::new(Progress {
                    callback,
                    ..Progress::default()
                }),
            }),
        }
    }

    /// Process-unique, monotonically increasing id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// Base nice value of the emission, before listener and context overrides.
    pub fn nice(&self) -> Nice {
        self.inner.nice
    }

    /// A handle on the emitter storage that dispatched this event, if it is
    /// still alive.
    pub fn emitter(&self) -> Option<Emitter> {
        self.inner.core.upgrade().map(Emitter::from_core)
    }

    /// Number of listeners in the dispatch snapshot.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn listeners_done(&self) -> usize {
        self.inner.progress.borrow().listeners_done
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.progress.borrow().interrupt.is_some()
    }

    /// The value the first interrupting listener carried.
    pub fn interruption(&self) -> Option<Value> {
        self.inner.progress.borrow().interrupt.clone()
    }

    /// True once the completion callback has fired (or if there never was one).
    pub fn is_settled(&self) -> bool {
        self.inner.progress.borrow().callback.is_none()
    }

    pub(crate) fn snapshot(&self) -> &[Rc<Listener>] {
        &self.inner.listeners
    }

    pub(crate) fn has_callback(&self) -> bool {
        self.inner.progress.borrow().callback.is_some()
    }

    pub(crate) fn mark_done(&self) {
        self.inner.progress.borrow_mut().listeners_done += 1;
    }

    /// Records the first interruption; false when one was already recorded.
    pub(crate) fn set_interrupt(&self, value: Value) -> bool {
        let mut progress = self.inner.progress.borrow_mut();
        if progress.interrupt.is_some() {
            return false;
        }
        progress.interrupt = Some(value);
        true
    }

    pub(crate) fn all_done(&self) -> bool {
        self.inner.progress.borrow().listeners_done >= self.inner.listeners.len()
    }

    /// Fires the completion callback if it is still pending.
    pub(crate) fn complete(&self, outcome: Outcome) {
        let callback = self.inner.progress.borrow_mut().callback.take();
        if let Some(callback) = callback {
            callback(outcome, self);
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.inner.progress.borrow();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("args", &self.inner.args)
            .field("nice", &self.inner.nice)
            .field("listeners", &self.inner.listeners.len())
            .field("listeners_done", &progress.listeners_done)
            .field("interrupt", &progress.interrupt)
            .finish()
    }
}

/// Builder for one emission.
///
/// ```rust
/// use ngevents::{Emission, Emitter, ManualScheduler};
/// use serde_json::json;
/// use std::rc::Rc;
///
/// let emitter = Emitter::with_scheduler(Rc::new(ManualScheduler::new()));
/// emitter
///     .dispatch(
///         Emission::new("save")
///             .arg(json!({ "id": 7 }))
///             .nice(20)
///             .on_complete(|outcome, event| {
///                 println!("{} finished: {outcome:?}", event.name());
///             }),
///     )
///     .unwrap();
/// ```
pub struct Emission {
    pub(crate) name: String,
    pub(crate) args: Vec<Value>,
    pub(crate) nice: Option<Nice>,
    pub(crate) callback: Option<CompletionFn>,
    pub(crate) listeners: Option<Vec<Rc<Listener>>>,
}

impl Emission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            nice: None,
            callback: None,
            listeners: None,
        }
    }

    /// Replaces the argument list.
    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Overrides the emitter's default nice value for this emission only.
    pub fn nice(mut self, nice: Nice) -> Self {
        self.nice = Some(nice);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Outcome, &Event) + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Dispatches to this listener list instead of the registry's.
    pub(crate) fn with_listeners(mut self, listeners: Vec<Rc<Listener>>) -> Self {
        self.listeners = Some(listeners);
        self
    }
}

impl fmt::Debug for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emission")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("nice", &self.nice)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
