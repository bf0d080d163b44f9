/// Event emission and the dispatch state machine
use super::contexts::QueuedJob;
use super::core::{Core, Emitter, RecursionGuard};
use crate::error::EmitterError;
use crate::events::{Emission, Event};
use crate::listener::{Callback, Listener, ListenerInfo, Outcome};
use crate::types::{describe_nice, ContextStatus, Nice, ERROR, INTERRUPT, REMOVE_LISTENER, SYNC};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace, warn};

impl Emitter {
    /// Emits `name` with `args` at the emitter's default nice value.
    ///
    /// Returns the dispatched [`Event`], or `None` when the emission was
    /// suppressed because it repeats the cached value of a state event.
    ///
    /// # Errors
    ///
    /// * [`EmitterError::InvalidEventName`] for an empty name
    /// * [`EmitterError::UnhandledError`] / [`EmitterError::UnspecifiedError`]
    ///   when an `error` event reaches no listener
    pub fn emit(&self, name: &str, args: Vec<Value>) -> Result<Option<Event>, EmitterError> {
        self.dispatch(Emission::new(name).args(args))
    }

    /// Emits with a nice value overriding the emitter's default.
    pub fn emit_nice(&self, nice: Nice, name: &str, args: Vec<Value>) -> Result<Option<Event>, EmitterError> {
        self.dispatch(Emission::new(name).args(args).nice(nice))
    }

    /// Emits with a completion callback.
    ///
    /// The callback fires exactly once: with [`Outcome::Interrupt`] as soon as
    /// a listener interrupts the event (on an interruptible emitter), or with
    /// [`Outcome::Continue`] when every listener is done. It fires right away
    /// when nobody listens.
    pub fn emit_with_callback<F>(&self, name: &str, args: Vec<Value>, callback: F) -> Result<Option<Event>, EmitterError>
    where
        F: FnOnce(Outcome, &Event) + 'static,
    {
        self.dispatch(Emission::new(name).args(args).on_complete(callback))
    }

    /// Emits a fully described [`Emission`].
    pub fn dispatch(&self, emission: Emission) -> Result<Option<Event>, EmitterError> {
        emit_event(&self.core(), emission)
    }
}

/// Runs one emission through the registry.
pub(crate) fn emit_event(core: &Rc<Core>, emission: Emission) -> Result<Option<Event>, EmitterError> {
    let Emission {
        name,
        args,
        nice,
        callback,
        listeners,
    } = emission;

    if name.is_empty() {
        return Err(EmitterError::InvalidEventName(name));
    }

    let event = {
        let mut state = core.state.borrow_mut();

        let group = state.state_groups.get(&name).cloned();
        if group.is_some() {
            if let Some(Some(current)) = state.states.get(&name) {
                if current.args() == args.as_slice() {
                    debug!(event = %name, "state unchanged, emission suppressed");
                    return Ok(None);
                }
            }
        }

        let snapshot = listeners.unwrap_or_else(|| state.listeners.get(&name).cloned().unwrap_or_default());
        let nice = nice.unwrap_or(state.nice);
        let event = Event::new(core, name, args, nice, snapshot, callback);

        if let Some(group) = group {
            for member in group.iter() {
                state.states.insert(member.clone(), None);
            }
            state.states.insert(event.name().to_string(), Some(event.clone()));
        }
        event
    };

    trace!(
        event = %event.name(),
        id = event.id(),
        nice = %describe_nice(event.nice()),
        listeners = event.listener_count(),
        "dispatching"
    );

    let mut removed = Vec::new();
    {
        let _recursion = RecursionGuard::enter(core);
        for listener in event.snapshot() {
            emit_to_one_listener(core, &event, listener, Some(&mut removed));
        }
    }

    if !removed.is_empty() && core.has_listeners(REMOVE_LISTENER) {
        emit_meta(core, REMOVE_LISTENER, ListenerInfo::to_args(&removed));
    }

    if event.listener_count() == 0 {
        if event.name() == ERROR {
            return Err(match event.args().first() {
                Some(value) => EmitterError::UnhandledError(value.clone()),
                None => EmitterError::UnspecifiedError,
            });
        }
        event.complete(Outcome::Continue);
    }

    Ok(Some(event))
}

/// Emits a meta event (`newListener`, `removeListener`, `interrupt`).
///
/// Meta names are never empty and never `error`, so dispatch cannot fail.
pub(crate) fn emit_meta(core: &Rc<Core>, name: &str, args: Vec<Value>) {
    if let Err(error) = emit_event(core, Emission::new(name).args(args)) {
        warn!(event = name, %error, "meta event dispatch failed");
    }
}

/// Delivers one event to one listener, honoring its context.
///
/// Once-listeners are unregistered here, before they run. Their descriptors
/// go to `removed` when given; without it (state replays) `removeListener` is
/// emitted right away.
pub(crate) fn emit_to_one_listener(
    core: &Rc<Core>,
    event: &Event,
    listener: &Rc<Listener>,
    removed: Option<&mut Vec<ListenerInfo>>,
) {
    let nice = {
        let mut state = core.state.borrow_mut();

        let context = listener
            .context
            .as_deref()
            .and_then(|name| state.contexts.get(name))
            .map(|context| (context.status, context.nice, context.ready));

        if let Some((ContextStatus::Disabled, _, _)) = context {
            return;
        }

        let nice = event
            .nice()
            .max(listener.nice)
            .max(context.map_or(SYNC, |(_, nice, _)| nice));

        if listener.once {
            let unregistered = match state.listeners.get_mut(event.name()) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|registered| !Rc::ptr_eq(registered, listener));
                    let unregistered = list.len() != before;
                    if list.is_empty() {
                        state.listeners.remove(event.name());
                    }
                    unregistered
                }
                None => false,
            };
            if !unregistered {
                // already consumed by a reentrant dispatch; it still counts as done here
                drop(state);
                event.mark_done();
                settle(core, event, Outcome::Continue);
                return;
            }
        }

        if let (Some(name), Some((status, _, ready))) = (listener.context.as_deref(), context) {
            if let Some(context) = state.contexts.get_mut(name) {
                if status == ContextStatus::Queued || !ready {
                    trace!(event = %event.name(), context = name, "listener invocation queued");
                    context.queue.push_back(QueuedJob {
                        event: event.clone(),
                        listener: listener.clone(),
                        nice,
                    });
                    drop(state);
                    report_once_removal(core, event, listener, removed);
                    return;
                }
                if context.serial && listener.is_async() {
                    context.ready = false;
                }
            }
        }
        nice
    };

    schedule(core, event, listener, nice);
    report_once_removal(core, event, listener, removed);
}

fn report_once_removal(
    core: &Rc<Core>,
    event: &Event,
    listener: &Rc<Listener>,
    removed: Option<&mut Vec<ListenerInfo>>,
) {
    if !listener.once {
        return;
    }
    let info = listener.info(event.name());
    match removed {
        Some(removed) => removed.push(info),
        None => {
            if core.has_listeners(REMOVE_LISTENER) {
                emit_meta(core, REMOVE_LISTENER, ListenerInfo::to_args(&[info]));
            }
        }
    }
}

/// Invokes inline or hands the invocation to the scheduler, per nice value.
fn schedule(core: &Rc<Core>, event: &Event, listener: &Rc<Listener>, nice: Nice) {
    let deferred = || {
        let (core, event, listener) = (core.clone(), event.clone(), listener.clone());
        Box::new(move || invoke_listener(&core, &event, &listener))
    };

    if nice < 0 {
        let depth = i64::try_from(core.state.borrow().recursion).unwrap_or(i64::MAX);
        if depth >= nice.saturating_neg() {
            core.scheduler.immediate(deferred());
        } else {
            invoke_listener(core, event, listener);
        }
    } else {
        core.scheduler
            .delay(Duration::from_millis(nice.unsigned_abs()), deferred());
    }
}

/// The listener wrapper: calls the callback and accounts for its outcome.
fn invoke_listener(core: &Rc<Core>, event: &Event, listener: &Rc<Listener>) {
    if event.is_interrupted() {
        release_serial_slot(core, listener);
        return;
    }

    match &listener.callback {
        Callback::Args(callback) => {
            let outcome = callback(event.args());
            event.mark_done();
            settle(core, event, outcome);
        }
        Callback::Event(callback) => {
            let outcome = callback(event);
            event.mark_done();
            settle(core, event, outcome);
        }
        Callback::ArgsAsync(callback) => {
            let done = Done::claim(core, event, listener);
            callback(event.args(), done);
        }
        Callback::EventAsync(callback) => {
            let done = Done::claim(core, event, listener);
            callback(event, done);
        }
    }
}

/// Frees the serial slot claimed for an async listener that will not run.
fn release_serial_slot(core: &Rc<Core>, listener: &Listener) {
    if !listener.is_async() {
        return;
    }
    let Some(name) = listener.context.as_deref() else {
        return;
    };
    let serial = core
        .state
        .borrow()
        .contexts
        .get(name)
        .is_some_and(|context| context.serial);
    if serial {
        process_queue(core, name, true);
    }
}

/// Accounts for a finished listener: records the first interruption or fires
/// the completion callback once everyone is done.
fn settle(core: &Rc<Core>, event: &Event, outcome: Outcome) {
    if let Outcome::Interrupt(value) = outcome {
        let interruptible = core.state.borrow().interruptible;
        if interruptible && event.name() != INTERRUPT && event.set_interrupt(value.clone()) {
            debug!(event = %event.name(), id = event.id(), "event interrupted");
            event.complete(Outcome::Interrupt(value.clone()));
            emit_meta(core, INTERRUPT, vec![value]);
            return;
        }
    }

    if event.all_done() && event.has_callback() {
        event.complete(Outcome::Continue);
    }
}

/// Completion handle given to async listeners.
///
/// Consuming it marks the listener done. A serial context admits its next
/// queued invocation at that point. Dropping the handle without calling it
/// leaves the listener in flight forever.
#[must_use = "an async listener is only done once its Done handle is called"]
pub struct Done {
    core: Rc<Core>,
    event: Event,
    context: Option<String>,
    serial: bool,
}

impl Done {
    fn claim(core: &Rc<Core>, event: &Event, listener: &Listener) -> Self {
        let mut serial = false;
        if let Some(name) = listener.context.as_deref() {
            if let Some(context) = core.state.borrow_mut().contexts.get_mut(name) {
                serial = context.serial;
                context.ready = !serial;
            }
        }
        Self {
            core: core.clone(),
            event: event.clone(),
            context: listener.context.clone(),
            serial,
        }
    }

    /// The event this listener is handling.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Finishes with an explicit outcome.
    pub fn finish(self, outcome: Outcome) {
        self.event.mark_done();
        settle(&self.core, &self.event, outcome);
        if self.serial {
            if let Some(name) = self.context.as_deref() {
                process_queue(&self.core, name, true);
            }
        }
    }

    /// Finishes without interrupting.
    pub fn done(self) {
        self.finish(Outcome::Continue);
    }

    /// Finishes and asks to interrupt the event with `value`.
    pub fn interrupt(self, value: impl Into<Value>) {
        self.finish(Outcome::Interrupt(value.into()));
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("event", &self.event.name())
            .field("event_id", &self.event.id())
            .field("context", &self.context)
            .field("serial", &self.serial)
            .finish()
    }
}

/// Drains a context queue while the context admits work.
///
/// `completion` is set when a serial listener just finished, which frees the
/// context's slot first. The recursion depth is raised once around the whole
/// drain.
pub(crate) fn process_queue(core: &Rc<Core>, name: &str, completion: bool) {
    {
        let mut state = core.state.borrow_mut();
        let Some(context) = state.contexts.get_mut(name) else {
            return;
        };
        if completion {
            context.ready = true;
        }
    }

    let _recursion = RecursionGuard::enter(core);
    loop {
        let job = {
            let mut state = core.state.borrow_mut();
            let Some(context) = state.contexts.get_mut(name) else {
                return;
            };
            if !context.ready || context.status == ContextStatus::Queued {
                return;
            }
            let Some(job) = context.queue.pop_front() else {
                return;
            };
            if job.event.is_interrupted() {
                continue;
            }
            if context.serial && job.listener.is_async() {
                context.ready = false;
            }
            job
        };

        trace!(event = %job.event.name(), context = name, "dequeued listener invocation");
        schedule(core, &job.event, &job.listener, job.nice);
    }
}
