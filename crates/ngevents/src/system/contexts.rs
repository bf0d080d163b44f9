/// Listener context management
use super::core::{Core, Emitter};
use super::emitters::{emit_meta, process_queue};
use crate::error::EmitterError;
use crate::events::Event;
use crate::listener::{Listener, ListenerInfo};
use crate::types::{ContextStatus, Nice, REMOVE_LISTENER, SYNC};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

/// A listener invocation parked in a context queue.
pub(crate) struct QueuedJob {
    pub(crate) event: Event,
    pub(crate) listener: Rc<Listener>,
    pub(crate) nice: Nice,
}

/// Scheduling state shared by every listener attached to one context name.
pub(crate) struct ListenerContext {
    pub(crate) status: ContextStatus,
    pub(crate) nice: Nice,
    /// At most one async listener of the context runs at a time
    pub(crate) serial: bool,
    /// False while a serial context has a listener in flight
    pub(crate) ready: bool,
    pub(crate) queue: VecDeque<QueuedJob>,
}

impl Default for ListenerContext {
    fn default() -> Self {
        Self {
            status: ContextStatus::Enabled,
            nice: SYNC,
            serial: false,
            ready: true,
            queue: VecDeque::new(),
        }
    }
}

/// Options of [`Emitter::add_listener_context`]; unset fields keep their
/// current value (or the default when the context is created).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub nice: Option<Nice>,
    pub status: Option<ContextStatus>,
    pub serial: Option<bool>,
}

impl ContextOptions {
    pub fn nice(mut self, nice: Nice) -> Self {
        self.nice = Some(nice);
        self
    }

    pub fn status(mut self, status: ContextStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = Some(serial);
        self
    }
}

fn validate(name: &str) -> Result<(), EmitterError> {
    if name.is_empty() {
        return Err(EmitterError::InvalidContextName(name.to_string()));
    }
    Ok(())
}

/// Creates the context if missing, then applies `update` to it.
fn with_context<R>(core: &Rc<Core>, name: &str, update: impl FnOnce(&mut ListenerContext) -> R) -> R {
    let mut state = core.state.borrow_mut();
    let context = state.contexts.entry(name.to_string()).or_default();
    update(context)
}

impl Emitter {
    /// Creates or updates a listener context.
    ///
    /// Idempotent: options left unset keep their current value. Changing the
    /// status through this call does not drain a queue; use
    /// [`enable_listener_context`](Self::enable_listener_context) for that.
    pub fn add_listener_context(&self, name: &str, options: ContextOptions) -> Result<(), EmitterError> {
        validate(name)?;
        let core = self.core();
        with_context(&core, name, |context| {
            if let Some(nice) = options.nice {
                context.nice = nice;
            }
            if let Some(status) = options.status {
                context.status = status;
            }
            if let Some(serial) = options.serial {
                context.serial = serial;
            }
        });
        debug!(context = name, ?options, "listener context configured");
        Ok(())
    }

    /// Skips the context's listeners until it is enabled again; events
    /// emitted meanwhile are lost for them.
    pub fn disable_listener_context(&self, name: &str) -> Result<(), EmitterError> {
        self.set_context_status(name, ContextStatus::Disabled)
    }

    /// Parks the context's listener invocations until it is enabled again.
    pub fn queue_listener_context(&self, name: &str) -> Result<(), EmitterError> {
        self.set_context_status(name, ContextStatus::Queued)
    }

    /// Re-enables the context and drains its queue before returning.
    pub fn enable_listener_context(&self, name: &str) -> Result<(), EmitterError> {
        self.set_context_status(name, ContextStatus::Enabled)?;
        process_queue(&self.core(), name, false);
        Ok(())
    }

    fn set_context_status(&self, name: &str, status: ContextStatus) -> Result<(), EmitterError> {
        validate(name)?;
        let core = self.core();
        with_context(&core, name, |context| context.status = status);
        debug!(context = name, ?status, "listener context status changed");
        Ok(())
    }

    /// Makes the context admit one async listener at a time (or lifts it).
    ///
    /// Only affects later invocations; nothing is drained here.
    pub fn serialize_listener_context(&self, name: &str, serial: bool) -> Result<(), EmitterError> {
        validate(name)?;
        let core = self.core();
        with_context(&core, name, |context| context.serial = serial);
        debug!(context = name, serial, "listener context serialization changed");
        Ok(())
    }

    pub fn set_listener_context_nice(&self, name: &str, nice: Nice) -> Result<(), EmitterError> {
        validate(name)?;
        let core = self.core();
        with_context(&core, name, |context| context.nice = nice);
        Ok(())
    }

    /// Removes the context along with every listener attached to it.
    ///
    /// The removed listeners are reported in one `removeListener` emission.
    /// Queued jobs are dropped.
    pub fn destroy_listener_context(&self, name: &str) -> Result<(), EmitterError> {
        validate(name)?;
        let core = self.core();
        let removed = {
            let mut state = core.state.borrow_mut();
            let mut removed: Vec<ListenerInfo> = Vec::new();
            for (event, list) in state.listeners.iter_mut() {
                list.retain(|listener| {
                    if listener.context.as_deref() == Some(name) {
                        removed.push(listener.info(event));
                        false
                    } else {
                        true
                    }
                });
            }
            state.listeners.retain(|_, list| !list.is_empty());
            state.contexts.remove(name);
            removed
        };

        debug!(context = name, removed = removed.len(), "listener context destroyed");
        if !removed.is_empty() && core.has_listeners(REMOVE_LISTENER) {
            emit_meta(&core, REMOVE_LISTENER, ListenerInfo::to_args(&removed));
        }
        Ok(())
    }

    pub fn has_listener_context(&self, name: &str) -> bool {
        self.core().state.borrow().contexts.contains_key(name)
    }

    pub fn listener_context_status(&self, name: &str) -> Option<ContextStatus> {
        self.core().state.borrow().contexts.get(name).map(|context| context.status)
    }

    /// Number of invocations waiting in the context queue.
    pub fn queued_jobs(&self, name: &str) -> usize {
        self.core()
            .state
            .borrow()
            .contexts
            .get(name)
            .map_or(0, |context| context.queue.len())
    }
}

/// Creates a context on first reference by a listener.
pub(crate) fn ensure_context(core: &Rc<Core>, name: &str) {
    with_context(core, name, |_| ());
}
