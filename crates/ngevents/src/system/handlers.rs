/// Listener registration and removal
use super::contexts::ensure_context;
use super::core::Emitter;
use super::emitters::{emit_event, emit_meta, emit_to_one_listener};
use crate::error::EmitterError;
use crate::events::Emission;
use crate::listener::{Listener, ListenerId, ListenerInfo};
use crate::types::{NEW_LISTENER, REMOVE_LISTENER};
use std::rc::Rc;
use tracing::{trace, warn};

fn validate_name(name: &str) -> Result<(), EmitterError> {
    if name.is_empty() {
        return Err(EmitterError::InvalidEventName(name.to_string()));
    }
    Ok(())
}

impl Emitter {
    /// Registers a listener for `name`, see [`add_listener`](Self::add_listener).
    pub fn on(&self, name: &str, listener: Listener) -> Result<ListenerId, EmitterError> {
        self.add_listener(name, listener)
    }

    /// Registers a listener that is removed right before its first run.
    pub fn once(&self, name: &str, listener: Listener) -> Result<ListenerId, EmitterError> {
        self.add_listener(name, listener.once())
    }

    /// Appends a listener to the list of `name` and returns its id.
    ///
    /// The listener's context is created if it does not exist yet. When
    /// `newListener` has listeners, they receive the new listener's
    /// descriptor; those present before this call are the ones notified, so
    /// registering a `newListener` listener does not notify itself.
    ///
    /// If `name` is a state event with a cached value, the new listener alone
    /// receives that value synchronously before this returns. A once-listener
    /// is consumed by that replay.
    ///
    /// ```rust
    /// use ngevents::{Emitter, Listener, ManualScheduler};
    /// use serde_json::json;
    /// use std::rc::Rc;
    ///
    /// let emitter = Emitter::with_scheduler(Rc::new(ManualScheduler::new()));
    /// let id = emitter.on("tick", Listener::new(|args| println!("tick {args:?}"))).unwrap();
    /// emitter.emit("tick", vec![json!(1)]).unwrap();
    /// emitter.off("tick", id).unwrap();
    /// assert_eq!(emitter.listener_count("tick"), 0);
    /// ```
    pub fn add_listener(&self, name: &str, listener: Listener) -> Result<ListenerId, EmitterError> {
        validate_name(name)?;
        let core = self.core();

        if let Some(context) = listener.context.as_deref() {
            if context.is_empty() {
                return Err(EmitterError::InvalidContextName(context.to_string()));
            }
            ensure_context(&core, context);
        }

        let id = listener.id.clone();
        let listener = Rc::new(listener);

        let (notify, count, limit, warn_now) = {
            let mut state = core.state.borrow_mut();
            let notify = state
                .listeners
                .get(NEW_LISTENER)
                .filter(|list| !list.is_empty())
                .cloned();

            let list = state.listeners.entry(name.to_string()).or_default();
            list.push(listener.clone());
            let count = list.len();

            let limit = state.max_listeners;
            let warn_now = limit > 0 && count > limit && state.overflow_warned.insert(name.to_string());
            (notify, count, limit, warn_now)
        };

        trace!(event = name, id = %id, count, "listener added");
        if warn_now {
            warn!(
                event = name,
                count,
                limit,
                "possible listener leak: more listeners than the configured maximum"
            );
        }

        if let Some(notify) = notify {
            let emission = Emission::new(NEW_LISTENER)
                .args(ListenerInfo::to_args(&[listener.info(name)]))
                .with_listeners(notify);
            if let Err(error) = emit_event(&core, emission) {
                warn!(%error, "newListener dispatch failed");
            }
        }

        let cached = core.state.borrow().states.get(name).cloned().flatten();
        if let Some(event) = cached {
            emit_to_one_listener(&core, &event, &listener, None);
        }

        Ok(id)
    }

    /// Alias of [`remove_listener`](Self::remove_listener).
    pub fn off(&self, name: &str, id: impl Into<ListenerId>) -> Result<Vec<ListenerInfo>, EmitterError> {
        self.remove_listener(name, id)
    }

    /// Removes every listener of `name` whose id matches.
    ///
    /// Returns the descriptors of the removed listeners, which are also sent
    /// in one `removeListener` emission.
    pub fn remove_listener(&self, name: &str, id: impl Into<ListenerId>) -> Result<Vec<ListenerInfo>, EmitterError> {
        validate_name(name)?;
        let id = id.into();
        let core = self.core();

        let removed = {
            let mut state = core.state.borrow_mut();
            let Some(list) = state.listeners.get_mut(name) else {
                return Ok(Vec::new());
            };
            let mut removed = Vec::new();
            list.retain(|listener| {
                if listener.id == id {
                    removed.push(listener.info(name));
                    false
                } else {
                    true
                }
            });
            if list.is_empty() {
                state.listeners.remove(name);
            }
            removed
        };

        if !removed.is_empty() && core.has_listeners(REMOVE_LISTENER) {
            emit_meta(&core, REMOVE_LISTENER, ListenerInfo::to_args(&removed));
        }
        Ok(removed)
    }

    /// Removes all listeners of `name`, or of every event when `None`.
    ///
    /// Wiping the whole registry emits nothing: the `removeListener`
    /// listeners are gone too.
    pub fn remove_all_listeners(&self, name: Option<&str>) -> Result<(), EmitterError> {
        let core = self.core();
        let Some(name) = name else {
            core.state.borrow_mut().listeners.clear();
            return Ok(());
        };
        validate_name(name)?;

        let removed: Vec<ListenerInfo> = core
            .state
            .borrow_mut()
            .listeners
            .remove(name)
            .unwrap_or_default()
            .iter()
            .map(|listener| listener.info(name))
            .collect();

        if !removed.is_empty() && core.has_listeners(REMOVE_LISTENER) {
            emit_meta(&core, REMOVE_LISTENER, ListenerInfo::to_args(&removed));
        }
        Ok(())
    }

    /// Copies of the listeners registered for `name`, in dispatch order.
    pub fn listeners(&self, name: &str) -> Vec<Listener> {
        self.core()
            .state
            .borrow()
            .listeners
            .get(name)
            .map(|list| list.iter().map(|listener| Listener::clone(listener)).collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.core()
            .state
            .borrow()
            .listeners
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Names of the events that currently have listeners.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.core().state.borrow().listeners.keys().cloned().collect();
        names.sort();
        names
    }
}
