/// Peer side of a proxied service
use super::message::{Ack, Method, ProxyMessage};
use super::ProxyInner;
use crate::error::{EmitterError, ProxyError};
use crate::events::Emission;
use crate::listener::{Listener, ListenerId, ListenerInfo, Outcome};
use crate::system::Emitter;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

type AckCallback = Box<dyn FnOnce(Outcome)>;

/// What the peer was asked to forward for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Listening,
    ListeningWithAck,
}

struct RemoteInner {
    id: String,
    proxy: Weak<ProxyInner>,
    emitter: Emitter,
    events: RefCell<HashMap<String, Subscription>>,
    /// `emit_with_ack` callbacks waiting for `ackEmit`, by ack id
    pending: RefCell<HashMap<u64, AckCallback>>,
    destroyed: Cell<bool>,
}

/// Local stand-in for a service living on the peer.
///
/// Listeners are registered on a synthetic emitter that replays the events
/// the peer forwards. The first listener of an event subscribes remotely,
/// the last one removed unsubscribes.
#[derive(Clone)]
pub struct RemoteService {
    inner: Rc<RemoteInner>,
}

impl RemoteService {
    pub(crate) fn new(proxy: Weak<ProxyInner>, id: &str, emitter: Emitter) -> Self {
        Self {
            inner: Rc::new(RemoteInner {
                id: id.to_string(),
                proxy,
                emitter,
                events: RefCell::new(HashMap::new()),
                pending: RefCell::new(HashMap::new()),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The synthetic emitter replaying the peer's events.
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// True when the peer was asked to forward `event`.
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.inner.events.borrow().contains_key(event)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.emitter.listener_count(event)
    }

    fn check_alive(&self) -> Result<Rc<ProxyInner>, ProxyError> {
        if self.is_destroyed() {
            return Err(ProxyError::ServiceDestroyed(self.inner.id.clone()));
        }
        self.inner
            .proxy
            .upgrade()
            .ok_or_else(|| ProxyError::ServiceDestroyed(self.inner.id.clone()))
    }

    /// Registers a listener and subscribes remotely when needed.
    ///
    /// An async listener asks the peer for acknowledged forwarding, so that
    /// the peer's emission completes only once this side is done.
    pub fn on(&self, event: &str, listener: Listener) -> Result<ListenerId, ProxyError> {
        let proxy = self.check_alive()?;
        let with_ack = listener.is_async();
        let id = self.inner.emitter.on(event, listener)?;

        let current = self.inner.events.borrow().get(event).copied();
        let wanted = match (current, with_ack) {
            (None, false) => Subscription::Listening,
            (None, true) | (Some(Subscription::Listening), true) => Subscription::ListeningWithAck,
            _ => return Ok(id),
        };
        self.inner.events.borrow_mut().insert(event.to_string(), wanted);

        let mut message = ProxyMessage::new(self.inner.id.clone(), Method::Listen, event);
        if wanted == Subscription::ListeningWithAck {
            message = message.with_ack(Ack::Requested(true));
        }
        debug!(service = %self.inner.id, event, ack = with_ack, "subscribing");
        proxy.send(message)?;
        Ok(id)
    }

    /// Registers a listener removed after its first run.
    pub fn once(&self, event: &str, listener: Listener) -> Result<ListenerId, ProxyError> {
        self.on(event, listener.once())
    }

    /// Removes matching listeners; unsubscribes remotely when none remain.
    pub fn off(&self, event: &str, id: impl Into<ListenerId>) -> Result<Vec<ListenerInfo>, ProxyError> {
        let proxy = self.check_alive()?;
        let removed = self.inner.emitter.off(event, id)?;
        self.unsubscribe_if_idle(&proxy, event)?;
        Ok(removed)
    }

    fn unsubscribe_if_idle(&self, proxy: &ProxyInner, event: &str) -> Result<(), ProxyError> {
        if self.inner.emitter.listener_count(event) > 0 {
            return Ok(());
        }
        if self.inner.events.borrow_mut().remove(event).is_none() {
            return Ok(());
        }
        debug!(service = %self.inner.id, event, "unsubscribing");
        proxy.send(ProxyMessage::new(self.inner.id.clone(), Method::Ignore, event))
    }

    /// Emits on the peer's service.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), ProxyError> {
        let proxy = self.check_alive()?;
        if event.is_empty() {
            return Err(EmitterError::InvalidEventName(String::new()).into());
        }
        proxy.send(ProxyMessage::new(self.inner.id.clone(), Method::Emit, event).with_args(args))
    }

    /// Emits on the peer's service and calls `callback` with the outcome of
    /// the remote emission once the peer acknowledges it.
    ///
    /// The callback is discarded if the service is destroyed first.
    pub fn emit_with_ack<F>(&self, event: &str, args: Vec<Value>, callback: F) -> Result<(), ProxyError>
    where
        F: FnOnce(Outcome) + 'static,
    {
        let proxy = self.check_alive()?;
        if event.is_empty() {
            return Err(EmitterError::InvalidEventName(String::new()).into());
        }
        let ack_id = proxy.next_ack_id();
        self.inner.pending.borrow_mut().insert(ack_id, Box::new(callback));
        let message = ProxyMessage::new(self.inner.id.clone(), Method::Emit, event)
            .with_args(args)
            .with_ack(Ack::Id(ack_id));
        if let Err(error) = proxy.send(message) {
            self.inner.pending.borrow_mut().remove(&ack_id);
            return Err(error);
        }
        Ok(())
    }

    /// Drops every listener and pending acknowledgement.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        if let Err(error) = self.inner.emitter.remove_all_listeners(None) {
            trace!(service = %self.inner.id, %error, "listener removal failed");
        }
        self.inner.events.borrow_mut().clear();
        self.inner.pending.borrow_mut().clear();
        debug!(service = %self.inner.id, "remote service destroyed");
    }

    /// Handles `event`: replays the forwarded event on the synthetic emitter.
    ///
    /// When the peer waits for an acknowledgement, `ackEvent` is sent once
    /// every local listener is done.
    pub(crate) fn receive_event(&self, message: &ProxyMessage) {
        let Ok(proxy) = self.check_alive() else {
            return;
        };
        if !self.inner.events.borrow().contains_key(&message.event) {
            debug!(service = %self.inner.id, event = %message.event, "event not subscribed, dropped");
            return;
        }
        trace!(service = %self.inner.id, event = %message.event, "event received");

        let mut emission = Emission::new(message.event.clone()).args(message.args());
        if let Some(ack_id) = message.ack_id() {
            let link = self.inner.proxy.clone();
            let service = self.inner.id.clone();
            emission = emission.on_complete(move |_, event| {
                if let Some(proxy) = link.upgrade() {
                    proxy.send_or_log(
                        ProxyMessage::new(service, Method::AckEvent, event.name()).with_ack(Ack::Id(ack_id)),
                    );
                }
            });
        }
        if let Err(error) = self.inner.emitter.dispatch(emission) {
            debug!(service = %self.inner.id, event = %message.event, %error, "forwarded event failed");
        }

        if let Err(error) = self.unsubscribe_if_idle(&proxy, &message.event) {
            debug!(service = %self.inner.id, %error, "unsubscribe failed");
        }
    }

    /// Handles `ackEmit`: resolves the matching `emit_with_ack` callback.
    pub(crate) fn receive_ack_emit(&self, message: &ProxyMessage) {
        if self.is_destroyed() {
            return;
        }
        let Some(ack_id) = message.ack_id() else {
            return;
        };
        let callback = self.inner.pending.borrow_mut().remove(&ack_id);
        let Some(callback) = callback else {
            debug!(service = %self.inner.id, ack_id, "unknown ackEmit");
            return;
        };
        let outcome = match message.interruption.clone() {
            Some(value) => Outcome::Interrupt(value),
            None => Outcome::Continue,
        };
        callback(outcome);
    }
}

impl fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteService")
            .field("id", &self.inner.id)
            .field("events", &self.inner.events.borrow())
            .field("pending_acks", &self.inner.pending.borrow().len())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
