/// Local side of a proxied service
use super::message::{Ack, Method, ProxyMessage};
use super::{ProxyInner, ServiceCapabilities};
use crate::events::{Emission, Event};
use crate::listener::{Listener, ListenerId};
use crate::system::{Done, Emitter};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Forwarding listener installed on the wrapped emitter for one event.
struct Forwarder {
    id: ListenerId,
    ack: bool,
}

struct LocalInner {
    id: String,
    proxy: Weak<ProxyInner>,
    emitter: Emitter,
    capabilities: ServiceCapabilities,
    forwarders: RefCell<HashMap<String, Forwarder>>,
    /// Forwarded events waiting for the peer's `ackEvent`, by ack id
    pending: RefCell<HashMap<u64, Done>>,
    destroyed: Cell<bool>,
}

/// A real emitter exposed to the peer.
///
/// Only events the peer subscribed to with `listen` are forwarded, and
/// every wire request is checked against the service capabilities.
#[derive(Clone)]
pub struct LocalService {
    inner: Rc<LocalInner>,
}

impl LocalService {
    pub(crate) fn new(proxy: Weak<ProxyInner>, id: &str, emitter: &Emitter, capabilities: ServiceCapabilities) -> Self {
        Self {
            inner: Rc::new(LocalInner {
                id: id.to_string(),
                proxy,
                emitter: emitter.clone(),
                capabilities,
                forwarders: RefCell::new(HashMap::new()),
                pending: RefCell::new(HashMap::new()),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The wrapped emitter.
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn capabilities(&self) -> ServiceCapabilities {
        self.inner.capabilities
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// True when the peer subscribed to `event`.
    pub fn is_forwarding(&self, event: &str) -> bool {
        self.inner.forwarders.borrow().contains_key(event)
    }

    /// True when `event` is forwarded with acknowledgement.
    pub fn is_forwarding_with_ack(&self, event: &str) -> bool {
        self.inner.forwarders.borrow().get(event).is_some_and(|f| f.ack)
    }

    /// Names of the forwarded events, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.forwarders.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes the forwarding listeners and releases every event still
    /// waiting for an acknowledgement.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let forwarders: Vec<(String, Forwarder)> = self.inner.forwarders.borrow_mut().drain().collect();
        for (event, forwarder) in forwarders {
            if let Err(error) = self.inner.emitter.off(&event, forwarder.id) {
                trace!(service = %self.inner.id, %error, "forwarder removal failed");
            }
        }
        let pending: Vec<Done> = self.inner.pending.borrow_mut().drain().map(|(_, done)| done).collect();
        for done in pending {
            done.done();
        }
        debug!(service = %self.inner.id, "local service destroyed");
    }

    fn send(&self, message: ProxyMessage) {
        if let Some(proxy) = self.inner.proxy.upgrade() {
            proxy.send_or_log(message);
        }
    }

    /// Handles `listen`: installs the forwarder for the event.
    ///
    /// A plain subscription is upgraded when the peer later asks for
    /// acknowledgement.
    pub(crate) fn receive_listen(&self, message: &ProxyMessage) {
        if self.is_destroyed() || !self.inner.capabilities.listen {
            debug!(service = %self.inner.id, event = %message.event, "listen refused");
            return;
        }
        let with_ack = message.ack_requested();
        if with_ack && !self.inner.capabilities.ack {
            debug!(service = %self.inner.id, event = %message.event, "ack not granted, listen refused");
            return;
        }

        let upgrade = match self.inner.forwarders.borrow().get(&message.event) {
            None => None,
            Some(existing) if with_ack && !existing.ack => Some(existing.id.clone()),
            Some(_) => return,
        };
        if let Some(previous) = upgrade {
            self.inner.forwarders.borrow_mut().remove(&message.event);
            if let Err(error) = self.inner.emitter.off(&message.event, previous) {
                trace!(service = %self.inner.id, %error, "forwarder removal failed");
            }
        }

        let service = Rc::downgrade(&self.inner);
        let listener = if with_ack {
            Listener::event_object_with_done(move |event, done| {
                match service.upgrade() {
                    Some(inner) => LocalService { inner }.forward_with_ack(event, done),
                    None => done.done(),
                }
            })
        } else {
            Listener::event_object(move |event: &Event| {
                if let Some(inner) = service.upgrade() {
                    LocalService { inner }.forward(event);
                }
            })
        };

        match self.inner.emitter.on(&message.event, listener) {
            Ok(id) => {
                debug!(service = %self.inner.id, event = %message.event, ack = with_ack, "forwarding event");
                self.inner
                    .forwarders
                    .borrow_mut()
                    .insert(message.event.clone(), Forwarder { id, ack: with_ack });
            }
            Err(error) => debug!(service = %self.inner.id, %error, "listen failed"),
        }
    }

    /// Handles `ignore`: drops the forwarder for the event.
    pub(crate) fn receive_ignore(&self, message: &ProxyMessage) {
        if self.is_destroyed() || !self.inner.capabilities.listen {
            return;
        }
        let Some(forwarder) = self.inner.forwarders.borrow_mut().remove(&message.event) else {
            return;
        };
        debug!(service = %self.inner.id, event = %message.event, "forwarding stopped");
        if let Err(error) = self.inner.emitter.off(&message.event, forwarder.id) {
            trace!(service = %self.inner.id, %error, "forwarder removal failed");
        }
    }

    /// Handles `ackEvent`: completes the forwarded event it acknowledges.
    pub(crate) fn receive_ack_event(&self, message: &ProxyMessage) {
        if self.is_destroyed() || !self.inner.capabilities.listen || !self.inner.capabilities.ack {
            return;
        }
        let Some(ack_id) = message.ack_id() else {
            return;
        };
        let done = self.inner.pending.borrow_mut().remove(&ack_id);
        match done {
            Some(done) => done.done(),
            None => debug!(service = %self.inner.id, ack_id, "unknown ackEvent"),
        }
    }

    /// Handles `emit`: replays the peer's emission on the wrapped emitter,
    /// answering with `ackEmit` when asked to.
    pub(crate) fn receive_emit(&self, message: &ProxyMessage) {
        if self.is_destroyed() || !self.inner.capabilities.emit {
            debug!(service = %self.inner.id, event = %message.event, "emit refused");
            return;
        }

        let mut emission = Emission::new(message.event.clone()).args(message.args());
        if let (Some(ack_id), true) = (message.ack_id(), self.inner.capabilities.ack) {
            let proxy = self.inner.proxy.clone();
            let service = self.inner.id.clone();
            emission = emission.on_complete(move |outcome, event| {
                if let Some(proxy) = proxy.upgrade() {
                    let reply = ProxyMessage::new(service, Method::AckEmit, event.name())
                        .with_ack(Ack::Id(ack_id))
                        .with_interruption(outcome.into_interruption());
                    proxy.send_or_log(reply);
                }
            });
        }

        if let Err(error) = self.inner.emitter.dispatch(emission) {
            debug!(service = %self.inner.id, event = %message.event, %error, "remote emit failed");
        }
    }

    fn forward(&self, event: &Event) {
        if self.is_destroyed() {
            return;
        }
        trace!(service = %self.inner.id, event = %event.name(), "forwarding");
        self.send(ProxyMessage::new(self.inner.id.clone(), Method::Event, event.name()).with_args(event.args().to_vec()));
    }

    /// Forwards and keeps the listener in flight until the peer acknowledges.
    ///
    /// An event nobody waits on anymore is forwarded without ack.
    fn forward_with_ack(&self, event: &Event, done: Done) {
        let Some(proxy) = self.inner.proxy.upgrade() else {
            done.done();
            return;
        };
        if self.is_destroyed() || event.is_settled() {
            self.forward(event);
            done.done();
            return;
        }

        let ack_id = proxy.next_ack_id();
        self.inner.pending.borrow_mut().insert(ack_id, done);
        let message = ProxyMessage::new(self.inner.id.clone(), Method::Event, event.name())
            .with_args(event.args().to_vec())
            .with_ack(Ack::Id(ack_id));
        if let Err(error) = proxy.send(message) {
            debug!(service = %self.inner.id, %error, "forward failed, releasing listener");
            let done = self.inner.pending.borrow_mut().remove(&ack_id);
            if let Some(done) = done {
                done.done();
            }
        }
    }
}

impl fmt::Debug for LocalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalService")
            .field("id", &self.inner.id)
            .field("capabilities", &self.inner.capabilities)
            .field("subscriptions", &self.subscriptions())
            .field("pending_acks", &self.inner.pending.borrow().len())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
