//! # Proxy
//!
//! Mirrors emitters across a message channel so two processes share a
//! virtual event bus.
//!
//! - A [`LocalService`] exposes a real local emitter to the peer, within a set
//!   of [`ServiceCapabilities`]. It forwards only the events the peer
//!   subscribed to.
//! - A [`RemoteService`] stands for a service of the peer. Listening on it
//!   subscribes remotely, emitting on it emits remotely, and forwarded events
//!   are replayed on its own synthetic emitter.
//!
//! The wire boundary is untrusted: malformed messages, unknown services and
//! missing capabilities are dropped without raising anything.

mod local;
mod message;
mod remote;
mod transport;

pub use local::LocalService;
pub use message::{Ack, Method, ProxyMessage, MESSAGE_TYPE};
pub use remote::RemoteService;
pub use transport::{ChannelTransport, MemoryTransport, Transport};

use crate::error::ProxyError;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::system::Emitter;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

/// What the peer may do with a local service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCapabilities {
    /// Subscribe to events
    pub listen: bool,
    /// Emit events
    pub emit: bool,
    /// Request acknowledgements, on subscriptions and emits
    pub ack: bool,
    /// Reserved for remote procedure calls
    pub rpc: bool,
}

impl ServiceCapabilities {
    pub fn all() -> Self {
        Self {
            listen: true,
            emit: true,
            ack: true,
            rpc: true,
        }
    }

    pub fn listen_only() -> Self {
        Self {
            listen: true,
            ..Self::default()
        }
    }
}

pub(crate) struct ProxyInner {
    local_services: RefCell<HashMap<String, LocalService>>,
    remote_services: RefCell<HashMap<String, RemoteService>>,
    next_ack_id: Cell<u64>,
    transport: Rc<dyn Transport>,
    scheduler: Rc<dyn Scheduler>,
    destroyed: Cell<bool>,
}

impl ProxyInner {
    /// Sends through the transport; a destroyed proxy sends nothing.
    pub(crate) fn send(&self, message: ProxyMessage) -> Result<(), ProxyError> {
        if self.destroyed.get() {
            return Ok(());
        }
        self.transport.send(&message)
    }

    /// Sends from a listener or a wire handler, where failures can only be
    /// logged.
    pub(crate) fn send_or_log(&self, message: ProxyMessage) {
        let (service, method) = (message.service.clone(), message.method);
        if let Err(error) = self.send(message) {
            warn!(service = %service, ?method, %error, "proxy send failed");
        }
    }

    pub(crate) fn next_ack_id(&self) -> u64 {
        let id = self.next_ack_id.get();
        self.next_ack_id.set(id + 1);
        id
    }

    pub(crate) fn emitter(&self) -> Emitter {
        Emitter::with_scheduler(self.scheduler.clone())
    }
}

/// Owner of the local and remote services sharing one transport.
///
/// ```rust
/// use ngevents::proxy::{MemoryTransport, Proxy, ServiceCapabilities};
/// use ngevents::{Emitter, Listener, ManualScheduler};
/// use serde_json::json;
/// use std::rc::Rc;
///
/// let clock = Rc::new(ManualScheduler::new());
/// let (to_server, to_client) = (MemoryTransport::new(), MemoryTransport::new());
///
/// let server = Proxy::with_scheduler(to_client.clone(), clock.clone());
/// let heart = Emitter::with_scheduler(clock.clone());
/// server.add_local_service("heartBeat", &heart, ServiceCapabilities::listen_only());
///
/// let client = Proxy::with_scheduler(to_server.clone(), clock.clone());
/// let remote = client.add_remote_service("heartBeat");
/// remote.on("beat", Listener::new(|args| println!("beat {args:?}"))).unwrap();
///
/// to_server.deliver_to(&server);
/// heart.emit("beat", vec![json!(1)]).unwrap();
/// assert_eq!(to_client.deliver_to(&client), 1);
/// ```
#[derive(Clone)]
pub struct Proxy {
    inner: Rc<ProxyInner>,
}

impl Proxy {
    /// Creates a proxy whose synthetic emitters run on the tokio scheduler.
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self::with_scheduler(transport, Rc::new(TokioScheduler))
    }

    pub fn with_scheduler(transport: Rc<dyn Transport>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(ProxyInner {
                local_services: RefCell::new(HashMap::new()),
                remote_services: RefCell::new(HashMap::new()),
                next_ack_id: Cell::new(1),
                transport,
                scheduler,
                destroyed: Cell::new(false),
            }),
        }
    }

    fn link(&self) -> Weak<ProxyInner> {
        Rc::downgrade(&self.inner)
    }

    /// Exposes `emitter` to the peer as service `id`.
    ///
    /// A service previously registered under the same id is destroyed.
    pub fn add_local_service(&self, id: &str, emitter: &Emitter, capabilities: ServiceCapabilities) -> LocalService {
        let service = LocalService::new(self.link(), id, emitter, capabilities);
        let previous = self
            .inner
            .local_services
            .borrow_mut()
            .insert(id.to_string(), service.clone());
        if let Some(previous) = previous {
            previous.destroy();
        }
        debug!(service = id, ?capabilities, "local service added");
        service
    }

    /// Creates the local stand-in for the peer's service `id`.
    ///
    /// A service previously registered under the same id is destroyed.
    pub fn add_remote_service(&self, id: &str) -> RemoteService {
        let service = RemoteService::new(self.link(), id, self.inner.emitter());
        let previous = self
            .inner
            .remote_services
            .borrow_mut()
            .insert(id.to_string(), service.clone());
        if let Some(previous) = previous {
            previous.destroy();
        }
        debug!(service = id, "remote service added");
        service
    }

    pub fn local_service(&self, id: &str) -> Option<LocalService> {
        self.inner.local_services.borrow().get(id).cloned()
    }

    pub fn remote_service(&self, id: &str) -> Option<RemoteService> {
        self.inner.remote_services.borrow().get(id).cloned()
    }

    /// Tears down every service; later sends and receives are no-ops.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let locals: Vec<LocalService> = self.inner.local_services.borrow_mut().drain().map(|(_, s)| s).collect();
        let remotes: Vec<RemoteService> = self.inner.remote_services.borrow_mut().drain().map(|(_, s)| s).collect();
        for service in &locals {
            service.destroy();
        }
        for service in &remotes {
            service.destroy();
        }
        info!(
            local_services = locals.len(),
            remote_services = remotes.len(),
            "proxy destroyed"
        );
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Decodes raw text from the channel and routes it.
    pub fn receive(&self, raw: &str) {
        if self.is_destroyed() {
            return;
        }
        if let Some(message) = ProxyMessage::decode(raw) {
            self.push(message);
        }
    }

    /// Routes a decoded message to the service it targets.
    pub fn push(&self, message: ProxyMessage) {
        if self.is_destroyed() {
            return;
        }
        if !message.is_valid() {
            debug!(service = %message.service, "dropping invalid proxy message");
            return;
        }

        match message.method {
            Method::Event | Method::AckEmit => {
                let Some(service) = self.remote_service(&message.service) else {
                    debug!(service = %message.service, method = ?message.method, "no such remote service");
                    return;
                };
                match message.method {
                    Method::Event => service.receive_event(&message),
                    _ => service.receive_ack_emit(&message),
                }
            }
            Method::Emit | Method::Listen | Method::Ignore | Method::AckEvent => {
                let Some(service) = self.local_service(&message.service) else {
                    debug!(service = %message.service, method = ?message.method, "no such local service");
                    return;
                };
                match message.method {
                    Method::Emit => service.receive_emit(&message),
                    Method::Listen => service.receive_listen(&message),
                    Method::Ignore => service.receive_ignore(&message),
                    _ => service.receive_ack_event(&message),
                }
            }
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("local_services", &self.inner.local_services.borrow().len())
            .field("remote_services", &self.inner.remote_services.borrow().len())
            .field("next_ack_id", &self.inner.next_ack_id.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
