/// Transports carrying proxy messages to the peer
use super::message::ProxyMessage;
use super::Proxy;
use crate::error::ProxyError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::trace;

/// Outbound side of a proxy's communication channel.
///
/// Inbound data is fed to [`Proxy::receive`] by whoever owns the channel.
pub trait Transport {
    fn send(&self, message: &ProxyMessage) -> Result<(), ProxyError>;
}

/// Encodes messages to JSON text and queues them on a tokio channel.
///
/// The receiving half is usually pumped into a socket by a writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &ProxyMessage) -> Result<(), ProxyError> {
        let text = message.encode()?;
        self.sender
            .send(text)
            .map_err(|_| ProxyError::Transport("outbound channel closed".to_string()))
    }
}

/// In-process outbox, pumped by hand.
///
/// Useful to wire two proxies together in tests or in a single process.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    outbox: RefCell<VecDeque<ProxyMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.outbox.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.borrow().is_empty()
    }

    /// Takes every queued message.
    pub fn drain(&self) -> Vec<ProxyMessage> {
        self.outbox.borrow_mut().drain(..).collect()
    }

    /// Delivers every queued message to `peer` through its wire decoder.
    ///
    /// Returns the number of messages delivered.
    pub fn deliver_to(&self, peer: &Proxy) -> usize {
        let messages = self.drain();
        for message in &messages {
            match message.encode() {
                Ok(text) => peer.receive(&text),
                Err(error) => trace!(%error, "skipping unencodable message"),
            }
        }
        messages.len()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &ProxyMessage) -> Result<(), ProxyError> {
        self.outbox.borrow_mut().push_back(message.clone());
        Ok(())
    }
}
