/// Wire envelope exchanged between proxies
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// Type tag carried by every proxy message.
pub const MESSAGE_TYPE: &str = "NextGenEvents/message";

/// What the receiving side should do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// A local service forwards one of its events (to a remote service)
    Event,
    /// A local service acknowledges a remote emit, with its interruption
    AckEmit,
    /// A remote service emits on the peer's local service
    Emit,
    /// A remote service subscribes to an event of the peer's local service
    Listen,
    /// A remote service drops its subscription
    Ignore,
    /// A remote service acknowledges a forwarded event
    AckEvent,
}

/// The `ack` field: a correlation id, or a plain request flag on `listen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ack {
    Id(u64),
    Requested(bool),
}

impl Ack {
    pub fn id(&self) -> Option<u64> {
        match self {
            Ack::Id(id) => Some(*id),
            Ack::Requested(_) => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        match self {
            Ack::Id(_) => true,
            Ack::Requested(requested) => *requested,
        }
    }
}

/// One proxy message.
///
/// ```rust
/// use ngevents::proxy::{Method, ProxyMessage};
/// use serde_json::json;
///
/// let message = ProxyMessage::new("clock", Method::Event, "tick").with_args(vec![json!(1)]);
/// let text = message.encode().unwrap();
/// assert!(text.contains("\"type\":\"NextGenEvents/message\""));
/// assert_eq!(ProxyMessage::decode(&text), Some(message));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub service: String,
    pub method: Method,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<Ack>,
    /// Present on `ackEmit` when the emission was interrupted, even with `null`
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; absence stays `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ProxyMessage {
    pub fn new(service: impl Into<String>, method: Method, event: impl Into<String>) -> Self {
        Self {
            kind: MESSAGE_TYPE.to_string(),
            service: service.into(),
            method,
            event: event.into(),
            args: None,
            ack: None,
            interruption: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_ack(mut self, ack: Ack) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn with_interruption(mut self, interruption: Option<Value>) -> Self {
        self.interruption = interruption;
        self
    }

    /// Arguments, empty when absent.
    pub fn args(&self) -> Vec<Value> {
        self.args.clone().unwrap_or_default()
    }

    pub fn ack_id(&self) -> Option<u64> {
        self.ack.as_ref().and_then(Ack::id)
    }

    pub fn ack_requested(&self) -> bool {
        self.ack.as_ref().is_some_and(Ack::is_requested)
    }

    /// True when the required fields carry usable values.
    pub fn is_valid(&self) -> bool {
        self.kind == MESSAGE_TYPE && !self.service.is_empty() && !self.event.is_empty()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses and validates raw text; anything unusable yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<ProxyMessage>(raw) {
            Ok(message) if message.is_valid() => Some(message),
            Ok(message) => {
                debug!(service = %message.service, event = %message.event, "dropping invalid proxy message");
                None
            }
            Err(error) => {
                debug!(%error, "dropping malformed proxy message");
                None
            }
        }
    }
}
