/// Error types for the emitter and the proxy layer
use serde_json::Value;
use thiserror::Error;

/// Faults raised synchronously by the emitter API.
///
/// Invalid local usage always fails loudly; listener panics are not caught
/// and unwind through the emitting call instead.
#[derive(Debug, Error)]
pub enum EmitterError {
    /// An event name was empty
    #[error("invalid event name {0:?}: expected a non-empty string")]
    InvalidEventName(String),
    /// A listener context name was empty
    #[error("invalid context name {0:?}: expected a non-empty string")]
    InvalidContextName(String),
    /// An `error` event was emitted with no listener; carries the first argument, even `null`
    #[error("unhandled 'error' event: {0}")]
    UnhandledError(Value),
    /// An `error` event was emitted with no listener and no argument
    #[error("uncaught, unspecified 'error' event")]
    UnspecifiedError,
}

/// Faults raised by the local side of the proxy API.
///
/// Remote input never produces one of these: malformed or unauthorized
/// messages are dropped.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The service was destroyed, either directly or with its proxy
    #[error("service '{0}' has been destroyed")]
    ServiceDestroyed(String),
    /// The transport refused the message
    #[error("transport error: {0}")]
    Transport(String),
    /// A message could not be encoded
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The underlying emitter rejected the call
    #[error(transparent)]
    Emitter(#[from] EmitterError),
}
