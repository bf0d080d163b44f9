//! # Listeners
//!
//! A [`Listener`] couples a callback with the modifiers that control how and
//! when the dispatch engine invokes it: identity, once-flag, nice value and
//! listener context. The callback's shape decides whether it is async (takes a
//! [`Done`] handle) and whether it receives positional arguments or the whole
//! [`Event`].

use crate::events::Event;
use crate::system::Done;
use crate::types::{Nice, SYNC};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one listener invocation.
///
/// A synchronous listener returns it; an async listener hands it to
/// [`Done::finish`]. On an interruptible emitter, `Interrupt` stops the event's
/// completion from waiting on the remaining listeners.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Outcome {
    /// The listener is finished and has nothing to report.
    #[default]
    Continue,
    /// The listener asks to interrupt the event, carrying a payload.
    ///
    /// Any payload counts, including `null`.
    Interrupt(Value),
}

impl Outcome {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Outcome::Interrupt(_))
    }

    /// The interruption payload, if any.
    pub fn interruption(&self) -> Option<&Value> {
        match self {
            Outcome::Continue => None,
            Outcome::Interrupt(value) => Some(value),
        }
    }

    pub fn into_interruption(self) -> Option<Value> {
        match self {
            Outcome::Continue => None,
            Outcome::Interrupt(value) => Some(value),
        }
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Continue
    }
}

impl From<Option<Value>> for Outcome {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(value) => Outcome::Interrupt(value),
            None => Outcome::Continue,
        }
    }
}

/// Identity used to match listeners on removal.
///
/// Several listeners may share one id; removal takes all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListenerId {
    /// Handle of the wrapped callback, shared by clones of the same listener
    Callback(u64),
    /// Explicit id chosen at registration
    Named(String),
}

impl ListenerId {
    /// Allocates a fresh process-unique callback handle.
    pub fn next() -> Self {
        ListenerId::Callback(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerId::Callback(handle) => write!(f, "#{handle}"),
            ListenerId::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for ListenerId {
    fn from(name: &str) -> Self {
        ListenerId::Named(name.to_string())
    }
}

impl From<String> for ListenerId {
    fn from(name: String) -> Self {
        ListenerId::Named(name)
    }
}

impl From<&ListenerId> for ListenerId {
    fn from(id: &ListenerId) -> Self {
        id.clone()
    }
}

pub(crate) type ArgsFn = Rc<dyn Fn(&[Value]) -> Outcome>;
pub(crate) type ArgsAsyncFn = Rc<dyn Fn(&[Value], Done)>;
pub(crate) type EventFn = Rc<dyn Fn(&Event) -> Outcome>;
pub(crate) type EventAsyncFn = Rc<dyn Fn(&Event, Done)>;

/// The four callback shapes a listener can wrap.
#[derive(Clone)]
pub(crate) enum Callback {
    Args(ArgsFn),
    ArgsAsync(ArgsAsyncFn),
    Event(EventFn),
    EventAsync(EventAsyncFn),
}

/// A callback plus its dispatch modifiers.
///
/// ```rust
/// use ngevents::{Listener, Outcome, IMMEDIATE};
///
/// let listener = Listener::new(|args| println!("got {args:?}"))
///     .id("printer")
///     .nice(IMMEDIATE)
///     .context("ui");
/// assert!(!listener.is_async());
///
/// let gate = Listener::event_object(|event| {
///     if event.args().is_empty() {
///         Outcome::Interrupt("no payload".into())
///     } else {
///         Outcome::Continue
///     }
/// })
/// .once();
/// assert!(gate.is_event_object());
/// ```
#[derive(Clone)]
pub struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) callback: Callback,
    pub(crate) once: bool,
    pub(crate) nice: Nice,
    pub(crate) context: Option<String>,
}

impl Listener {
    fn wrap(callback: Callback) -> Self {
        Self {
            id: ListenerId::next(),
            callback,
            once: false,
            nice: SYNC,
            context: None,
        }
    }

    /// Synchronous listener receiving the positional arguments.
    ///
    /// The closure may return `()` or anything else convertible into an
    /// [`Outcome`].
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&[Value]) -> R + 'static,
        R: Into<Outcome>,
    {
        Self::wrap(Callback::Args(Rc::new(move |args| f(args).into())))
    }

    /// Async listener receiving the positional arguments and a [`Done`] handle.
    pub fn with_done<F>(f: F) -> Self
    where
        F: Fn(&[Value], Done) + 'static,
    {
        Self::wrap(Callback::ArgsAsync(Rc::new(f)))
    }

    /// Synchronous listener receiving the whole [`Event`].
    pub fn event_object<F, R>(f: F) -> Self
    where
        F: Fn(&Event) -> R + 'static,
        R: Into<Outcome>,
    {
        Self::wrap(Callback::Event(Rc::new(move |event| f(event).into())))
    }

    /// Async listener receiving the whole [`Event`] and a [`Done`] handle.
    pub fn event_object_with_done<F>(f: F) -> Self
    where
        F: Fn(&Event, Done) + 'static,
    {
        Self::wrap(Callback::EventAsync(Rc::new(f)))
    }

    /// Replaces the callback handle with an explicit id.
    pub fn id(mut self, id: impl Into<ListenerId>) -> Self {
        self.id = id.into();
        self
    }

    /// Removes the listener right before its first invocation.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn nice(mut self, nice: Nice) -> Self {
        self.nice = nice;
        self
    }

    /// Attaches the listener to a named listener context.
    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context = Some(name.into());
        self
    }

    pub fn listener_id(&self) -> &ListenerId {
        &self.id
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    pub fn is_async(&self) -> bool {
        matches!(self.callback, Callback::ArgsAsync(_) | Callback::EventAsync(_))
    }

    pub fn is_event_object(&self) -> bool {
        matches!(self.callback, Callback::Event(_) | Callback::EventAsync(_))
    }

    pub fn get_nice(&self) -> Nice {
        self.nice
    }

    pub fn context_name(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Descriptor of this listener as registered on `event`.
    pub fn info(&self, event: &str) -> ListenerInfo {
        ListenerInfo {
            event: event.to_string(),
            id: self.id.clone(),
            once: self.once,
            is_async: self.is_async(),
            event_object: self.is_event_object(),
            nice: self.nice,
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("once", &self.once)
            .field("async", &self.is_async())
            .field("event_object", &self.is_event_object())
            .field("nice", &self.nice)
            .field("context", &self.context)
            .finish()
    }
}

/// Serializable descriptor of a registered listener.
///
/// This is what `newListener` and `removeListener` listeners receive, as a
/// JSON array in their single argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerInfo {
    pub event: String,
    pub id: ListenerId,
    pub once: bool,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub event_object: bool,
    pub nice: Nice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ListenerInfo {
    /// Encodes descriptors as the single argument of a meta event.
    pub(crate) fn to_args(infos: &[ListenerInfo]) -> Vec<Value> {
        vec![serde_json::to_value(infos).unwrap_or(Value::Array(Vec::new()))]
    }

    /// Decodes the argument list of a `newListener` or `removeListener` event.
    ///
    /// Returns an empty list when the arguments are not descriptors.
    pub fn from_args(args: &[Value]) -> Vec<ListenerInfo> {
        args.first()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_conversions() {
        assert_eq!(Outcome::from(()), Outcome::Continue);
        assert_eq!(Outcome::from(None), Outcome::Continue);
        assert_eq!(Outcome::from(Some(json!(false))), Outcome::Interrupt(json!(false)));
        assert!(Outcome::Interrupt(Value::Null).is_interrupt());
        assert_eq!(Outcome::Interrupt(json!(3)).into_interruption(), Some(json!(3)));
    }

    #[test]
    fn test_clones_share_identity() {
        let listener = Listener::new(|_| {});
        let copy = listener.clone();
        assert_eq!(listener.listener_id(), copy.listener_id());
        assert_ne!(listener.listener_id(), Listener::new(|_| {}).listener_id());
    }

    #[test]
    fn test_info_round_trip_through_meta_args() {
        let listener = Listener::with_done(|_, done| done.done())
            .id("worker")
            .once()
            .nice(10)
            .context("jobs");
        let info = listener.info("task");
        assert!(info.is_async);
        assert!(!info.event_object);

        let args = ListenerInfo::to_args(&[info.clone()]);
        assert_eq!(args[0][0]["async"], json!(true));
        assert_eq!(args[0][0]["eventObject"], json!(false));
        assert_eq!(args[0][0]["id"], json!("worker"));
        assert_eq!(ListenerInfo::from_args(&args), vec![info]);
    }

    #[test]
    fn test_from_args_tolerates_garbage() {
        assert!(ListenerInfo::from_args(&[]).is_empty());
        assert!(ListenerInfo::from_args(&[json!("nope")]).is_empty());
    }
}
