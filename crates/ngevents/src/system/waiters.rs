/// Future-based counterparts of `once` and `emit`
use super::core::Emitter;
use crate::error::EmitterError;
use crate::listener::{Listener, Outcome};
use futures::channel::oneshot;
use serde_json::Value;
use std::cell::Cell;
use std::future::Future;

impl Emitter {
    /// Resolves with the first argument of the next emission of `name`.
    ///
    /// The once-listener is registered by this call, not when the future is
    /// first polled. Resolves to `None` when the emission had no argument or
    /// the listener was removed before it fired.
    pub fn wait_for(&self, name: &str) -> Result<impl Future<Output = Option<Value>>, EmitterError> {
        let receiver = self.wait_for_all(name)?;
        Ok(async move { receiver.await.into_iter().next() })
    }

    /// Resolves with every argument of the next emission of `name`.
    pub fn wait_for_all(&self, name: &str) -> Result<impl Future<Output = Vec<Value>>, EmitterError> {
        let (sender, receiver) = oneshot::channel();
        let sender = Cell::new(Some(sender));
        self.once(
            name,
            Listener::new(move |args: &[Value]| {
                if let Some(sender) = sender.take() {
                    let _ = sender.send(args.to_vec());
                }
            }),
        )?;
        Ok(async move { receiver.await.unwrap_or_default() })
    }

    /// Emits and resolves with the emission's outcome once it completes.
    ///
    /// A suppressed state emission resolves to [`Outcome::Continue`].
    pub fn wait_for_emit(&self, name: &str, args: Vec<Value>) -> Result<impl Future<Output = Outcome>, EmitterError> {
        let (sender, receiver) = oneshot::channel();
        self.emit_with_callback(name, args, move |outcome, _| {
            let _ = sender.send(outcome);
        })?;
        Ok(async move { receiver.await.unwrap_or_default() })
    }
}
