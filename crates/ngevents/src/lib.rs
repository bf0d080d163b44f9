//! # ngevents
//!
//! A single-threaded event emitter with scheduling, grouping, state caching
//! and a network proxy, for tools and services that need more control over
//! dispatch than a plain observer list gives.
//!
//! ## Core Features
//!
//! - **Nice values**: every emission, listener and listener context carries a
//!   scheduling priority, from fully synchronous to deferred by a delay
//! - **Async listeners**: listeners can finish later through a [`Done`]
//!   handle; completion callbacks fire once every listener is done
//! - **Interruption**: on an interruptible emitter a listener can stop an
//!   event, which resolves the completion callback early and emits `interrupt`
//! - **Listener contexts**: named groups of listeners that can be disabled,
//!   queued or serialized together
//! - **State events**: the last value is cached and replayed to late
//!   listeners; states in one group are mutually exclusive
//! - **Groups**: the same operation applied across a list of emitters
//! - **Proxy**: local emitters exposed as services and mirrored by a peer
//!   over any message transport
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use ngevents::*;
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let door = Emitter::new();
//!             door.set_interruptible(true);
//!
//!             door.on("open", Listener::new(|args| println!("opening for {}", args[0])))?;
//!             door.on(
//!                 "open",
//!                 Listener::with_done(|_args, done| {
//!                     // finishes on a later turn
//!                     tokio::task::spawn_local(async move {
//!                         tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!                         done.done();
//!                     });
//!                 })
//!                 .nice(IMMEDIATE),
//!             )?;
//!
//!             let outcome = door.wait_for_emit("open", vec![json!("alice")])?.await;
//!             println!("open finished: {outcome:?}");
//!             Ok::<(), Box<dyn std::error::Error>>(())
//!         })
//!         .await
//! }
//! ```
//!
//! ## Listener Contexts
//!
//! ```rust
//! use ngevents::*;
//! use std::rc::Rc;
//!
//! let emitter = Emitter::with_scheduler(Rc::new(ManualScheduler::new()));
//! emitter.on("job", Listener::new(|_| {}).context("workers")).unwrap();
//!
//! emitter.queue_listener_context("workers").unwrap();
//! emitter.emit("job", vec![]).unwrap();
//! assert_eq!(emitter.queued_jobs("workers"), 1);
//!
//! emitter.enable_listener_context("workers").unwrap();
//! assert_eq!(emitter.queued_jobs("workers"), 0);
//! ```

// tests
mod test_integration;

// Core modules
pub mod config;
pub mod error;
pub mod events;
pub mod group;
pub mod listener;
pub mod proxy;
pub mod scheduler;
pub mod system;
pub mod types;

pub use config::{ContextConfig, EmitterConfig};
pub use error::{EmitterError, ProxyError};
pub use events::{CompletionFn, Emission, Event};
pub use listener::{Listener, ListenerId, ListenerInfo, Outcome};
pub use proxy::{
    ChannelTransport, LocalService, MemoryTransport, Proxy, ProxyMessage, RemoteService,
    ServiceCapabilities, Transport,
};
pub use scheduler::{Job, ManualScheduler, Scheduler, TokioScheduler};
pub use system::{ContextOptions, Done, Emitter, WeakEmitter};
pub use types::*;

/// Number of listeners `emitter` has for `name`.
pub fn listener_count(emitter: &Emitter, name: &str) -> usize {
    emitter.listener_count(name)
}
