/// Emitter implementation - broken down into registry, dispatch, contexts and states
mod contexts;
mod core;
mod emitters;
mod handlers;
mod states;
mod waiters;
mod tests;

pub use self::core::{Emitter, WeakEmitter};
pub use contexts::ContextOptions;
pub use emitters::Done;

pub(crate) use self::core::Core;
