//! # Emitter Configuration
//!
//! Serializable description of an emitter's settings, so embedders can keep
//! nice values, listener contexts and state groups in a configuration file.
//!
//! ```toml
//! nice = 10
//! interruptible = true
//! max_listeners = 32
//! states = [["connected", "disconnected"]]
//!
//! [contexts.network]
//! serial = true
//! status = "queued"
//! ```

use crate::error::EmitterError;
use crate::scheduler::Scheduler;
use crate::system::{ContextOptions, Emitter};
use crate::types::{ContextStatus, Nice, SYNC};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Settings applied to an emitter by [`Emitter::apply_config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Default nice value of emissions; unset means synchronous
    pub nice: Option<Nice>,
    pub interruptible: bool,
    /// Listener count above which a warning is logged; 0 disables it
    pub max_listeners: usize,
    /// Groups of mutually exclusive state events
    pub states: Vec<Vec<String>>,
    pub contexts: BTreeMap<String, ContextConfig>,
}

/// Settings of one listener context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub nice: Option<Nice>,
    pub status: ContextStatus,
    pub serial: bool,
}

impl Emitter {
    /// Creates an emitter on `scheduler` and applies `config` to it.
    pub fn from_config(config: &EmitterConfig, scheduler: Rc<dyn Scheduler>) -> Result<Self, EmitterError> {
        let emitter = Self::with_scheduler(scheduler);
        emitter.apply_config(config)?;
        Ok(emitter)
    }

    /// Applies settings, contexts and state groups.
    ///
    /// Contexts are created or updated; existing listeners, contexts and
    /// states not named in `config` are left alone.
    pub fn apply_config(&self, config: &EmitterConfig) -> Result<(), EmitterError> {
        self.set_nice(config.nice.unwrap_or(SYNC));
        self.set_interruptible(config.interruptible);
        self.set_max_listeners(config.max_listeners);

        for (name, context) in &config.contexts {
            self.add_listener_context(
                name,
                ContextOptions {
                    nice: Some(context.nice.unwrap_or(SYNC)),
                    status: Some(context.status),
                    serial: Some(context.serial),
                },
            )?;
        }

        for group in &config.states {
            self.define_states(group.as_slice())?;
        }
        Ok(())
    }
}
