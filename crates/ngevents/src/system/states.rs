/// State events: cached last emission, grouped in mutually exclusive sets
use super::core::Emitter;
use crate::error::EmitterError;
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

impl Emitter {
    /// Declares `names` as one group of mutually exclusive state events.
    ///
    /// Emitting a member caches its arguments and clears every other member.
    /// Emitting the cached member again with equal arguments is a no-op, and
    /// listeners added later receive the cached value right away.
    ///
    /// A name already belonging to another group moves to this one; the
    /// state it currently holds is cleared.
    ///
    /// ```rust
    /// use ngevents::{Emitter, ManualScheduler};
    /// use serde_json::json;
    /// use std::rc::Rc;
    ///
    /// let emitter = Emitter::with_scheduler(Rc::new(ManualScheduler::new()));
    /// emitter.define_states(&["ready", "closed"]).unwrap();
    /// emitter.emit("ready", vec![json!(true)]).unwrap();
    /// assert!(emitter.has_state("ready"));
    /// emitter.emit("closed", vec![]).unwrap();
    /// assert_eq!(emitter.get_all_states(), vec!["closed".to_string()]);
    /// ```
    pub fn define_states<S: AsRef<str>>(&self, names: &[S]) -> Result<(), EmitterError> {
        let members: Vec<String> = names.iter().map(|name| name.as_ref().to_string()).collect();
        if let Some(invalid) = members.iter().find(|name| name.is_empty()) {
            return Err(EmitterError::InvalidEventName(invalid.clone()));
        }

        let group: Rc<[String]> = members.into();
        let core = self.core();
        let mut state = core.state.borrow_mut();
        for name in group.iter() {
            state.states.insert(name.clone(), None);
            state.state_groups.insert(name.clone(), group.clone());
        }
        debug!(states = ?group, "state group defined");
        Ok(())
    }

    /// True when `name` is a state event currently holding a value.
    pub fn has_state(&self, name: &str) -> bool {
        self.core()
            .state
            .borrow()
            .states
            .get(name)
            .is_some_and(Option::is_some)
    }

    /// Names of every state event holding a value, sorted.
    pub fn get_all_states(&self) -> Vec<String> {
        self.core()
            .state
            .borrow()
            .states
            .iter()
            .filter(|(_, cached)| cached.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Cached arguments of the state event `name`, if it holds a value.
    pub fn state(&self, name: &str) -> Option<Vec<Value>> {
        self.core()
            .state
            .borrow()
            .states
            .get(name)?
            .as_ref()
            .map(|event| event.args().to_vec())
    }
}
