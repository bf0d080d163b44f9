//! # Emitter Groups
//!
//! Operations applied identically across a list of emitters. Listeners
//! registered through a group receive the emitting [`Emitter`] as their first
//! parameter, so one callback can serve the whole group and still tell the
//! sources apart.
//!
//! ```rust
//! use ngevents::group::{group_emit_with, group_on, GroupListener};
//! use ngevents::{Emitter, ManualScheduler, Outcome};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let clock = Rc::new(ManualScheduler::new());
//! let sensors = vec![
//!     Emitter::with_scheduler(clock.clone()),
//!     Emitter::with_scheduler(clock.clone()),
//! ];
//!
//! group_on(&sensors, "poll", &GroupListener::new(|_sensor, args| {
//!     println!("polled with {args:?}");
//! }))
//! .unwrap();
//!
//! group_emit_with(&sensors, "poll", vec![json!(1)], None, |outcome| {
//!     assert_eq!(outcome, Outcome::Continue);
//! })
//! .unwrap();
//! ```

use crate::error::EmitterError;
use crate::events::Emission;
use crate::listener::{Listener, ListenerId, Outcome};
use crate::system::{Done, Emitter, WeakEmitter};
use crate::types::{Nice, SYNC};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

type Gate = Rc<dyn Fn() -> bool>;

#[derive(Clone)]
enum GroupCallback {
    Sync(Rc<dyn Fn(&Emitter, &[Value]) -> Outcome>),
    Async(Rc<dyn Fn(&Emitter, &[Value], Done)>),
}

/// A listener registered on several emitters at once.
///
/// Every registration shares the same id, so [`group_off`] removes them all.
#[derive(Clone)]
pub struct GroupListener {
    id: ListenerId,
    callback: GroupCallback,
    nice: Nice,
    context: Option<String>,
}

impl GroupListener {
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&Emitter, &[Value]) -> R + 'static,
        R: Into<Outcome>,
    {
        Self::wrap(GroupCallback::Sync(Rc::new(move |emitter, args| f(emitter, args).into())))
    }

    pub fn with_done<F>(f: F) -> Self
    where
        F: Fn(&Emitter, &[Value], Done) + 'static,
    {
        Self::wrap(GroupCallback::Async(Rc::new(f)))
    }

    fn wrap(callback: GroupCallback) -> Self {
        Self {
            id: ListenerId::next(),
            callback,
            nice: SYNC,
            context: None,
        }
    }

    pub fn id(mut self, id: impl Into<ListenerId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn nice(mut self, nice: Nice) -> Self {
        self.nice = nice;
        self
    }

    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context = Some(name.into());
        self
    }

    pub fn listener_id(&self) -> &ListenerId {
        &self.id
    }

    /// Builds the per-emitter listener. A closed `gate` turns the invocation
    /// into a no-op; async listeners are still marked done.
    fn bind(&self, emitter: &Emitter, gate: Option<Gate>) -> Listener {
        let source = emitter.downgrade();
        let listener = match self.callback.clone() {
            GroupCallback::Sync(f) => Listener::new(move |args: &[Value]| {
                match (open(&gate), source.upgrade()) {
                    (true, Some(emitter)) => f(&emitter, args),
                    _ => Outcome::Continue,
                }
            }),
            GroupCallback::Async(f) => Listener::with_done(move |args: &[Value], done: Done| {
                match (open(&gate), source.upgrade()) {
                    (true, Some(emitter)) => f(&emitter, args, done),
                    _ => done.done(),
                }
            }),
        };

        let listener = listener.id(self.id.clone()).nice(self.nice);
        match &self.context {
            Some(context) => listener.context(context.clone()),
            None => listener,
        }
    }
}

fn open(gate: &Option<Gate>) -> bool {
    gate.as_ref().map_or(true, |gate| gate())
}

fn downgrade_all(emitters: &[Emitter]) -> Vec<WeakEmitter> {
    emitters.iter().map(Emitter::downgrade).collect()
}

/// Registers `listener` on every emitter, see [`Emitter::on`].
pub fn group_on(emitters: &[Emitter], name: &str, listener: &GroupListener) -> Result<ListenerId, EmitterError> {
    for emitter in emitters {
        emitter.on(name, listener.bind(emitter, None))?;
    }
    Ok(listener.id.clone())
}

/// Alias of [`group_on`].
pub fn group_add_listener(emitters: &[Emitter], name: &str, listener: &GroupListener) -> Result<ListenerId, EmitterError> {
    group_on(emitters, name, listener)
}

/// Registers `listener` once on every emitter: each emitter triggers it at
/// most once.
pub fn group_once(emitters: &[Emitter], name: &str, listener: &GroupListener) -> Result<ListenerId, EmitterError> {
    for emitter in emitters {
        emitter.once(name, listener.bind(emitter, None))?;
    }
    Ok(listener.id.clone())
}

/// Fires at most once for the whole group, on the first emitter to emit.
///
/// The registrations on the other emitters are removed at that point.
pub fn group_once_first(emitters: &[Emitter], name: &str, listener: &GroupListener) -> Result<ListenerId, EmitterError> {
    let triggered = Rc::new(Cell::new(false));
    let peers = downgrade_all(emitters);
    let (event, id) = (name.to_string(), listener.id.clone());

    let gate: Gate = Rc::new(move || {
        if triggered.replace(true) {
            return false;
        }
        trace!(event = %event, "group once-first triggered");
        for peer in peers.iter().filter_map(WeakEmitter::upgrade) {
            let _ = peer.off(&event, &id);
        }
        true
    });

    for emitter in emitters {
        emitter.once(name, listener.bind(emitter, Some(gate.clone())))?;
    }
    Ok(listener.id.clone())
}

/// Fires once, when the last emitter of the group that had not emitted yet
/// emits. A count-down latch over the group.
pub fn group_once_last(emitters: &[Emitter], name: &str, listener: &GroupListener) -> Result<ListenerId, EmitterError> {
    let remaining = Rc::new(Cell::new(emitters.len()));

    let gate: Gate = Rc::new(move || {
        let left = remaining.get().saturating_sub(1);
        remaining.set(left);
        left == 0
    });

    for emitter in emitters {
        emitter.once(name, listener.bind(emitter, Some(gate.clone())))?;
    }
    Ok(listener.id.clone())
}

/// Removes the listeners matching `id` from every emitter.
pub fn group_off(emitters: &[Emitter], name: &str, id: impl Into<ListenerId>) -> Result<(), EmitterError> {
    let id = id.into();
    for emitter in emitters {
        emitter.off(name, &id)?;
    }
    Ok(())
}

/// Alias of [`group_off`].
pub fn group_remove_listener(emitters: &[Emitter], name: &str, id: impl Into<ListenerId>) -> Result<(), EmitterError> {
    group_off(emitters, name, id)
}

pub fn group_remove_all_listeners(emitters: &[Emitter], name: Option<&str>) -> Result<(), EmitterError> {
    for emitter in emitters {
        emitter.remove_all_listeners(name)?;
    }
    Ok(())
}

pub fn group_define_states<S: AsRef<str>>(emitters: &[Emitter], names: &[S]) -> Result<(), EmitterError> {
    for emitter in emitters {
        emitter.define_states(names)?;
    }
    Ok(())
}

/// Emits on every emitter of the group.
pub fn group_emit(emitters: &[Emitter], name: &str, args: Vec<Value>) -> Result<(), EmitterError> {
    for emitter in emitters {
        emitter.emit(name, args.clone())?;
    }
    Ok(())
}

/// Emits on every emitter of the group and reports once for all of them.
///
/// `callback` fires exactly once: with the interruption as soon as any
/// emitter's event is interrupted, otherwise when every emission has
/// completed. An empty group completes immediately, and an emission
/// suppressed by an unchanged state counts as completed.
pub fn group_emit_with<F>(
    emitters: &[Emitter],
    name: &str,
    args: Vec<Value>,
    nice: Option<Nice>,
    callback: F,
) -> Result<(), EmitterError>
where
    F: FnOnce(Outcome) + 'static,
{
    let callback: Box<dyn FnOnce(Outcome)> = Box::new(callback);
    let pending = Rc::new(RefCell::new(Some(callback)));
    let remaining = Rc::new(Cell::new(emitters.len()));

    let settle: Rc<dyn Fn(Outcome)> = Rc::new(move |outcome: Outcome| {
        let fire = match outcome {
            Outcome::Interrupt(_) => true,
            Outcome::Continue => {
                let left = remaining.get().saturating_sub(1);
                remaining.set(left);
                left == 0
            }
        };
        if !fire {
            return;
        }
        let callback = pending.borrow_mut().take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    });

    if emitters.is_empty() {
        settle(Outcome::Continue);
        return Ok(());
    }

    for emitter in emitters {
        let on_complete = settle.clone();
        let mut emission = Emission::new(name)
            .args(args.clone())
            .on_complete(move |outcome, _| on_complete(outcome));
        if let Some(nice) = nice {
            emission = emission.nice(nice);
        }
        if emitter.dispatch(emission)?.is_none() {
            settle(Outcome::Continue);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualScheduler, Scheduler};
    use serde_json::json;
    use std::time::Duration;

    fn group(n: usize) -> (Vec<Emitter>, Rc<ManualScheduler>) {
        let clock = Rc::new(ManualScheduler::new());
        let emitters = (0..n).map(|_| Emitter::with_scheduler(clock.clone())).collect();
        (emitters, clock)
    }

    fn index_of(emitters: &[Emitter], emitter: &Emitter) -> usize {
        emitters
            .iter()
            .position(|candidate| candidate.same_storage(emitter))
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn test_group_on_binds_the_source_emitter() {
        let (emitters, _) = group(3);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sink, all) = (seen.clone(), emitters.clone());
        group_on(
            &emitters,
            "ping",
            &GroupListener::new(move |emitter, args| sink.borrow_mut().push((index_of(&all, emitter), args.to_vec()))),
        )
        .unwrap();

        emitters[2].emit("ping", vec![json!("x")]).unwrap();
        emitters[0].emit("ping", vec![]).unwrap();

        assert_eq!(*seen.borrow(), vec![(2, vec![json!("x")]), (0, vec![])]);
    }

    #[test]
    fn test_group_off_removes_everywhere() {
        let (emitters, _) = group(2);
        let id = group_on(&emitters, "a", &GroupListener::new(|_, _| {}).id("shared")).unwrap();
        assert_eq!(id, ListenerId::from("shared"));

        group_off(&emitters, "a", "shared").unwrap();
        assert!(emitters.iter().all(|emitter| emitter.listener_count("a") == 0));

        group_on(&emitters, "b", &GroupListener::new(|_, _| {})).unwrap();
        group_remove_all_listeners(&emitters, Some("b")).unwrap();
        assert!(emitters.iter().all(|emitter| emitter.listener_count("b") == 0));
    }

    #[test]
    fn test_group_once_fires_once_per_emitter() {
        let (emitters, _) = group(2);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        group_once(&emitters, "e", &GroupListener::new(move |_, _| h.set(h.get() + 1))).unwrap();

        for _ in 0..2 {
            for emitter in &emitters {
                emitter.emit("e", vec![]).unwrap();
            }
        }
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_group_once_first_fires_on_first_emitter_only() {
        let (emitters, _) = group(3);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sink, all) = (seen.clone(), emitters.clone());
        group_once_first(
            &emitters,
            "ready",
            &GroupListener::new(move |emitter, _| sink.borrow_mut().push(index_of(&all, emitter))),
        )
        .unwrap();

        emitters[1].emit("ready", vec![]).unwrap();
        emitters[0].emit("ready", vec![]).unwrap();
        emitters[2].emit("ready", vec![]).unwrap();

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(emitters.iter().all(|emitter| emitter.listener_count("ready") == 0));
    }

    #[test]
    fn test_group_once_last_waits_for_every_emitter() {
        let (emitters, _) = group(3);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sink, all) = (seen.clone(), emitters.clone());
        group_once_last(
            &emitters,
            "done",
            &GroupListener::new(move |emitter, _| sink.borrow_mut().push(index_of(&all, emitter))),
        )
        .unwrap();

        emitters[2].emit("done", vec![]).unwrap();
        emitters[2].emit("done", vec![]).unwrap();
        emitters[0].emit("done", vec![]).unwrap();
        assert!(seen.borrow().is_empty());

        emitters[1].emit("done", vec![]).unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn test_group_emit_reports_first_interruption() {
        let (emitters, clock) = group(3);
        for emitter in &emitters {
            emitter.set_interruptible(true);
        }
        emitters[1]
            .on("ask", Listener::new(|_| Outcome::Interrupt(json!("veto"))))
            .unwrap();
        let slow = clock.clone();
        emitters[2]
            .on(
                "ask",
                Listener::with_done(move |_, done| slow.delay(Duration::from_millis(100), Box::new(move || done.done()))),
            )
            .unwrap();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        group_emit_with(&emitters, "ask", vec![], None, move |outcome| sink.borrow_mut().push(outcome)).unwrap();
        clock.run_all();

        assert_eq!(*calls.borrow(), vec![Outcome::Interrupt(json!("veto"))]);
    }

    #[test]
    fn test_group_emit_with_nice_and_empty_group() {
        let (emitters, clock) = group(2);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        group_on(&emitters, "tick", &GroupListener::new(move |_, _| h.set(h.get() + 1))).unwrap();

        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        group_emit_with(&emitters, "tick", vec![], Some(25), move |_| f.set(f.get() + 1)).unwrap();
        assert_eq!(hits.get(), 0);
        clock.advance(Duration::from_millis(25));
        assert_eq!(hits.get(), 2);
        assert_eq!(fired.get(), 1);

        let f = fired.clone();
        group_emit_with(&[], "tick", vec![], None, move |_| f.set(f.get() + 1)).unwrap();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_group_define_states_and_plain_emit() {
        let (emitters, _) = group(2);
        group_define_states(&emitters, &["on", "off"]).unwrap();
        group_emit(&emitters, "on", vec![json!(1)]).unwrap();
        assert!(emitters.iter().all(|emitter| emitter.has_state("on")));

        // unchanged states still count as completed
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        group_emit_with(&emitters, "on", vec![json!(1)], None, move |_| f.set(true)).unwrap();
        assert!(fired.get());
    }
}
