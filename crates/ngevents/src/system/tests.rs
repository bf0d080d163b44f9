//! Tests for the dispatch engine, contexts and state events

#[cfg(test)]
mod tests {
    use crate::scheduler::{ManualScheduler, Scheduler};
    use crate::{
        ContextOptions, ContextStatus, Emission, Emitter, EmitterError, Listener, ListenerId, ListenerInfo, Outcome,
        IMMEDIATE, SYNC,
    };
    use serde_json::{json, Value};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    fn setup() -> (Emitter, Rc<ManualScheduler>) {
        let clock = Rc::new(ManualScheduler::new());
        (Emitter::with_scheduler(clock.clone()), clock)
    }

    fn counting(hits: &Rc<Cell<usize>>) -> Listener {
        let hits = hits.clone();
        Listener::new(move |_| hits.set(hits.get() + 1))
    }

    fn recording(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> Listener {
        let log = log.clone();
        Listener::new(move |_| log.borrow_mut().push(tag.to_string()))
    }

    /// Async listener finishing `ms` virtual milliseconds after it starts.
    fn delayed_worker(clock: &Rc<ManualScheduler>, log: &Rc<RefCell<Vec<String>>>, tag: &'static str, ms: u64) -> Listener {
        let clock = clock.clone();
        let log = log.clone();
        Listener::with_done(move |_, done| {
            log.borrow_mut().push(format!("start {tag}"));
            let log = log.clone();
            clock.delay(
                Duration::from_millis(ms),
                Box::new(move || {
                    log.borrow_mut().push(format!("end {tag}"));
                    done.done();
                }),
            );
        })
    }

    fn completion_probe() -> (Rc<RefCell<Vec<Outcome>>>, impl FnOnce(Outcome, &crate::Event) + 'static) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |outcome: Outcome, _: &crate::Event| sink.borrow_mut().push(outcome))
    }

    #[test]
    fn test_emit_without_listeners_completes_immediately() {
        let (emitter, clock) = setup();
        let (calls, probe) = completion_probe();

        let event = emitter.emit_with_callback("nothing", vec![json!(1)], probe).unwrap();

        assert!(event.is_some());
        assert_eq!(*calls.borrow(), vec![Outcome::Continue]);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_unhandled_error_event() {
        let (emitter, _) = setup();

        match emitter.emit("error", vec![json!("boom")]) {
            Err(EmitterError::UnhandledError(value)) => assert_eq!(value, json!("boom")),
            other => panic!("expected unhandled error, got {other:?}"),
        }
        assert!(matches!(emitter.emit("error", vec![]), Err(EmitterError::UnspecifiedError)));
        assert!(matches!(
            emitter.emit("error", vec![Value::Null]),
            Err(EmitterError::UnhandledError(Value::Null))
        ));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        emitter
            .on("error", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args[0].clone())))
            .unwrap();
        assert!(emitter.emit("error", vec![json!("handled")]).is_ok());
        assert_eq!(*seen.borrow(), vec![json!("handled")]);
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let (emitter, _) = setup();
        assert!(matches!(emitter.emit("", vec![]), Err(EmitterError::InvalidEventName(_))));
        assert!(matches!(
            emitter.on("", Listener::new(|_| {})),
            Err(EmitterError::InvalidEventName(_))
        ));
        assert!(matches!(
            emitter.on("x", Listener::new(|_| {}).context("")),
            Err(EmitterError::InvalidContextName(_))
        ));
        assert!(matches!(
            emitter.disable_listener_context(""),
            Err(EmitterError::InvalidContextName(_))
        ));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let (emitter, _) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            emitter.on("go", recording(&log, tag)).unwrap();
        }

        emitter.emit("go", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.once("ping", counting(&hits)).unwrap();

        emitter.emit("ping", vec![]).unwrap();
        emitter.emit("ping", vec![]).unwrap();

        assert_eq!(hits.get(), 1);
        assert_eq!(emitter.listener_count("ping"), 0);
    }

    #[test]
    fn test_once_listener_survives_reentrant_emit() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        let depth = Rc::new(Cell::new(0));

        let weak = emitter.downgrade();
        let d = depth.clone();
        emitter
            .on(
                "loop",
                Listener::new(move |_| {
                    if d.get() == 0 {
                        d.set(1);
                        if let Some(emitter) = weak.upgrade() {
                            emitter.emit("loop", vec![]).unwrap();
                        }
                    }
                }),
            )
            .unwrap();
        emitter.once("loop", counting(&hits)).unwrap();

        emitter.emit("loop", vec![]).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_completion_counts_once_listener_consumed_by_reentrant_emit() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        let fired = Rc::new(RefCell::new(Vec::new()));
        let reentered = Rc::new(Cell::new(false));

        let weak = emitter.downgrade();
        let flag = reentered.clone();
        emitter
            .on(
                "loop",
                Listener::new(move |_| {
                    if !flag.replace(true) {
                        if let Some(emitter) = weak.upgrade() {
                            emitter.emit("loop", vec![]).unwrap();
                        }
                    }
                }),
            )
            .unwrap();
        emitter.once("loop", counting(&hits)).unwrap();

        let sink = fired.clone();
        emitter
            .emit_with_callback("loop", vec![], move |outcome, _| sink.borrow_mut().push(outcome))
            .unwrap();

        assert_eq!(hits.get(), 1);
        assert_eq!(*fired.borrow(), vec![Outcome::Continue]);
    }

    #[test]
    fn test_off_removes_every_listener_sharing_an_id() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        let removed = Rc::new(RefCell::new(Vec::new()));
        let sink = removed.clone();
        emitter
            .on(
                "removeListener",
                Listener::new(move |args: &[Value]| sink.borrow_mut().push(ListenerInfo::from_args(args))),
            )
            .unwrap();

        emitter.on("tick", counting(&hits).id("shared")).unwrap();
        emitter.on("tick", counting(&hits).id("shared")).unwrap();
        let kept = emitter.on("tick", counting(&hits)).unwrap();

        let infos = emitter.off("tick", "shared").unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(emitter.listener_count("tick"), 1);
        assert_eq!(removed.borrow().len(), 1);
        assert_eq!(removed.borrow()[0].len(), 2);

        emitter.emit("tick", vec![]).unwrap();
        assert_eq!(hits.get(), 1);

        emitter.off("tick", kept).unwrap();
        assert_eq!(emitter.listener_count("tick"), 0);
        assert!(emitter.off("tick", "missing").unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_identity_for_removal() {
        let (emitter, _) = setup();
        let listener = Listener::new(|_| {});
        emitter.on("a", listener.clone()).unwrap();
        emitter.on("a", listener.clone()).unwrap();

        assert_eq!(emitter.off("a", listener.listener_id()).unwrap().len(), 2);
    }

    #[test]
    fn test_once_removals_are_batched_after_dispatch() {
        let (emitter, _) = setup();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        emitter
            .on(
                "removeListener",
                Listener::new(move |args: &[Value]| sink.borrow_mut().push(ListenerInfo::from_args(args).len())),
            )
            .unwrap();
        emitter.once("x", Listener::new(|_| {})).unwrap();
        emitter.once("x", Listener::new(|_| {})).unwrap();

        emitter.emit("x", vec![]).unwrap();
        assert_eq!(*batches.borrow(), vec![2]);
    }

    #[test]
    fn test_new_listener_notifies_earlier_listeners_only() {
        let (emitter, _) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let counts = Rc::new(RefCell::new(Vec::new()));

        let weak = emitter.downgrade();
        let (sink, count_sink) = (seen.clone(), counts.clone());
        emitter
            .on(
                "newListener",
                Listener::new(move |args: &[Value]| {
                    for info in ListenerInfo::from_args(args) {
                        if let Some(emitter) = weak.upgrade() {
                            count_sink.borrow_mut().push(emitter.listener_count(&info.event));
                        }
                        sink.borrow_mut().push(info);
                    }
                }),
            )
            .unwrap();
        assert!(seen.borrow().is_empty());

        emitter
            .on("data", Listener::with_done(|_, done| done.done()).id("reader").context("io"))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, "data");
        assert_eq!(seen[0].id, ListenerId::from("reader"));
        assert!(seen[0].is_async);
        assert_eq!(seen[0].context.as_deref(), Some("io"));
        assert_eq!(*counts.borrow(), vec![1]);
        assert!(emitter.has_listener_context("io"));
    }

    #[test]
    fn test_remove_all_listeners() {
        let (emitter, _) = setup();
        let notified = Rc::new(Cell::new(0));
        emitter.on("removeListener", counting(&notified)).unwrap();
        emitter.on("a", Listener::new(|_| {})).unwrap();
        emitter.on("a", Listener::new(|_| {})).unwrap();
        emitter.on("b", Listener::new(|_| {})).unwrap();

        emitter.remove_all_listeners(Some("a")).unwrap();
        assert_eq!(notified.get(), 1);
        assert_eq!(emitter.listener_count("a"), 0);
        assert_eq!(emitter.listener_count("b"), 1);

        emitter.remove_all_listeners(None).unwrap();
        assert_eq!(notified.get(), 1);
        assert!(emitter.event_names().is_empty());
    }

    #[test]
    fn test_listeners_returns_copies() {
        let (emitter, _) = setup();
        emitter.on("a", Listener::new(|_| {}).id("first").nice(5)).unwrap();

        let copies = emitter.listeners("a");
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].get_nice(), 5);

        drop(copies);
        assert_eq!(emitter.listener_count("a"), 1);
        assert_eq!(crate::listener_count(&emitter, "a"), 1);
    }

    #[test]
    fn test_event_object_listener_sees_the_record() {
        let (emitter, _) = setup();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        emitter
            .on(
                "move",
                Listener::event_object(move |event: &crate::Event| {
                    *sink.borrow_mut() = Some((event.name().to_string(), event.args().to_vec(), event.listener_count()));
                }),
            )
            .unwrap();

        let event = emitter.emit("move", vec![json!(1), json!(2)]).unwrap().unwrap();
        assert_eq!(
            *seen.borrow(),
            Some(("move".to_string(), vec![json!(1), json!(2)], 1))
        );
        assert_eq!(event.listeners_done(), 1);
        assert!(event.emitter().is_some_and(|handle| handle.same_storage(&emitter)));
    }

    #[test]
    fn test_positive_nice_defers_by_delay() {
        let (emitter, clock) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.on("later", counting(&hits).nice(30)).unwrap();

        emitter.emit("later", vec![]).unwrap();
        assert_eq!(hits.get(), 0);
        clock.advance(Duration::from_millis(29));
        assert_eq!(hits.get(), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_effective_nice_is_the_least_eager() {
        let (emitter, clock) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.on("e", counting(&hits).nice(SYNC)).unwrap();

        emitter.emit_nice(10, "e", vec![]).unwrap();
        assert_eq!(hits.get(), 0);
        clock.advance(Duration::from_millis(10));
        assert_eq!(hits.get(), 1);

        emitter
            .add_listener_context("slow", ContextOptions::default().nice(50))
            .unwrap();
        emitter.on("f", counting(&hits).context("slow")).unwrap();
        emitter.emit("f", vec![]).unwrap();
        clock.advance(Duration::from_millis(49));
        assert_eq!(hits.get(), 1);
        clock.advance(Duration::from_millis(1));
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_default_emitter_nice() {
        let (emitter, clock) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.on("e", counting(&hits)).unwrap();
        emitter.set_nice(5);
        assert_eq!(emitter.nice(), 5);

        emitter.emit("e", vec![]).unwrap();
        assert_eq!(hits.get(), 0);
        clock.run_all();
        assert_eq!(hits.get(), 1);

        emitter.set_nice(SYNC);
        emitter.emit("e", vec![]).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_negative_nice_throttles_on_recursion_depth() {
        let (emitter, clock) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));

        // depth 1 at top level: IMMEDIATE (-1) is deferred, -2 runs inline
        emitter.on("a", recording(&log, "immediate").nice(IMMEDIATE)).unwrap();
        emitter.on("a", recording(&log, "inline").nice(-2)).unwrap();

        emitter.emit("a", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec!["inline"]);
        clock.run_until_idle();
        assert_eq!(*log.borrow(), vec!["inline", "immediate"]);

        // nested dispatch reaches depth 2, deferring -2 as well
        let weak = emitter.downgrade();
        emitter
            .on(
                "outer",
                Listener::new(move |_| {
                    if let Some(emitter) = weak.upgrade() {
                        emitter.emit("inner", vec![]).unwrap();
                    }
                }),
            )
            .unwrap();
        emitter.on("inner", recording(&log, "nested").nice(-2)).unwrap();

        emitter.emit("outer", vec![]).unwrap();
        assert_eq!(log.borrow().len(), 2);
        clock.run_until_idle();
        assert_eq!(log.borrow().last().map(String::as_str), Some("nested"));
    }

    #[test]
    fn test_completion_waits_for_async_listeners() {
        let (emitter, _) = setup();
        let pending = Rc::new(RefCell::new(Vec::new()));
        let sink = pending.clone();
        emitter
            .on("job", Listener::with_done(move |_, done| sink.borrow_mut().push(done)))
            .unwrap();
        emitter.on("job", Listener::new(|_| {})).unwrap();

        let (calls, probe) = completion_probe();
        let event = emitter.emit_with_callback("job", vec![], probe).unwrap().unwrap();
        assert!(calls.borrow().is_empty());
        assert_eq!(event.listeners_done(), 1);
        assert!(!event.is_settled());

        let done = pending.borrow_mut().pop().unwrap();
        done.done();
        assert_eq!(*calls.borrow(), vec![Outcome::Continue]);
        assert!(event.is_settled());
    }

    #[test]
    fn test_interruption_fires_once_with_first_value() {
        let (emitter, _) = setup();
        emitter.set_interruptible(true);
        let interrupts = Rc::new(RefCell::new(Vec::new()));
        let sink = interrupts.clone();
        emitter
            .on("interrupt", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args.to_vec())))
            .unwrap();

        let pending = Rc::new(RefCell::new(Vec::new()));
        let sink = pending.clone();
        emitter
            .on("req", Listener::with_done(move |_, done| sink.borrow_mut().push(done)))
            .unwrap();
        emitter
            .on("req", Listener::with_done(move |_, done| done.interrupt(json!("first"))))
            .unwrap();

        let (calls, probe) = completion_probe();
        let event = emitter.emit_with_callback("req", vec![], probe).unwrap().unwrap();

        let late = pending.borrow_mut().pop().unwrap();
        late.interrupt(json!("second"));

        assert_eq!(*calls.borrow(), vec![Outcome::Interrupt(json!("first"))]);
        assert_eq!(*interrupts.borrow(), vec![vec![json!("first")]]);
        assert_eq!(event.interruption(), Some(json!("first")));
    }

    #[test]
    fn test_null_payload_still_interrupts() {
        let (emitter, _) = setup();
        emitter.set_interruptible(true);
        let after = Rc::new(Cell::new(0));
        emitter.on("q", Listener::new(|_| Outcome::Interrupt(Value::Null))).unwrap();
        emitter.on("q", counting(&after)).unwrap();

        let (calls, probe) = completion_probe();
        emitter.emit_with_callback("q", vec![], probe).unwrap();

        assert_eq!(*calls.borrow(), vec![Outcome::Interrupt(Value::Null)]);
        assert_eq!(after.get(), 0);
    }

    #[test]
    fn test_interrupt_ignored_when_not_interruptible() {
        let (emitter, _) = setup();
        let after = Rc::new(Cell::new(0));
        emitter.on("q", Listener::new(|_| Some(json!(1)))).unwrap();
        emitter.on("q", counting(&after)).unwrap();

        let (calls, probe) = completion_probe();
        let event = emitter.emit_with_callback("q", vec![], probe).unwrap().unwrap();

        assert_eq!(*calls.borrow(), vec![Outcome::Continue]);
        assert_eq!(after.get(), 1);
        assert!(!event.is_interrupted());
    }

    #[test]
    fn test_interrupt_event_cannot_interrupt_itself() {
        let (emitter, _) = setup();
        emitter.set_interruptible(true);
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        emitter
            .on(
                "interrupt",
                Listener::new(move |_| {
                    s.set(s.get() + 1);
                    Outcome::Interrupt(json!("again"))
                }),
            )
            .unwrap();
        emitter.on("x", Listener::new(|_| Outcome::Interrupt(json!("stop")))).unwrap();

        emitter.emit("x", vec![]).unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_deferred_listeners_skip_interrupted_events() {
        let (emitter, clock) = setup();
        emitter.set_interruptible(true);
        let later = Rc::new(Cell::new(0));
        emitter.on("x", counting(&later).nice(10)).unwrap();
        emitter.on("x", Listener::new(|_| Outcome::Interrupt(json!(true)))).unwrap();

        emitter.emit("x", vec![]).unwrap();
        clock.run_all();
        assert_eq!(later.get(), 0);
    }

    #[test]
    fn test_disabled_context_drops_events() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.on("e", counting(&hits).context("ctx")).unwrap();

        emitter.disable_listener_context("ctx").unwrap();
        for _ in 0..3 {
            emitter.emit("e", vec![]).unwrap();
        }
        assert_eq!(hits.get(), 0);
        assert_eq!(emitter.queued_jobs("ctx"), 0);

        emitter.enable_listener_context("ctx").unwrap();
        emitter.emit("e", vec![]).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_queued_context_drains_on_enable() {
        let (emitter, _) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        emitter
            .on(
                "e",
                Listener::new(move |args: &[Value]| sink.borrow_mut().push(args[0].clone())).context("ctx"),
            )
            .unwrap();

        emitter.queue_listener_context("ctx").unwrap();
        assert_eq!(emitter.listener_context_status("ctx"), Some(ContextStatus::Queued));
        for n in 0..3 {
            emitter.emit("e", vec![json!(n)]).unwrap();
        }
        assert!(log.borrow().is_empty());
        assert_eq!(emitter.queued_jobs("ctx"), 3);

        emitter.enable_listener_context("ctx").unwrap();
        assert_eq!(*log.borrow(), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(emitter.queued_jobs("ctx"), 0);
    }

    #[test]
    fn test_queued_jobs_of_interrupted_events_are_dropped() {
        let (emitter, _) = setup();
        emitter.set_interruptible(true);
        let hits = Rc::new(Cell::new(0));
        emitter.on("e", Listener::new(|_| Outcome::Interrupt(json!("no")))).unwrap();
        emitter.on("e", counting(&hits).context("ctx")).unwrap();

        emitter.queue_listener_context("ctx").unwrap();
        emitter.emit("e", vec![]).unwrap();
        assert_eq!(emitter.queued_jobs("ctx"), 1);

        emitter.enable_listener_context("ctx").unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(emitter.queued_jobs("ctx"), 0);
    }

    #[test]
    fn test_serial_context_completes_in_registration_order() {
        let (emitter, clock) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        emitter.serialize_listener_context("serial", true).unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "a", 30).context("serial")).unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "b", 10).context("serial")).unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "c", 20).context("serial")).unwrap();

        let (calls, probe) = completion_probe();
        emitter.emit_with_callback("run", vec![], probe).unwrap();
        assert_eq!(emitter.queued_jobs("serial"), 2);

        clock.run_all();
        assert_eq!(
            *log.borrow(),
            vec!["start a", "end a", "start b", "end b", "start c", "end c"]
        );
        assert_eq!(clock.now(), Duration::from_millis(60));
        assert_eq!(*calls.borrow(), vec![Outcome::Continue]);
    }

    #[test]
    fn test_parallel_async_listeners_without_serial_context() {
        let (emitter, clock) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        emitter.on("run", delayed_worker(&clock, &log, "a", 30).context("free")).unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "b", 10).context("free")).unwrap();

        emitter.emit("run", vec![]).unwrap();
        clock.run_all();
        assert_eq!(*log.borrow(), vec!["start a", "start b", "end b", "end a"]);
        assert_eq!(clock.now(), Duration::from_millis(30));
    }

    #[test]
    fn test_serial_context_with_deferred_nice_keeps_one_in_flight() {
        let (emitter, clock) = setup();
        let log = Rc::new(RefCell::new(Vec::new()));
        emitter
            .add_listener_context("serial", ContextOptions::default().serial(true).nice(5))
            .unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "a", 10).context("serial")).unwrap();
        emitter.on("run", delayed_worker(&clock, &log, "b", 10).context("serial")).unwrap();

        emitter.emit("run", vec![]).unwrap();
        clock.run_all();
        assert_eq!(*log.borrow(), vec!["start a", "end a", "start b", "end b"]);
    }

    #[test]
    fn test_destroy_context_removes_its_listeners() {
        let (emitter, _) = setup();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        emitter
            .on(
                "removeListener",
                Listener::new(move |args: &[Value]| sink.borrow_mut().push(ListenerInfo::from_args(args))),
            )
            .unwrap();
        emitter.on("a", Listener::new(|_| {}).context("ui")).unwrap();
        emitter.on("b", Listener::new(|_| {}).context("ui")).unwrap();
        emitter.on("b", Listener::new(|_| {})).unwrap();

        emitter.destroy_listener_context("ui").unwrap();

        assert!(!emitter.has_listener_context("ui"));
        assert_eq!(emitter.listener_count("a"), 0);
        assert_eq!(emitter.listener_count("b"), 1);
        let batches = batches.borrow();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].iter().all(|info| info.context.as_deref() == Some("ui")));
    }

    #[test]
    fn test_add_listener_context_is_idempotent() {
        let (emitter, _) = setup();
        emitter
            .add_listener_context("c", ContextOptions::default().status(ContextStatus::Queued))
            .unwrap();
        emitter.add_listener_context("c", ContextOptions::default().serial(true)).unwrap();
        assert_eq!(emitter.listener_context_status("c"), Some(ContextStatus::Queued));

        emitter.set_listener_context_nice("c", 3).unwrap();
        assert_eq!(emitter.listener_context_status("missing"), None);
    }

    #[test]
    fn test_state_emission_is_suppressed_when_unchanged() {
        let (emitter, _) = setup();
        let hits = Rc::new(Cell::new(0));
        emitter.define_states(&["a", "b"]).unwrap();
        emitter.on("a", counting(&hits)).unwrap();

        assert!(emitter.emit("a", vec![json!(1)]).unwrap().is_some());
        assert!(emitter.emit("a", vec![json!(1)]).unwrap().is_none());
        assert_eq!(hits.get(), 1);

        emitter.emit("a", vec![json!(2)]).unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(emitter.state("a"), Some(vec![json!(2)]));
    }

    #[test]
    fn test_state_group_is_mutually_exclusive() {
        let (emitter, _) = setup();
        emitter.define_states(&["a", "b", "c"]).unwrap();
        emitter.emit("a", vec![]).unwrap();
        emitter.emit("b", vec![]).unwrap();

        assert!(!emitter.has_state("a"));
        assert!(emitter.has_state("b"));
        assert!(!emitter.has_state("unknown"));
        assert_eq!(emitter.get_all_states(), vec!["b".to_string()]);

        // a cleared state fires again even with the same arguments
        emitter.emit("a", vec![]).unwrap();
        assert_eq!(emitter.get_all_states(), vec!["a".to_string()]);
    }

    #[test]
    fn test_late_listener_receives_cached_state() {
        let (emitter, _) = setup();
        emitter.define_states(&["ready"]).unwrap();
        emitter.emit("ready", vec![json!("v1")]).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        emitter
            .on("ready", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args.to_vec())))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![vec![json!("v1")]]);

        let hits = Rc::new(Cell::new(0));
        emitter.once("ready", counting(&hits)).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(emitter.listener_count("ready"), 1);
    }

    #[test]
    fn test_share_and_reset() {
        let (source, _) = setup();
        let (target, _) = setup();
        let hits = Rc::new(Cell::new(0));
        source.on("x", counting(&hits)).unwrap();

        Emitter::share(&source, &target);
        assert!(target.same_storage(&source));
        target.emit("x", vec![]).unwrap();
        assert_eq!(hits.get(), 1);

        target.reset();
        assert!(!target.same_storage(&source));
        assert_eq!(target.listener_count("x"), 0);
        assert_eq!(source.listener_count("x"), 1);
    }

    #[test]
    fn test_max_listeners_does_not_block_registration() {
        let (emitter, _) = setup();
        emitter.set_max_listeners(1);
        emitter.on("x", Listener::new(|_| {})).unwrap();
        emitter.on("x", Listener::new(|_| {})).unwrap();
        emitter.on("x", Listener::new(|_| {})).unwrap();
        assert_eq!(emitter.listener_count("x"), 3);
        assert_eq!(emitter.max_listeners(), 1);
    }

    #[test]
    fn test_recursion_depth_restored_after_panic() {
        let (emitter, _) = setup();
        emitter.on("boom", Listener::new(|_| -> () { panic!("listener failure") })).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = emitter.emit("boom", vec![]);
        }));
        assert!(result.is_err());
        assert_eq!(emitter.core().state.borrow().recursion, 0);
    }

    #[test]
    fn test_dispatch_with_emission_builder() {
        let (emitter, clock) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        emitter
            .on("save", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args.to_vec())))
            .unwrap();

        let (calls, probe) = completion_probe();
        emitter
            .dispatch(Emission::new("save").arg(1).arg("two").nice(15).on_complete(probe))
            .unwrap();
        assert!(seen.borrow().is_empty());

        clock.advance(Duration::from_millis(15));
        assert_eq!(*seen.borrow(), vec![vec![json!(1), json!("two")]]);
        assert_eq!(*calls.borrow(), vec![Outcome::Continue]);
    }

    #[test]
    fn test_wait_for_futures() {
        let (emitter, _) = setup();
        let first = emitter.wait_for("value").unwrap();
        let all = emitter.wait_for_all("value").unwrap();
        emitter.emit("value", vec![json!(5), json!(6)]).unwrap();

        assert_eq!(futures::executor::block_on(first), Some(json!(5)));
        assert_eq!(futures::executor::block_on(all), vec![json!(5), json!(6)]);
        assert_eq!(emitter.listener_count("value"), 0);

        emitter.set_interruptible(true);
        emitter.on("ask", Listener::new(|_| Some(json!("no")))).unwrap();
        let outcome = futures::executor::block_on(emitter.wait_for_emit("ask", vec![]).unwrap());
        assert_eq!(outcome, Outcome::Interrupt(json!("no")));
    }
}
