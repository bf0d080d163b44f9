#[cfg(test)]
use super::*;
#[cfg(test)]
use crate::group::{group_emit_with, group_on, GroupListener};
#[cfg(test)]
use serde_json::{json, Value};
#[cfg(test)]
use std::cell::{Cell, RefCell};
#[cfg(test)]
use std::rc::Rc;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn manual_emitter() -> (Emitter, Rc<ManualScheduler>) {
    let clock = Rc::new(ManualScheduler::new());
    (Emitter::with_scheduler(clock.clone()), clock)
}

#[cfg(test)]
fn counter() -> (Rc<Cell<usize>>, Listener) {
    let hits = Rc::new(Cell::new(0));
    let handle = hits.clone();
    (hits, Listener::new(move |_| handle.set(handle.get() + 1)))
}

#[test]
fn test_first_interrupting_listener_stops_the_event() {
    let (door, _clock) = manual_emitter();
    door.set_interruptible(true);

    door.on("foo", Listener::new(|_| Outcome::Interrupt(json!({ "want": "x" }))))
        .unwrap();
    let (l2, listener) = counter();
    door.on("foo", listener).unwrap();
    let (l3, listener) = counter();
    door.on("foo", listener).unwrap();

    let interrupts = Rc::new(RefCell::new(Vec::new()));
    let sink = interrupts.clone();
    door.on(
        INTERRUPT,
        Listener::new(move |args: &[Value]| sink.borrow_mut().push(args[0].clone())),
    )
    .unwrap();

    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = outcomes.clone();
    door.emit_with_callback("foo", vec![], move |outcome, _| sink.borrow_mut().push(outcome))
        .unwrap();

    assert_eq!(*outcomes.borrow(), vec![Outcome::Interrupt(json!({ "want": "x" }))]);
    assert_eq!(*interrupts.borrow(), vec![json!({ "want": "x" })]);
    assert_eq!(l2.get(), 0);
    assert_eq!(l3.get(), 0);
}

#[test]
fn test_group_emit_waits_for_the_slowest_emitter() {
    let clock = Rc::new(ManualScheduler::new());
    let emitters: Vec<Emitter> = (0..3).map(|_| Emitter::with_scheduler(clock.clone())).collect();

    for (emitter, ms) in emitters.iter().zip([50u64, 10, 20]) {
        let timer = clock.clone();
        emitter
            .on(
                "ping",
                Listener::with_done(move |_, done| {
                    timer.delay(Duration::from_millis(ms), Box::new(move || done.done()));
                }),
            )
            .unwrap();
    }

    let fired_at = Rc::new(RefCell::new(Vec::new()));
    let sink = fired_at.clone();
    let probe = clock.clone();
    group_emit_with(&emitters, "ping", vec![], None, move |outcome| {
        assert_eq!(outcome, Outcome::Continue);
        sink.borrow_mut().push(probe.now());
    })
    .unwrap();

    clock.advance(Duration::from_millis(20));
    assert!(fired_at.borrow().is_empty());

    clock.run_all();
    assert_eq!(*fired_at.borrow(), vec![Duration::from_millis(50)]);
}

#[test]
fn test_group_listener_sees_which_emitter_fired() {
    let clock = Rc::new(ManualScheduler::new());
    let left = Emitter::with_scheduler(clock.clone());
    let right = Emitter::with_scheduler(clock.clone());
    let emitters = vec![left.clone(), right.clone()];

    let sources = Rc::new(RefCell::new(Vec::new()));
    let sink = sources.clone();
    let probe = right.clone();
    group_on(
        &emitters,
        "moved",
        &GroupListener::new(move |emitter: &Emitter, _: &[Value]| sink.borrow_mut().push(emitter.same_storage(&probe))),
    )
    .unwrap();

    left.emit("moved", vec![]).unwrap();
    right.emit("moved", vec![]).unwrap();
    assert_eq!(*sources.borrow(), vec![false, true]);
}

#[test]
fn test_serial_context_runs_listeners_one_after_another() {
    let (jobs, clock) = manual_emitter();
    jobs.add_listener_context("serial", ContextOptions::default().serial(true))
        .unwrap();

    let finished = Rc::new(Cell::new(0usize));
    for (index, ms) in [30u64, 10, 20].into_iter().enumerate() {
        let finished = finished.clone();
        let timer = clock.clone();
        jobs.on(
            "run",
            Listener::with_done(move |_, done| {
                // every earlier listener has completed before this one starts
                assert_eq!(finished.get(), index);
                let finished = finished.clone();
                timer.delay(
                    Duration::from_millis(ms),
                    Box::new(move || {
                        finished.set(finished.get() + 1);
                        done.done();
                    }),
                );
            })
            .context("serial"),
        )
        .unwrap();
    }

    let completed = Rc::new(Cell::new(false));
    let flag = completed.clone();
    jobs.emit_with_callback("run", vec![], move |_, _| flag.set(true)).unwrap();
    clock.run_all();

    assert_eq!(finished.get(), 3);
    assert!(completed.get());
    assert_eq!(clock.now(), Duration::from_millis(60));
}

#[test]
fn test_disabled_context_then_enabled() {
    let (emitter, _clock) = manual_emitter();
    let (hits, listener) = counter();
    emitter.on("tick", listener.context("ctx")).unwrap();

    emitter.disable_listener_context("ctx").unwrap();
    for _ in 0..3 {
        emitter.emit("tick", vec![]).unwrap();
    }
    assert_eq!(hits.get(), 0);

    emitter.enable_listener_context("ctx").unwrap();
    assert_eq!(hits.get(), 0);
    emitter.emit("tick", vec![]).unwrap();
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_state_events_lifecycle() {
    let (door, _clock) = manual_emitter();
    door.define_states(&["open", "closed", "locked"]).unwrap();

    let (hits, listener) = counter();
    door.on("open", listener).unwrap();

    door.emit("open", vec![json!(1)]).unwrap();
    door.emit("open", vec![json!(1)]).unwrap();
    assert_eq!(hits.get(), 1);
    door.emit("open", vec![json!(2)]).unwrap();
    assert_eq!(hits.get(), 2);

    door.emit("closed", vec![]).unwrap();
    assert!(!door.has_state("open"));
    assert!(door.has_state("closed"));
    assert_eq!(door.get_all_states(), vec!["closed".to_string()]);

    let late = Rc::new(RefCell::new(Vec::new()));
    let sink = late.clone();
    door.on("closed", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args.len())))
        .unwrap();
    assert_eq!(*late.borrow(), vec![0]);
}

#[test]
fn test_error_event_needs_a_listener() {
    let (emitter, _clock) = manual_emitter();
    assert!(matches!(
        emitter.emit("error", vec![json!("disk full")]),
        Err(EmitterError::UnhandledError(value)) if value == json!("disk full")
    ));

    let (hits, listener) = counter();
    emitter.on(ERROR, listener).unwrap();
    emitter.emit("error", vec![json!("disk full")]).unwrap();
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_proxy_round_trip_over_memory_transport() {
    let clock = Rc::new(ManualScheduler::new());
    let to_server = MemoryTransport::new();
    let to_client = MemoryTransport::new();
    let server = Proxy::with_scheduler(to_client.clone(), clock.clone());
    let client = Proxy::with_scheduler(to_server.clone(), clock.clone());

    let heart = Emitter::with_scheduler(clock.clone());
    server.add_local_service(
        "heartBeat",
        &heart,
        ServiceCapabilities {
            listen: true,
            emit: true,
            ack: true,
            rpc: false,
        },
    );
    let remote = client.add_remote_service("heartBeat");

    let beats = Rc::new(RefCell::new(Vec::new()));
    let sink = beats.clone();
    remote
        .on("beat", Listener::new(move |args: &[Value]| sink.borrow_mut().push(args.to_vec())))
        .unwrap();
    to_server.deliver_to(&server);

    heart.emit("beat", vec![json!(7)]).unwrap();

    let messages = to_client.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].method, proxy::Method::Event);
    for message in messages {
        client.push(message);
    }
    assert_eq!(*beats.borrow(), vec![vec![json!(7)]]);
}

#[test]
fn test_emitter_built_from_config() {
    let config: EmitterConfig = toml::from_str(
        r#"
        interruptible = true
        states = [["idle", "busy"]]

        [contexts.workers]
        serial = true
        "#,
    )
    .unwrap();
    let clock = Rc::new(ManualScheduler::new());
    let emitter = Emitter::from_config(&config, clock).unwrap();

    assert!(emitter.is_interruptible());
    assert!(emitter.has_listener_context("workers"));
    emitter.emit("busy", vec![]).unwrap();
    assert_eq!(emitter.get_all_states(), vec!["busy".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_end_to_end() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let emitter = Emitter::new();
            emitter
                .on(
                    "work",
                    Listener::with_done(|_, done| {
                        tokio::task::spawn_local(async move {
                            tokio::time::sleep(Duration::from_millis(40)).await;
                            done.done();
                        });
                    })
                    .nice(10),
                )
                .unwrap();

            let started = tokio::time::Instant::now();
            let outcome = emitter.wait_for_emit("work", vec![]).unwrap().await;
            assert_eq!(outcome, Outcome::Continue);
            assert!(started.elapsed() >= Duration::from_millis(50));
        })
        .await;
}
