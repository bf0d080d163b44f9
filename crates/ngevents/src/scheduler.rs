//! # Scheduler Adapters
//!
//! The dispatch engine never waits on anything itself. Deferred listener
//! invocations are handed to a [`Scheduler`] which runs them on the next
//! immediate slot or after a delay. Synchronous invocation is a plain call and
//! needs no scheduler support.
//!
//! Two adapters are provided:
//!
//! * [`TokioScheduler`] spawns local tasks and must run inside a
//!   [`tokio::task::LocalSet`]
//! * [`ManualScheduler`] is a virtual clock driven explicitly, for tests and
//!   embedders that own their loop

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce()>;

/// Deferred-callback facility consumed by emitters and proxies.
///
/// Both operations are fire-and-forget. Jobs scheduled with `immediate` must
/// run after the current call stack unwinds and before any delayed job whose
/// deadline has not passed yet.
pub trait Scheduler {
    /// Runs `job` on the next immediate slot.
    fn immediate(&self, job: Job);

    /// Runs `job` once `after` has elapsed.
    fn delay(&self, after: Duration, job: Job);
}

/// Scheduler backed by the tokio runtime.
///
/// Jobs are spawned with [`tokio::task::spawn_local`], so every emitter using
/// it has to be driven from within a `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn immediate(&self, job: Job) {
        tokio::task::spawn_local(async move {
            job();
        });
    }

    fn delay(&self, after: Duration, job: Job) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            job();
        });
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    sequence: u64,
    immediate: VecDeque<Job>,
    timers: BTreeMap<(Duration, u64), Job>,
}

/// Deterministic scheduler with a virtual clock.
///
/// Nothing runs until the owner calls [`run_until_idle`](Self::run_until_idle),
/// [`advance`](Self::advance) or [`run_all`](Self::run_all). Immediate jobs
/// always run before timers; timers fire in deadline order, first scheduled
/// first among equal deadlines.
///
/// ```rust
/// use ngevents::{ManualScheduler, Scheduler};
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let clock = ManualScheduler::new();
/// let hits = Rc::new(Cell::new(0));
/// let h = hits.clone();
/// clock.delay(Duration::from_millis(30), Box::new(move || h.set(h.get() + 1)));
///
/// clock.advance(Duration::from_millis(29));
/// assert_eq!(hits.get(), 0);
/// clock.advance(Duration::from_millis(1));
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    state: RefCell<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of jobs waiting, immediate and timed.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        state.immediate.len() + state.timers.len()
    }

    /// Runs immediate jobs and due timers until none is left, without moving
    /// the clock. Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.next_due_job() {
            job();
            ran += 1;
        }
        ran
    }

    /// Moves the clock forward by `by`, running everything that falls due on
    /// the way at its own deadline. Returns the number of jobs run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = self.run_until_idle();
        while let Some(job) = self.next_timer_until(target) {
            job();
            ran += 1;
            ran += self.run_until_idle();
        }
        self.state.borrow_mut().now = target;
        ran + self.run_until_idle()
    }

    /// Runs every pending job, moving the clock to each deadline in turn.
    pub fn run_all(&self) -> usize {
        let mut ran = self.run_until_idle();
        while let Some(job) = self.next_timer_until(Duration::MAX) {
            job();
            ran += 1;
            ran += self.run_until_idle();
        }
        ran
    }

    fn next_due_job(&self) -> Option<Job> {
        let mut state = self.state.borrow_mut();
        if let Some(job) = state.immediate.pop_front() {
            return Some(job);
        }
        let now = state.now;
        let key = *state.timers.keys().next().filter(|(deadline, _)| *deadline <= now)?;
        state.timers.remove(&key)
    }

    fn next_timer_until(&self, limit: Duration) -> Option<Job> {
        let mut state = self.state.borrow_mut();
        let key = *state.timers.keys().next().filter(|(deadline, _)| *deadline <= limit)?;
        if key.0 > state.now {
            state.now = key.0;
        }
        state.timers.remove(&key)
    }
}

impl Scheduler for ManualScheduler {
    fn immediate(&self, job: Job) {
        self.state.borrow_mut().immediate.push_back(job);
    }

    fn delay(&self, after: Duration, job: Job) {
        let mut state = self.state.borrow_mut();
        let deadline = state.now.saturating_add(after);
        let sequence = state.sequence;
        state.sequence += 1;
        trace!(deadline_ms = deadline.as_millis() as u64, "timer scheduled");
        state.timers.insert((deadline, sequence), job);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("immediate", &state.immediate.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}
