//! Per-isolate bookkeeping of CPU and wall time.

use crate::{
    clock::{ClockSource, CpuClock},
    Quota,
};
use std::{
    cell::RefCell,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};
use tracing::debug;

thread_local! {
    /// Executor bound by the innermost active [crate::Scope] on this thread.
    pub(crate) static CURRENT: RefCell<Option<Arc<Executor>>> = const { RefCell::new(None) };

    /// Executor constructed on this thread while no other executor was current.
    ///
    /// Held weakly so the thread never keeps an environment alive.
    static ROOT: RefCell<Weak<Executor>> = RefCell::new(Weak::new());
}

/// The CPU timer currently charging an executor.
#[derive(Debug)]
struct Charging {
    /// Identity of the timer.
    id: u64,

    /// Clock of the thread the timer runs on.
    clock: CpuClock,

    /// Reading of `clock` when charging started (or last resumed).
    since: Duration,
}

impl Charging {
    /// CPU time accrued since charging started.
    fn delta(&self) -> Duration {
        self.clock.now().saturating_sub(self.since)
    }
}

/// The wall interval during which an executor is entered by at least one thread.
#[derive(Debug)]
struct Interval {
    /// When the interval opened (or was last flushed).
    since: Instant,

    /// Number of active wall timers keeping the interval open.
    depth: usize,
}

/// Totals and active timers, guarded by the executor's timer mutex.
#[derive(Debug, Default)]
struct Timers {
    cpu_time: Duration,
    wall_time: Duration,
    cpu: Option<Charging>,
    wall: Option<Interval>,
}

/// Per-isolate anchor for time attribution.
///
/// An `Executor` accumulates the CPU time spent inside its isolate (across every thread
/// that enters it) and the wall time during which the isolate was entered at all. Both
/// totals include any in-flight measurement when read.
///
/// Executors are created by [crate::Environment::new]. On construction, the executor
/// that is current on the constructing thread (typically the host isolate that creates
/// this one) is captured as its default executor. If no executor is current, the new
/// executor becomes its own default and the thread's root executor.
pub struct Executor {
    name: String,
    clock: ClockSource,
    quota: Box<dyn Quota>,

    /// `None` if this executor is its own default.
    default: Option<Arc<Executor>>,
    default_thread: ThreadId,

    timers: Mutex<Timers>,
}

impl Executor {
    pub(crate) fn new(name: String, clock: ClockSource, quota: Box<dyn Quota>) -> Arc<Self> {
        let host = Self::current();
        let default_thread = match &host {
            Some(host) => host.default_thread,
            None => thread::current().id(),
        };
        let executor = Arc::new(Self {
            name,
            clock,
            quota,
            default: host,
            default_thread,
            timers: Mutex::new(Timers::default()),
        });
        match &executor.default {
            Some(host) => {
                debug!(
                    name = %executor.name,
                    default = %host.name,
                    "inherited default executor"
                );
            }
            None => {
                ROOT.with(|root| *root.borrow_mut() = Arc::downgrade(&executor));
                debug!(name = %executor.name, "installed root executor");
            }
        }
        executor
    }

    /// Returns the executor whose isolate the calling thread is inside of.
    ///
    /// Falls back to the thread's root executor when no [crate::Scope] is active.
    pub fn current() -> Option<Arc<Executor>> {
        CURRENT
            .with(|current| current.borrow().clone())
            .or_else(|| ROOT.with(|root| root.borrow().upgrade()))
    }

    /// Returns `true` if the calling thread is the default thread of the current executor.
    pub fn is_default_thread() -> bool {
        Self::current().is_some_and(|executor| executor.default_thread == thread::current().id())
    }

    /// Returns `true` if host-side work may run inline on the calling thread.
    ///
    /// This is the case when the thread is not inside of any child isolate: the current
    /// executor is a root executor and this is its default thread.
    pub fn may_run_inline_tasks() -> bool {
        Self::current().is_some_and(|executor| {
            executor.is_default() && executor.default_thread == thread::current().id()
        })
    }

    /// Label of the executor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source of CPU time used by timers charging this executor.
    pub fn clock(&self) -> ClockSource {
        self.clock
    }

    /// Returns `true` if this executor is its own default.
    pub fn is_default(&self) -> bool {
        self.default.is_none()
    }

    /// Returns the executor that was current when this one was constructed (or this
    /// executor if none was).
    pub fn default_executor(self: &Arc<Self>) -> Arc<Executor> {
        self.default.clone().unwrap_or_else(|| self.clone())
    }

    /// Returns the root thread shared by this executor's chain of defaults.
    pub fn default_thread(&self) -> ThreadId {
        self.default_thread
    }

    /// CPU time attributed to this executor, including any timer currently charging it.
    pub fn cpu_time(&self) -> Duration {
        let timers = self.timers();
        let mut time = timers.cpu_time;
        if let Some(charging) = &timers.cpu {
            time += charging.delta();
        }
        time
    }

    /// Wall time during which this executor was entered, including any open interval.
    pub fn wall_time(&self) -> Duration {
        let timers = self.timers();
        let mut time = timers.wall_time;
        if let Some(interval) = &timers.wall {
            time += interval.since.elapsed();
        }
        time
    }

    /// Returns `true` if a CPU timer is currently charging this executor.
    pub fn is_charging(&self) -> bool {
        self.timers().cpu.is_some()
    }

    /// Returns `true` if any thread has entered this executor.
    pub fn is_entered(&self) -> bool {
        self.timers().wall.is_some()
    }

    /// Lock the timer state.
    ///
    /// Assertions fire before any field is mutated, so a poisoned lock still guards
    /// consistent state.
    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start charging CPU time to the timer `id` reading `clock`.
    pub(crate) fn install_cpu(&self, id: u64, clock: CpuClock) {
        let mut timers = self.timers();
        assert!(
            timers.cpu.is_none(),
            "cpu timer already installed on executor {}",
            self.name
        );
        timers.cpu = Some(Charging {
            id,
            clock,
            since: clock.now(),
        });
    }

    /// Stop charging CPU time to the timer `id`, which must be installed.
    pub(crate) fn settle_cpu(&self, id: u64) {
        let mut timers = self.timers();
        match timers.cpu.take() {
            Some(charging) if charging.id == id => timers.cpu_time += charging.delta(),
            other => {
                let found = other.as_ref().map(|charging| charging.id);
                timers.cpu = other;
                panic!(
                    "cpu timer {id} is not installed on executor {} (found {found:?})",
                    self.name
                );
            }
        }
    }

    /// Suspend charging the timer `id` and pause the quota timer.
    ///
    /// Returns `false` (and does nothing) if `id` is not the timer charging this executor.
    pub(crate) fn pause_cpu(&self, id: u64) -> bool {
        let mut timers = self.timers();
        let charging = match timers.cpu.take() {
            Some(charging) if charging.id == id => charging,
            other => {
                timers.cpu = other;
                return false;
            }
        };
        timers.cpu_time += charging.delta();
        self.quota.pause();
        true
    }

    /// Suspend whichever timer is charging this executor and pause the quota timer.
    ///
    /// Returns the identity and clock needed to resume it, or `None` if nothing is
    /// charging.
    pub(crate) fn pause_charging(&self) -> Option<(u64, CpuClock)> {
        let mut timers = self.timers();
        let charging = timers.cpu.take()?;
        timers.cpu_time += charging.delta();
        self.quota.pause();
        Some((charging.id, charging.clock))
    }

    /// Resume charging the paused timer `id` and resume the quota timer.
    pub(crate) fn resume_cpu(&self, id: u64, clock: CpuClock) {
        let mut timers = self.timers();
        assert!(
            timers.cpu.is_none(),
            "cannot resume cpu timer {id}, executor {} is already charging",
            self.name
        );
        timers.cpu = Some(Charging {
            id,
            clock,
            since: clock.now(),
        });
        self.quota.resume();
    }

    /// Enter the wall interval, opening it if no other wall timer is active.
    ///
    /// Returns `true` if this call opened the interval.
    pub(crate) fn open_wall(&self) -> bool {
        let mut timers = self.timers();
        match &mut timers.wall {
            Some(interval) => {
                interval.depth += 1;
                false
            }
            None => {
                timers.wall = Some(Interval {
                    since: Instant::now(),
                    depth: 1,
                });
                true
            }
        }
    }

    /// Leave the wall interval, flushing it into the total once no wall timer remains.
    ///
    /// If `opener` is set but other wall timers are still active, the elapsed span is
    /// flushed and the interval continues under the remaining timers.
    pub(crate) fn close_wall(&self, opener: bool) {
        let mut timers = self.timers();
        let now = Instant::now();
        let Some(interval) = timers.wall.as_mut() else {
            panic!("no wall interval open on executor {}", self.name);
        };
        interval.depth -= 1;
        if interval.depth == 0 {
            let elapsed = now.saturating_duration_since(interval.since);
            timers.wall = None;
            timers.wall_time += elapsed;
        } else if opener {
            let elapsed = now.saturating_duration_since(interval.since);
            interval.since = now;
            timers.wall_time += elapsed;
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("clock", &self.clock)
            .field("default", &self.default.as_ref().map(|host| host.name()))
            .field("default_thread", &self.default_thread)
            .finish_non_exhaustive()
    }
}
