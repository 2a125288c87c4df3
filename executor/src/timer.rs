//! Scoped measurement of CPU and wall time.
//!
//! CPU timers active on a thread form a stack (each remembers the timer it displaced).
//! Only the timer at the top of the stack charges its executor: entering another
//! executor through a [WallTimer] pauses it, so time spent elsewhere (or blocked on
//! another isolate's locker) is never attributed to it.

use crate::{clock::CpuClock, Executor};
use std::{
    cell::RefCell,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Source of CPU timer identities.
static NEXT_TIMER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Innermost CPU timer on this thread, across all executors.
    static INNERMOST: RefCell<Option<Active>> = const { RefCell::new(None) };
}

/// Handle to a CPU timer on the thread-local stack.
#[derive(Clone, Debug)]
struct Active {
    executor: Arc<Executor>,
    id: u64,
    clock: CpuClock,
}

impl Active {
    fn pause(&self) -> bool {
        self.executor.pause_cpu(self.id)
    }

    fn resume(&self) {
        self.executor.resume_cpu(self.id, self.clock);
    }
}

/// Returns the identity of the innermost CPU timer on this thread.
#[cfg(test)]
pub(crate) fn innermost() -> Option<u64> {
    INNERMOST.with(|head| head.borrow().as_ref().map(|active| active.id))
}

/// Attributes the CPU time consumed by this thread to an executor while alive.
///
/// At most one CPU timer charges an executor at a time. Constructing a second one while
/// the first is still charging (rather than paused) is a programming error and panics.
pub struct CpuTimer {
    active: Active,
    last: Option<Active>,
    _not_send: PhantomData<*const ()>,
}

impl CpuTimer {
    /// Start charging `executor` and push the timer onto this thread's stack.
    pub fn new(executor: &Arc<Executor>) -> Self {
        let active = Active {
            executor: executor.clone(),
            id: NEXT_TIMER.fetch_add(1, Ordering::Relaxed),
            clock: CpuClock::current(executor.clock()),
        };
        executor.install_cpu(active.id, active.clock);
        let last = INNERMOST.with(|head| head.replace(Some(active.clone())));
        Self {
            active,
            last,
            _not_send: PhantomData,
        }
    }

    /// The executor being charged.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.active.executor
    }

    /// Flush accrued time into the executor, stop charging it and pause its quota timer.
    ///
    /// Returns `false` if the timer was already paused.
    pub fn pause(&self) -> bool {
        self.active.pause()
    }

    /// Resume charging the executor and its quota timer.
    ///
    /// Panics if another timer is charging the executor.
    pub fn resume(&self) {
        self.active.resume();
    }
}

impl Drop for CpuTimer {
    fn drop(&mut self) {
        INNERMOST.with(|head| *head.borrow_mut() = self.last.take());
        self.active.executor.settle_cpu(self.active.id);
    }
}

/// Pauses a CPU timer for the duration of a scope.
///
/// If the timer was charging when the scope started, it resumes when the scope ends.
pub struct PauseScope {
    paused: Option<Active>,
    _not_send: PhantomData<*const ()>,
}

impl PauseScope {
    /// Pause `timer`.
    pub fn new(timer: &CpuTimer) -> Self {
        Self::pausing(Some(timer.active.clone()))
    }

    /// Pause the innermost CPU timer on this thread, if any.
    pub fn innermost() -> Self {
        Self::pausing(INNERMOST.with(|head| head.borrow().clone()))
    }

    /// Pause whichever CPU timer is charging `executor`, if any.
    ///
    /// The charging timer must run on this thread (for example, because this thread
    /// holds the executor's isolate), as it is resumed from here.
    pub fn charging(executor: &Arc<Executor>) -> Self {
        Self {
            paused: executor.pause_charging().map(|(id, clock)| Active {
                executor: executor.clone(),
                id,
                clock,
            }),
            _not_send: PhantomData,
        }
    }

    fn pausing(timer: Option<Active>) -> Self {
        Self {
            paused: timer.filter(Active::pause),
            _not_send: PhantomData,
        }
    }

    /// Returns `true` if this scope paused a charging timer.
    pub fn paused(&self) -> bool {
        self.paused.is_some()
    }
}

impl Drop for PauseScope {
    fn drop(&mut self) {
        if let Some(timer) = self.paused.take() {
            timer.resume();
        }
    }
}

/// Measures the wall time during which an executor is entered.
///
/// On construction, the innermost CPU timer on this thread (which may charge another
/// executor) is paused until the wall timer ends. Constructing a wall timer before
/// blocking on an isolate's locker therefore keeps the wait off every executor's CPU
/// time.
///
/// Wall time is the union of entered intervals: nested or concurrent wall timers on the
/// same executor never count the same instant twice.
pub struct WallTimer {
    executor: Arc<Executor>,
    paused: Option<PauseScope>,
    opener: bool,
}

impl WallTimer {
    /// Pause the innermost CPU timer and enter the wall interval of `executor`.
    pub fn new(executor: &Arc<Executor>) -> Self {
        let paused = PauseScope::innermost();
        let opener = executor.open_wall();
        Self {
            executor: executor.clone(),
            paused: Some(paused),
            opener,
        }
    }

    /// Returns `true` if this timer opened the executor's wall interval.
    pub fn is_outermost(&self) -> bool {
        self.opener
    }
}

impl Drop for WallTimer {
    fn drop(&mut self) {
        // Resume the displaced timer before leaving the interval
        drop(self.paused.take());
        self.executor.close_wall(self.opener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ClockSource, mocks};
    use std::{
        mem::ManuallyDrop,
        sync::mpsc,
        thread,
        time::{Duration, Instant},
    };

    fn executor(name: &str, quota: &mocks::Quota) -> Arc<Executor> {
        Executor::new(name.into(), ClockSource::Steady, Box::new(quota.clone()))
    }

    #[test]
    fn test_stack_restored_after_nesting() {
        let quota = mocks::Quota::default();
        let a = executor("a", &quota);
        let b = executor("b", &quota);
        assert_eq!(innermost(), None);
        {
            let outer = CpuTimer::new(&a);
            let outer_id = innermost();
            {
                let _wall = WallTimer::new(&b);
                let _inner = CpuTimer::new(&b);
                assert_ne!(innermost(), outer_id);
                assert!(!a.is_charging());
                assert!(b.is_charging());
            }
            assert_eq!(innermost(), outer_id);
            assert!(a.is_charging());
            assert!(!b.is_charging());
            drop(outer);
        }
        assert_eq!(innermost(), None);
    }

    #[test]
    fn test_paused_executor_does_not_accrue() {
        let quota = mocks::Quota::default();
        let executor = executor("paused", &quota);
        let timer = CpuTimer::new(&executor);
        thread::sleep(Duration::from_millis(5));

        assert!(timer.pause());
        assert!(!timer.pause());
        let frozen = executor.cpu_time();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(executor.cpu_time(), frozen);

        timer.resume();
        thread::sleep(Duration::from_millis(5));
        assert!(executor.cpu_time() > frozen);
        drop(timer);
        assert_eq!(quota.events(), vec![mocks::Event::Pause, mocks::Event::Resume]);
    }

    #[test]
    fn test_pause_scope_resumes() {
        let quota = mocks::Quota::default();
        let executor = executor("scope", &quota);
        let timer = CpuTimer::new(&executor);
        {
            let scope = PauseScope::new(&timer);
            assert!(scope.paused());
            assert!(!executor.is_charging());

            // Already paused, nothing to resume later
            let nested = PauseScope::innermost();
            assert!(!nested.paused());
        }
        assert!(executor.is_charging());
        assert_eq!(quota.events(), vec![mocks::Event::Pause, mocks::Event::Resume]);
    }

    #[test]
    fn test_pause_charging_picks_inner_timer() {
        let quota = mocks::Quota::default();
        let executor = executor("charging", &quota);
        let _outer = CpuTimer::new(&executor);
        let _wall = WallTimer::new(&executor);
        let _inner = CpuTimer::new(&executor);
        {
            let scope = PauseScope::charging(&executor);
            assert!(scope.paused());
            assert!(!executor.is_charging());
            let frozen = executor.cpu_time();
            thread::sleep(Duration::from_millis(5));
            assert_eq!(executor.cpu_time(), frozen);
        }
        assert!(executor.is_charging());
        assert!(!PauseScope::charging(&self::executor("idle", &quota)).paused());
    }

    #[test]
    fn test_wall_timer_without_cpu_timer() {
        let quota = mocks::Quota::default();
        let executor = executor("idle", &quota);
        let wall = WallTimer::new(&executor);
        assert!(wall.is_outermost());
        assert!(executor.is_entered());
        thread::sleep(Duration::from_millis(5));
        drop(wall);
        assert!(!executor.is_entered());
        assert!(executor.wall_time() >= Duration::from_millis(5));
        assert!(quota.events().is_empty());
    }

    #[test]
    fn test_nested_wall_counts_once() {
        let quota = mocks::Quota::default();
        let executor = executor("nested", &quota);
        let start = Instant::now();
        {
            let outer = WallTimer::new(&executor);
            thread::sleep(Duration::from_millis(5));
            {
                let inner = WallTimer::new(&executor);
                assert!(outer.is_outermost());
                assert!(!inner.is_outermost());
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = start.elapsed();
        let wall = executor.wall_time();
        assert!(wall >= Duration::from_millis(15));
        assert!(wall <= elapsed);
    }

    #[test]
    fn test_concurrent_wall_timers_union() {
        let quota = mocks::Quota::default();
        let executor = executor("union", &quota);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (left_tx, left_rx) = mpsc::channel::<()>();

        let start = Instant::now();
        let outer = WallTimer::new(&executor);
        let worker = thread::spawn({
            let executor = executor.clone();
            move || {
                let wall = WallTimer::new(&executor);
                entered_tx.send(wall.is_outermost()).unwrap();

                // Outlive the opener on the main thread
                left_rx.recv().unwrap();
                thread::sleep(Duration::from_millis(20));
            }
        });
        assert!(!entered_rx.recv().unwrap());
        thread::sleep(Duration::from_millis(10));
        drop(outer);
        assert!(executor.is_entered());
        left_tx.send(()).unwrap();
        worker.join().unwrap();
        let elapsed = start.elapsed();

        let wall = executor.wall_time();
        assert!(!executor.is_entered());
        assert!(wall >= Duration::from_millis(30));
        assert!(wall <= elapsed);
    }

    #[test]
    #[should_panic(expected = "cpu timer already installed")]
    fn test_double_install_panics() {
        let quota = mocks::Quota::default();
        let executor = executor("double", &quota);
        let _first = CpuTimer::new(&executor);
        let _second = CpuTimer::new(&executor);
    }

    #[test]
    #[should_panic(expected = "already charging")]
    fn test_resume_over_installed_timer_panics() {
        let quota = mocks::Quota::default();
        let executor = executor("resume", &quota);
        let first = ManuallyDrop::new(CpuTimer::new(&executor));
        assert!(first.pause());
        let _second = CpuTimer::new(&executor);
        first.resume();
    }
}
