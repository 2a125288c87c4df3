//! Entering and yielding isolates.

use crate::{CpuTimer, Environment, Isolate, PauseScope, Scope, WallTimer};

/// Enters an isolate for the duration of a scope.
///
/// Construction acquires, in order:
/// 1. a [Scope] binding the environment's executor as current,
/// 2. a [WallTimer] on the executor (pausing the innermost CPU timer on this thread),
/// 3. the isolate's locker (the only step that may block),
/// 4. a [CpuTimer] charging the executor,
/// 5. the engine's isolate scope,
/// 6. the engine's handle scope.
///
/// Everything is released in reverse order when the lock is dropped. Because the outer
/// CPU timer is paused before blocking on the locker and the new CPU timer starts only
/// once the locker is held, neither isolate is charged for the wait.
///
/// Locks may nest, on the same isolate (re-entry from a callback, if the engine's locker
/// is reentrant) or on different isolates.
pub struct Lock<'a, I: Isolate + 'a> {
    // Fields drop in declaration order, the reverse of acquisition.
    handles: I::Handles<'a>,
    entered: I::Entered<'a>,
    cpu_timer: CpuTimer,
    locker: Option<I::Locker<'a>>,
    wall_timer: WallTimer,
    _scope: Scope,
    env: &'a Environment<I>,
}

impl<'a, I: Isolate> Lock<'a, I> {
    /// Enter the isolate of `env`, blocking until its locker is available.
    pub fn new(env: &'a Environment<I>) -> Self {
        let scope = Scope::new(env.executor());
        let wall_timer = WallTimer::new(env.executor());
        let locker = env.acquire();
        let cpu_timer = CpuTimer::new(env.executor());
        let entered = env.isolate().enter();
        let handles = env.isolate().handles();
        Self {
            handles,
            entered,
            cpu_timer,
            locker: Some(locker),
            wall_timer,
            _scope: scope,
            env,
        }
    }

    /// The environment this lock entered.
    pub fn environment(&self) -> &'a Environment<I> {
        self.env
    }

    /// The engine's isolate scope.
    pub fn entered(&self) -> &I::Entered<'a> {
        &self.entered
    }

    /// The engine's handle scope.
    pub fn handles(&mut self) -> &mut I::Handles<'a> {
        &mut self.handles
    }

    /// Returns `true` if this lock opened the executor's wall interval.
    pub fn is_outermost(&self) -> bool {
        self.wall_timer.is_outermost()
    }

    /// Temporarily yield the isolate to other threads (see [Unlock]).
    pub fn unlock(&mut self) -> Unlock<'_, 'a, I> {
        Unlock::new(self)
    }
}

/// Yields the isolate entered by a [Lock] for the duration of a scope.
///
/// Construction pauses the CPU timer charging the lock's executor (the lock's own
/// timer, or that of a lock nested inside it on the same isolate) and releases the
/// isolate's locker so other threads may enter. Dropping the unlock re-acquires the locker (blocking if another
/// thread holds it) and then resumes the CPU timer.
///
/// The lock is mutably borrowed while unlocked, so the isolate cannot be used until the
/// locker is held again.
pub struct Unlock<'l, 'a, I: Isolate + 'a> {
    // Dropped after the locker is re-acquired.
    paused: PauseScope,
    lock: &'l mut Lock<'a, I>,
}

impl<'l, 'a, I: Isolate> Unlock<'l, 'a, I> {
    /// Pause the CPU timer charging the executor of `lock` and release its locker.
    pub fn new(lock: &'l mut Lock<'a, I>) -> Self {
        let paused = PauseScope::charging(lock.env.executor());
        let locker = lock.locker.take();
        drop(locker);
        lock.env.released();
        Self { paused, lock }
    }

    /// Returns `true` if the unlock paused a CPU timer charging the lock's executor.
    ///
    /// Nothing is charging the executor (and nothing is paused) if the thread entered
    /// another isolate after this lock.
    pub fn paused(&self) -> bool {
        self.paused.paused()
    }
}

impl<'a, I: Isolate + 'a> Drop for Unlock<'_, 'a, I> {
    fn drop(&mut self) {
        self.lock.locker = Some(self.lock.env.acquire());
    }
}
