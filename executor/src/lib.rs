//! Attribute CPU and wall time to isolates entered from many threads.
//!
//! An isolate is a single-threaded scripting environment: an engine-provided locker
//! guarantees that at most one thread runs inside of it at a time. Many threads may
//! compete for many isolates, and one thread may be nested inside of several isolates
//! at once (for example, when a callback from one isolate enters another). This crate
//! tracks which isolate each thread is inside of and how much time each isolate has
//! consumed.
//!
//! # Terminology
//!
//! Each isolate is wrapped in an [Environment], which owns the isolate handle and an
//! [Executor]. The `Executor` accumulates two totals:
//! - CPU time: time spent running inside the isolate, read from a per-thread CPU clock
//!   where the platform has one (see [ClockSource]).
//! - Wall time: elapsed time during which at least one thread was inside the isolate.
//!
//! Threads enter an isolate with a [Lock], which binds the executor as current
//! ([Scope]), starts a [WallTimer], acquires the locker and starts a [CpuTimer]. A
//! thread inside of an isolate may yield it to other threads with an [Unlock].
//!
//! The engine itself is abstracted by the [Isolate] trait, and the engine's quota
//! timer (which interrupts scripts that run too long) by the [Quota] trait. The quota
//! timer is paused whenever the isolate's CPU timer is, so time spent in other isolates
//! never counts against it.
//!
//! # Example
//!
//! ```rust
//! use isolate_executor::{mocks, Config, Environment};
//!
//! let env = Environment::new(Config::default(), mocks::Isolate::default(), ()).unwrap();
//! {
//!     let _lock = env.lock();
//!     // Run a script...
//! }
//! println!("cpu: {:?}, wall: {:?}", env.cpu_time(), env.wall_time());
//! ```
//!
//! # Status
//!
//! `isolate-executor` is **ALPHA** software and is not yet recommended for production
//! use. Developers should expect breaking changes and occasional instability.

use thiserror::Error;

mod clock;
pub use clock::ClockSource;
mod environment;
pub use environment::{Config, Environment};
mod executor;
pub use executor::Executor;
mod lock;
pub use lock::{Lock, Unlock};
mod metrics;
pub mod mocks;
mod scope;
pub use scope::Scope;
mod timer;
pub use timer::{CpuTimer, PauseScope, WallTimer};

/// Errors that can occur when creating an [Environment].
#[derive(Error, Debug)]
pub enum Error {
    #[error("thread cpu clock unavailable on this platform")]
    ThreadClockUnavailable,
    #[error("name invalid, must only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    InvalidName(String),
}

/// Interface that a scripting engine's isolate handle must implement.
///
/// Each associated type is a scoped guard: the resource it represents is held until the
/// guard is dropped. A [Lock] constructs them in the order `lock`, `enter`, `handles` and
/// drops them in reverse.
pub trait Isolate {
    /// Exclusive access to the isolate.
    ///
    /// Should be reentrant for the thread that holds it if callbacks may enter the
    /// isolate they were called from.
    type Locker<'a>
    where
        Self: 'a;

    /// The isolate entered as the thread's current isolate.
    type Entered<'a>
    where
        Self: 'a;

    /// A handle scope collecting engine handles created while the isolate is entered.
    type Handles<'a>
    where
        Self: 'a;

    /// Acquire the locker, blocking until no other thread holds it.
    fn lock(&self) -> Self::Locker<'_>;

    /// Enter the isolate. Only called while the locker is held.
    fn enter(&self) -> Self::Entered<'_>;

    /// Open a handle scope. Only called while the isolate is entered.
    fn handles(&self) -> Self::Handles<'_>;
}

/// Interface for the timer that enforces an isolate's execution quota.
///
/// Implementations are called while the executor's timer state is locked and must not
/// call back into the [Executor].
pub trait Quota: Send + Sync + 'static {
    /// Stop counting down: the isolate is no longer charged for this thread's time.
    fn pause(&self);

    /// Continue counting down.
    fn resume(&self);
}

/// No quota timer.
impl Quota for () {
    fn pause(&self) {}

    fn resume(&self) {}
}
