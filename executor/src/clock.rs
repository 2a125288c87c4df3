//! Clocks used to measure CPU time.
//!
//! Where the platform exposes a per-thread CPU clock (a clock that only advances while
//! the thread is scheduled), CPU time is read from it. Elsewhere the monotonic steady
//! clock stands in.

use crate::Error;
use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Whether a per-thread CPU clock can be read on this target.
        const THREAD_CLOCK: bool = true;

        type ThreadClockId = libc::clockid_t;

        /// Resolve the CPU clock of the calling thread.
        ///
        /// The returned id stays readable from any thread for as long as the calling
        /// thread is alive.
        fn thread_clock() -> ThreadClockId {
            let mut id: libc::clockid_t = 0;
            // SAFETY: `pthread_self` is always a valid handle for the calling thread and
            // `id` is a valid out pointer.
            let rc = unsafe { libc::pthread_getcpuclockid(libc::pthread_self(), &mut id) };
            assert_eq!(rc, 0, "failed to resolve thread cpu clock");
            id
        }

        fn read_thread_clock(id: ThreadClockId) -> Duration {
            let mut ts = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            // SAFETY: `ts` is a valid out pointer.
            let rc = unsafe { libc::clock_gettime(id, &mut ts) };
            assert_eq!(rc, 0, "failed to read thread cpu clock");
            Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
        }
    } else {
        /// Whether a per-thread CPU clock can be read on this target.
        const THREAD_CLOCK: bool = false;

        type ThreadClockId = ();

        fn thread_clock() -> ThreadClockId {
            unreachable!("thread cpu clock unavailable")
        }

        fn read_thread_clock(_: ThreadClockId) -> Duration {
            unreachable!("thread cpu clock unavailable")
        }
    }
}

/// Process-wide origin of the steady clock.
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Read the steady clock as an offset from [EPOCH].
fn steady() -> Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// Source of CPU time for an executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Per-thread CPU clock. Time the thread spends blocked or descheduled is not counted.
    Thread,

    /// Monotonic steady clock. Every elapsed nanosecond inside the isolate is counted.
    Steady,
}

impl ClockSource {
    /// Returns `true` if this source can be read on the current target.
    pub const fn available(self) -> bool {
        match self {
            Self::Thread => THREAD_CLOCK,
            Self::Steady => true,
        }
    }

    /// Returns the most precise source available on the current target.
    pub const fn preferred() -> Self {
        if THREAD_CLOCK {
            Self::Thread
        } else {
            Self::Steady
        }
    }

    /// Ensure this source can be read on the current target.
    pub(crate) fn validate(self) -> Result<(), Error> {
        if !self.available() {
            return Err(Error::ThreadClockUnavailable);
        }
        Ok(())
    }
}

impl Default for ClockSource {
    fn default() -> Self {
        Self::preferred()
    }
}

/// A CPU clock bound to the thread that resolved it.
///
/// Reads from other threads observe the owning thread's clock, which lets observers add
/// the in-flight delta of a running timer.
#[derive(Clone, Copy, Debug)]
pub(crate) enum CpuClock {
    Thread(ThreadClockId),
    Steady,
}

impl CpuClock {
    /// Resolve the clock of the calling thread for `source`.
    pub(crate) fn current(source: ClockSource) -> Self {
        match source {
            ClockSource::Thread if THREAD_CLOCK => Self::Thread(thread_clock()),
            _ => Self::Steady,
        }
    }

    /// Read the clock.
    pub(crate) fn now(&self) -> Duration {
        match *self {
            Self::Thread(id) => read_thread_clock(id),
            Self::Steady => steady(),
        }
    }
}
