//! Isolate environments and their configuration.

use crate::{metrics::Metrics, ClockSource, Error, Executor, Isolate, Lock, Quota, Scope};
use prometheus_client::registry::Registry;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{trace, warn};

/// Configuration for an [Environment].
#[derive(Clone, Debug)]
pub struct Config {
    /// Label used in logs and as the metrics prefix.
    ///
    /// Must be non-empty and only contain alphanumeric, dash ('-'), or underscore ('_')
    /// characters.
    pub name: String,

    /// Source of CPU time.
    ///
    /// Defaults to the per-thread CPU clock where the platform exposes one. Selecting
    /// [ClockSource::Steady] counts every nanosecond spent inside the isolate, including
    /// time the thread is descheduled.
    pub clock: ClockSource,

    /// Log a warning when acquiring the isolate's locker blocks for longer than this.
    ///
    /// If not set, contention is only reported through metrics.
    pub contention_warning: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("isolate"),
            clock: ClockSource::default(),
            contention_warning: None,
        }
    }
}

impl Config {
    /// Ensure the configuration can be used on this platform.
    pub fn validate(&self) -> Result<(), Error> {
        let valid = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidName(self.name.clone()));
        }
        self.clock.validate()
    }
}

/// An isolate paired with the [Executor] that attributes time to it.
pub struct Environment<I: Isolate> {
    cfg: Config,
    isolate: I,
    executor: Arc<Executor>,
    metrics: Metrics,
}

impl<I: Isolate> Environment<I> {
    /// Create an environment for `isolate` whose quota timer is `quota`.
    ///
    /// The executor that is current on the calling thread becomes the default executor of
    /// the new environment (see [Executor]).
    pub fn new(cfg: Config, isolate: I, quota: impl Quota) -> Result<Self, Error> {
        cfg.validate()?;
        let executor = Executor::new(cfg.name.clone(), cfg.clock, Box::new(quota));
        Ok(Self {
            cfg,
            isolate,
            executor,
            metrics: Metrics::default(),
        })
    }

    /// Label of the environment.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// The isolate handle.
    pub fn isolate(&self) -> &I {
        &self.isolate
    }

    /// The executor attributing time to this isolate.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// CPU time consumed inside the isolate so far.
    pub fn cpu_time(&self) -> Duration {
        self.executor.cpu_time()
    }

    /// Wall time during which the isolate was entered so far.
    pub fn wall_time(&self) -> Duration {
        self.executor.wall_time()
    }

    /// Bind this environment's executor as current without locking the isolate.
    pub fn scope(&self) -> Scope {
        Scope::new(&self.executor)
    }

    /// Enter the isolate (see [Lock]).
    pub fn lock(&self) -> Lock<'_, I> {
        Lock::new(self)
    }

    /// Register this environment's metrics under a sub-registry named after it.
    pub fn register(&self, registry: &mut Registry) {
        let registry = registry.sub_registry_with_prefix(self.cfg.name.as_str());
        self.metrics.register(registry);
    }

    /// Acquire the isolate's locker, recording how long the acquisition blocked.
    pub(crate) fn acquire(&self) -> I::Locker<'_> {
        let start = Instant::now();
        let locker = self.isolate.lock();
        let waited = start.elapsed();
        self.metrics.locks.inc();
        self.metrics.lock_wait.observe(waited.as_secs_f64());
        match self.cfg.contention_warning {
            Some(threshold) if waited > threshold => {
                warn!(name = %self.cfg.name, ?waited, "isolate locker contended");
            }
            _ => trace!(name = %self.cfg.name, ?waited, "acquired isolate locker"),
        }
        locker
    }

    /// Record that a locker was released by an unlock.
    pub(crate) fn released(&self) {
        self.metrics.unlocks.inc();
        trace!(name = %self.cfg.name, "released isolate locker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "with space", "dot.ted", "slash/ed"] {
            let cfg = Config {
                name: name.into(),
                ..Default::default()
            };
            assert!(matches!(cfg.validate(), Err(Error::InvalidName(n)) if n == name));
            assert!(Environment::new(cfg, mocks::Isolate::default(), ()).is_err());
        }
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_thread_clock_unavailable() {
        let cfg = Config {
            clock: ClockSource::Thread,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::ThreadClockUnavailable)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_thread_clock_accepted() {
        let cfg = Config {
            clock: ClockSource::Thread,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(Config::default().clock, ClockSource::Thread);
        let env = Environment::new(cfg, mocks::Isolate::default(), ()).unwrap();
        assert_eq!(env.executor().clock(), ClockSource::Thread);
    }

    #[test]
    fn test_metrics_registered() {
        let cfg = Config {
            name: "guest".into(),
            ..Default::default()
        };
        let env = Environment::new(cfg, mocks::Isolate::default(), ()).unwrap();
        let mut registry = Registry::default();
        env.register(&mut registry);
        {
            let mut lock = env.lock();
            let _unlock = lock.unlock();
        }

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("guest_locks_total 2"));
        assert!(buffer.contains("guest_unlocks_total 1"));
        assert!(buffer.contains("guest_lock_wait_count 2"));
    }
}
