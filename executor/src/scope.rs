//! Binding the current executor of a thread.

use crate::{executor::CURRENT, Executor};
use std::{marker::PhantomData, sync::Arc};

/// Binds the calling thread's current executor for the duration of a scope.
///
/// A `Scope` only affects attribution ([Executor::current]). It neither locks the isolate
/// nor touches any timer: use [crate::Lock] to actually enter an isolate.
pub struct Scope {
    last: Option<Arc<Executor>>,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    /// Make `executor` current until the scope is dropped.
    pub fn new(executor: &Arc<Executor>) -> Self {
        let last = CURRENT.with(|current| current.replace(Some(executor.clone())));
        Self {
            last,
            _not_send: PhantomData,
        }
    }

    /// Make the default executor of `executor` current until the scope is dropped.
    ///
    /// Used when an isolate is torn down from its host's thread, so the work is
    /// attributed to the host rather than to the isolate going away.
    pub fn default_of(executor: &Arc<Executor>) -> Self {
        Self::new(&executor.default_executor())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        CURRENT.with(|current| *current.borrow_mut() = self.last.take());
    }
}
