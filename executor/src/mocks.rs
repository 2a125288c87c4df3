//! A mock isolate and quota timer for testing.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, ThreadId},
};

/// Owner of a mock isolate's locker.
#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// An isolate guarded by a reentrant locker.
///
/// Like an engine locker, the thread holding the isolate may lock it again (for example,
/// from a callback) while other threads block until it is fully released.
#[derive(Debug, Default)]
pub struct Isolate {
    owner: Mutex<Owner>,
    released: Condvar,
    entered: AtomicUsize,
}

impl Isolate {
    /// Returns `true` if any thread holds the locker.
    pub fn is_held(&self) -> bool {
        self.owner.lock().unwrap().thread.is_some()
    }

    /// Number of isolate scopes currently entered.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl crate::Isolate for Isolate {
    type Locker<'a> = Locker<'a>;
    type Entered<'a> = Entered<'a>;
    type Handles<'a> = ();

    fn lock(&self) -> Locker<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap();
        while owner.thread.is_some_and(|thread| thread != me) {
            owner = self.released.wait(owner).unwrap();
        }
        owner.thread = Some(me);
        owner.depth += 1;
        Locker { isolate: self }
    }

    fn enter(&self) -> Entered<'_> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        Entered { isolate: self }
    }

    fn handles(&self) -> Self::Handles<'_> {}
}

/// Exclusive access to a mock [Isolate].
#[derive(Debug)]
pub struct Locker<'a> {
    isolate: &'a Isolate,
}

impl Drop for Locker<'_> {
    fn drop(&mut self) {
        let mut owner = self.isolate.owner.lock().unwrap();
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.isolate.released.notify_one();
        }
    }
}

/// An entered mock [Isolate].
#[derive(Debug)]
pub struct Entered<'a> {
    isolate: &'a Isolate,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.isolate.entered.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Call made on a mock [Quota].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Pause,
    Resume,
}

/// A quota timer that records every pause and resume.
///
/// Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct Quota {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Quota {
    /// Calls received so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl crate::Quota for Quota {
    fn pause(&self) {
        self.events.lock().unwrap().push(Event::Pause);
    }

    fn resume(&self) {
        self.events.lock().unwrap().push(Event::Resume);
    }
}
