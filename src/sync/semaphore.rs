//! # Semaphore.
//!
//! A **semaphore** regulates access to a finite set of resources. It keeps a
//! count of available permits; [`Semaphore::wait`] takes one, blocking the
//! calling thread while none is left, and [`Semaphore::signal`] gives one
//! back and wakes the longest waiting thread.
//!
//! A woken thread is only made ready: another thread that runs before it may
//! take the permit first. The woken thread then checks the count again and
//! goes back to the end of the wait queue, so no permit is ever handed out
//! twice.
//!
//! A semaphore initialized with zero permits serves as an event: one thread
//! waits on it and another signals when the event has occurred.
//!
//! ```
//! use std::rc::Rc;
//! use sthread::{Scheduler, Termination, sync::Semaphore, thread::ThreadBuilder};
//!
//! let scheduler = Scheduler::new();
//! let done = Rc::new(Semaphore::new(0));
//! let d = done.clone();
//! ThreadBuilder::new("waiter").spawn_in(&scheduler, move || d.wait()).unwrap();
//! ThreadBuilder::new("signaler").spawn_in(&scheduler, move || done.signal()).unwrap();
//! assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
//! ```

use crate::{
    SchedError,
    thread::{self, ThreadHandle, queue::Queue},
};
use machine::preempt::PreemptGuard;
use std::cell::{Cell, RefCell};

/// Counting semaphore with a FIFO wait queue.
pub struct Semaphore {
    count: Cell<i64>,
    waiters: RefCell<Queue>,
}

impl Semaphore {
    /// Creates a new semaphore initialized with `permits` permits.
    ///
    /// # Panics
    ///
    /// Panics if `permits` is negative.
    pub fn new(permits: i64) -> Self {
        Self::try_new(permits).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible version of [`Semaphore::new`].
    pub fn try_new(permits: i64) -> Result<Self, SchedError> {
        if permits < 0 {
            return Err(SchedError::NegativeCount(permits));
        }
        Ok(Self {
            count: Cell::new(permits),
            waiters: RefCell::new(Queue::new()),
        })
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// # Panics
    ///
    /// Panics if the calling code is not running in a thread and would have
    /// to block.
    pub fn wait(&self) {
        let _guard = PreemptGuard::new();
        while self.count.get() == 0 {
            let me = thread::current_thread().id();
            {
                let mut waiters = self.waiters.borrow_mut();
                if !waiters.contains(me) {
                    waiters.append(me);
                }
            }
            thread::block_current();
        }
        self.count.set(self.count.get() - 1);
    }

    /// Acquires a permit if one is available, without blocking.
    pub fn try_wait(&self) -> bool {
        let _guard = PreemptGuard::new();
        match self.count.get() {
            0 => false,
            n => {
                self.count.set(n - 1);
                true
            }
        }
    }

    /// Waits for a permit and returns a guard that gives it back when
    /// dropped.
    pub fn permit(&self) -> SemaphorePermit<'_> {
        self.wait();
        SemaphorePermit { sema: self }
    }

    /// Releases a permit back to the semaphore.
    ///
    /// If threads are blocked in [`Semaphore::wait`], the one that has waited
    /// longest is made ready. The caller keeps running.
    pub fn signal(&self) {
        let _guard = PreemptGuard::new();
        self.count.set(self.count.get() + 1);
        loop {
            let Some(tid) = self.waiters.borrow_mut().take_front() else {
                break;
            };
            // A waiter that somebody else already woke is skipped.
            if thread::try_unblock(ThreadHandle::new(tid)).is_ok() {
                break;
            }
        }
    }

    /// The number of available permits.
    pub fn value(&self) -> i64 {
        self.count.get()
    }

    /// The number of threads waiting for a permit.
    pub fn waiters(&self) -> usize {
        let _guard = PreemptGuard::new();
        self.waiters.borrow().len()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
///
/// This structure is created by the [`permit`] method on [`Semaphore`].
///
/// [`permit`]: Semaphore::permit
#[must_use = "the permit is released as soon as it is dropped"]
pub struct SemaphorePermit<'a> {
    sema: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}
