//! Test tooling for sthread.
//!
//! The attribute macros run a test body as a thread of a fresh scheduler
//! ([`assert_termination`]) and check that nothing leaked
//! ([`validate_reclaim`]). [`Recorder`] collects what the threads of a test
//! observed, in order.
extern crate grading_derive;

pub use grading_derive::*;

use std::{cell::RefCell, rc::Rc};
use sthread::thread::without_preemption;
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG`. Calling it more than once is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The number of thread stacks alive on this OS thread.
pub fn live_stacks() -> usize {
    machine::stack::live_stacks()
}

/// A shared, append-only log of events.
///
/// Clones share the same log. Appending never yields, even under a
/// preemptive scheduler.
#[derive(Debug)]
pub struct Recorder<T>(Rc<RefCell<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }
}

impl<T: Clone> Recorder<T> {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event`.
    pub fn record(&self, event: T) {
        without_preemption(|| self.0.borrow_mut().push(event))
    }

    /// A copy of the events recorded so far.
    pub fn events(&self) -> Vec<T> {
        without_preemption(|| self.0.borrow().clone())
    }

    /// The number of events recorded so far.
    pub fn len(&self) -> usize {
        without_preemption(|| self.0.borrow().len())
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
