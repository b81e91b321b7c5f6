//! # sthread: user-level cooperative threads
//!
//! **sthread** runs many logical threads on a single OS thread. Each sthread
//! owns a stack of its own, and exactly one of them executes at any instant;
//! control moves between them only when the running sthread asks for it
//! ([`thread::yield_now`], [`thread::block_current`], returning from its entry
//! function) or, when preemption is enabled, when a timer tick arrives.
//!
//! The crate is organized the way a small kernel is:
//!
//! - [`thread`]: thread control blocks, the run queues and the scheduler
//!   itself.
//! - [`sync`]: blocking primitives built on top of the scheduler: a FIFO
//!   fair [`Semaphore`] and a [`BoundedBuffer`] for producer/consumer
//!   pipelines.
//!
//! The machine-dependent pieces (register save/restore, stacks, the
//! preemption guard and the tick source) live in the `machine` crate.
//!
//! ## Getting started
//!
//! ```no_run
//! use sthread::thread;
//!
//! fn worker(arg: u64) {
//!     for i in 0..arg {
//!         println!("worker {arg}: {i}");
//!         thread::yield_now();
//!     }
//! }
//!
//! thread::spawn(worker, 5);
//! thread::spawn(worker, 7);
//! sthread::start(false);
//! ```
//!
//! [`start`] never returns: once every sthread has finished the process exits
//! with [`ExitStatus::AllFinished`]; if the remaining sthreads are all blocked
//! it reports the deadlock and exits with [`ExitStatus::Deadlock`]. Embedders
//! that want to keep control use [`Scheduler::run`] instead.
//!
//! [`Semaphore`]: sync::Semaphore
//! [`BoundedBuffer`]: sync::BoundedBuffer
//! [`Scheduler::run`]: thread::scheduler::Scheduler::run

#![deny(missing_docs)]

pub mod sync;
pub mod thread;

pub use thread::scheduler::{Scheduler, SchedulerBuilder, Termination, start};

use thread::{ThreadId, ThreadState};

/// Errors reported by the scheduler and the synchronization primitives.
///
/// Each fallible operation comes in a `try_*` flavor that returns this error.
/// The plain flavor treats the error as a protocol violation and panics.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// A scheduler is already running on this OS thread.
    #[error("a scheduler is already running on this OS thread")]
    AlreadyRunning,
    /// The operation needs a running scheduler.
    #[error("no scheduler is running on this OS thread")]
    NotRunning,
    /// `unblock` was called on a thread that is not blocked.
    #[error("thread {tid} is not blocked (state: {state:?})")]
    NotBlocked {
        /// The thread that was named.
        tid: ThreadId,
        /// The state it was found in.
        state: ThreadState,
    },
    /// The thread has finished and has been reclaimed, or never existed.
    #[error("no such thread: {0}")]
    NoSuchThread(ThreadId),
    /// A semaphore cannot start with a negative count.
    #[error("semaphore initialized with a negative count: {0}")]
    NegativeCount(i64),
    /// The requested stack size is unusable.
    #[error("invalid stack size: {0:#x} bytes")]
    InvalidStackSize(usize),
    /// A preemption quantum must be non-zero.
    #[error("invalid preemption quantum: {0:?}")]
    InvalidQuantum(std::time::Duration),
    /// A bounded buffer must hold at least one record, and its capacity must
    /// fit a semaphore count.
    #[error("invalid bounded buffer capacity: {0}")]
    InvalidCapacity(usize),
    /// The preemption timer could not be started.
    #[error("timer error: {0}")]
    Timer(#[from] std::io::Error),
}

/// Process exit statuses used by [`start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum ExitStatus {
    /// Every thread ran to completion.
    AllFinished = 0,
    /// Threads remained, but all of them were blocked.
    Deadlock = 1,
}
