//! Thread abstraction, an abstraction of a logical cpu.
//!
//! ## The threading model
//!
//! A running scheduler consists of a collection of threads, each with their
//! own stack and local state. Threads can be named, and provide some
//! built-in support for low-level synchronization.
//!
//! Exactly one thread runs at a time. A thread gives the processor away by
//! calling [`yield_now`] (it stays runnable), [`block_current`] (it waits
//! until some other thread calls [`unblock`] on it) or by finishing. When
//! the scheduler was started with a timer, a tick may also force a yield
//! whenever the running thread has not disabled preemption.
pub mod queue;
pub mod scheduler;
mod switch;

use crate::SchedError;
use machine::{context, preempt::PreemptGuard, stack::Stack};
use std::{fmt, num::NonZeroU64};
use switch::Context;

/// A unique identifier of a thread.
///
/// Ids are handed out from 1 upwards and never reused within a scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub(crate) fn new(n: u64) -> Option<Self> {
        NonZeroU64::new(n).map(Self)
    }

    /// The id as an integer.
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable and waits in the ready queue.
    Ready,
    /// Thread is running.
    Running,
    /// Thread waits for an [`unblock`].
    Blocked,
    /// Thread is done; its stack is reclaimed at the next voluntary switch.
    Finished,
}

/// The body of a thread.
///
/// The body stays owned by the thread control block while it runs, so that
/// it is released together with the stack even when the thread leaves
/// through [`exit`].
pub(crate) trait Task {
    fn run(&mut self);
}

impl<F: FnOnce()> Task for Option<F> {
    fn run(&mut self) {
        if let Some(f) = self.take() {
            f()
        }
    }
}

/// A thread control block.
pub(crate) struct Thread {
    pub(crate) tid: ThreadId,
    pub(crate) name: Option<String>,
    pub(crate) state: ThreadState,
    pub(crate) context: Context,
    pub(crate) stack: Stack,
    pub(crate) task: Box<dyn Task>,
}

impl Thread {
    /// Builds a thread whose first resume enters `thread_start`.
    ///
    /// The control block is boxed so that its context keeps its address
    /// while the box moves between the scheduler's slots.
    pub(crate) fn new(
        tid: ThreadId,
        name: Option<String>,
        stack: Stack,
        task: Box<dyn Task>,
    ) -> Box<Self> {
        let mut th = Box::new(Self {
            tid,
            name,
            state: ThreadState::Ready,
            context: Context::default(),
            stack,
            task,
        });
        let payload = &th.context as *const Context as usize;
        let sp = context::prepare(&mut th.stack, thread_start, payload);
        th.context = Context::fresh(sp);
        th
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stack", &self.stack)
            .finish()
    }
}

/// The very beginning of a thread.
extern "C" fn thread_start(transfer: usize, payload: usize) -> ! {
    // SAFETY: `payload` is the address of the context of the boxed thread
    // that is being resumed, which is the current thread from now on.
    let own = unsafe { &*(payload as *const Context) };
    let Some(core) = scheduler::active() else {
        // Only a running scheduler resumes threads.
        std::process::abort()
    };
    let task = core.enter(own, transfer);

    // SAFETY: the task is owned by the current thread, which outlives this
    // call, and nothing else touches it while the thread runs.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
        (*task).run()
    }));
    if let Err(payload) = result {
        let _guard = PreemptGuard::new();
        core.record_panic(payload);
    }
    core.exit_current()
}

/// A handle to a spawned thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    tid: ThreadId,
}

impl ThreadHandle {
    pub(crate) fn new(tid: ThreadId) -> Self {
        Self { tid }
    }

    /// Gets the thread id.
    pub fn id(&self) -> ThreadId {
        self.tid
    }

    /// Gets the state of the thread in the scheduler running on this OS
    /// thread.
    ///
    /// Returns `None` once the thread has finished and been reclaimed, or if
    /// no scheduler is running.
    pub fn state(&self) -> Option<ThreadState> {
        let _guard = PreemptGuard::new();
        scheduler::active()?.state_of(self.tid)
    }

    /// Gets the name given to the thread at spawn time.
    pub fn name(&self) -> Option<String> {
        let _guard = PreemptGuard::new();
        scheduler::active()?.name_of(self.tid)
    }
}

/// A struct to build a new thread.
///
/// ```no_run
/// use sthread::thread::ThreadBuilder;
///
/// ThreadBuilder::new("printer")
///     .stack_size(64 * 1024)
///     .spawn(|| println!("hello from a small stack"));
/// sthread::start(false);
/// ```
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: Some(String::from(name)),
            stack_size: None,
        }
    }

    /// Overrides the scheduler's stack size for this thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Spawn the thread on the scheduler of this OS thread.
    ///
    /// Before [`start`](crate::start) is called, the thread goes to the
    /// scheduler that `start` will run.
    ///
    /// # Panics
    ///
    /// Panics if the stack size is invalid.
    pub fn spawn<F: FnOnce() + 'static>(self, f: F) -> ThreadHandle {
        self.try_spawn(f).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible version of [`ThreadBuilder::spawn`].
    pub fn try_spawn<F: FnOnce() + 'static>(self, f: F) -> Result<ThreadHandle, SchedError> {
        let _guard = PreemptGuard::new();
        match scheduler::active() {
            Some(core) => core.spawn(self.name, self.stack_size, Box::new(Some(f))),
            None => scheduler::with_pending(|s| self.spawn_in(s, f)),
        }
    }

    /// Spawn the thread on a scheduler that has not been started yet.
    pub fn spawn_in<F: FnOnce() + 'static>(
        self,
        scheduler: &scheduler::Scheduler,
        f: F,
    ) -> Result<ThreadHandle, SchedError> {
        let _guard = PreemptGuard::new();
        scheduler
            .core()
            .spawn(self.name, self.stack_size, Box::new(Some(f)))
    }
}

/// Spawns a thread that runs `entry(arg)`.
///
/// The thread starts in the ready queue of the scheduler running on this OS
/// thread, or of the scheduler [`start`](crate::start) will run if none runs
/// yet. Running out of memory for the stack aborts the process.
pub fn spawn<A: 'static>(entry: fn(A), arg: A) -> ThreadHandle {
    ThreadBuilder::default().spawn(move || entry(arg))
}

/// Gives the processor to the next ready thread.
///
/// The calling thread goes to the back of the ready queue. If no other
/// thread is ready, it simply continues. Outside a running scheduler this
/// does nothing.
pub fn yield_now() {
    let _guard = PreemptGuard::new();
    if let Some(core) = scheduler::active() {
        core.suspend();
    }
}

/// Blocks the calling thread until another thread calls [`unblock`] on it.
///
/// # Panics
///
/// Panics outside a running scheduler.
pub fn block_current() {
    let _guard = PreemptGuard::new();
    match scheduler::active() {
        Some(core) => core.block_current(),
        None => panic!("{}", SchedError::NotRunning),
    }
}

/// Makes the blocked thread `th` ready again.
///
/// The caller keeps running; `th` runs once its turn in the ready queue
/// comes.
///
/// # Panics
///
/// Panics if `th` is not blocked: unblocking a thread twice, or one that
/// never blocked, is a protocol violation.
pub fn unblock(th: ThreadHandle) {
    try_unblock(th).unwrap_or_else(|e| panic!("{e}"))
}

/// Fallible version of [`unblock`].
pub fn try_unblock(th: ThreadHandle) -> Result<(), SchedError> {
    let _guard = PreemptGuard::new();
    scheduler::active()
        .ok_or(SchedError::NotRunning)?
        .unblock(th.tid)
}

/// Gets the handle of the calling thread.
///
/// # Panics
///
/// Panics outside a running thread.
pub fn current_thread() -> ThreadHandle {
    let _guard = PreemptGuard::new();
    scheduler::active()
        .and_then(|core| core.current_tid())
        .map(ThreadHandle::new)
        .unwrap_or_else(|| panic!("{}", SchedError::NotRunning))
}

/// Finishes the calling thread, as if its entry function had returned.
///
/// Values living on the thread's stack are not dropped.
///
/// # Panics
///
/// Panics outside a running thread.
pub fn exit() -> ! {
    let _guard = PreemptGuard::new();
    match scheduler::active() {
        Some(core) if core.current_tid().is_some() => core.exit_current(),
        _ => panic!("{}", SchedError::NotRunning),
    }
}

/// Runs `f` with preemption disabled.
///
/// Timer ticks that arrive while `f` runs are dropped. Code that allocates,
/// prints or takes a lock shared with other threads must run this way when
/// the scheduler is preemptive.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    let _guard = PreemptGuard::new();
    f()
}
