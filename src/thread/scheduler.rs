//! Thread scheduler.
//!
//! The scheduler owns every thread that has not been reclaimed yet. Exactly
//! one of them is *current*; the others sit in the thread table and their
//! ids are queued either in the ready queue, which is served strictly FIFO,
//! or in the blocked queue, until an [`unblock`](super::unblock) moves them
//! back.
//!
//! A scheduler runs on the OS thread that calls [`Scheduler::run`]. That
//! call becomes the *boot context*: it hands the processor to the first
//! ready thread and gets it back only when nothing can run anymore, either
//! because every thread finished or because the remaining ones are all
//! blocked.
//!
//! Every decision is taken with preemption disabled. A timer tick that
//! arrives while a thread holds a [`PreemptGuard`] is dropped.

use super::{
    Task, Thread, ThreadBuilder, ThreadHandle, ThreadId, ThreadState,
    queue::Queue,
    switch::{self, Context, Switch},
};
use crate::{ExitStatus, SchedError};
use machine::{
    preempt::PreemptGuard,
    stack::{self, STACK_SIZE, Stack},
    timer::Timer,
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    num::NonZeroU64,
    time::Duration,
};
use tracing::{debug, error, info, trace};

/// The preemption quantum used when none is configured.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug)]
struct Config {
    stack_size: usize,
    quantum: Duration,
    preemptive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE,
            quantum: DEFAULT_QUANTUM,
            preemptive: false,
        }
    }
}

/// How a scheduler run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Every thread ran to completion.
    AllFinished,
    /// No thread was ready but some were blocked.
    Deadlock {
        /// The blocked threads, in the order they blocked.
        blocked: Vec<ThreadHandle>,
    },
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::AllFinished => write!(f, "All threads completed, exiting."),
            Termination::Deadlock { blocked } => {
                write!(f, "The system is deadlocked! Blocked threads:")?;
                for th in blocked {
                    write!(f, " {}", th.id())?;
                }
                Ok(())
            }
        }
    }
}

impl Termination {
    /// The process exit status that reports this termination.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Termination::AllFinished => ExitStatus::AllFinished,
            Termination::Deadlock { .. } => ExitStatus::Deadlock,
        }
    }
}

enum Outcome {
    AllFinished,
    Deadlock(Vec<ThreadId>),
    Panicked,
}

struct State {
    current: Option<ThreadId>,
    /// Every live thread, the current one included. A thread leaves the
    /// table only when it finishes.
    threads: BTreeMap<ThreadId, Box<Thread>>,
    ready: Queue,
    blocked: Queue,
    /// Finished threads whose stacks may still be in use by the switch away
    /// from them. Released at the next voluntary switch.
    zombies: Vec<Box<Thread>>,
    outcome: Option<Outcome>,
    panic: Option<Box<dyn Any + Send>>,
}

impl State {
    fn current_mut(&mut self) -> Option<&mut Thread> {
        let tid = self.current?;
        self.threads.get_mut(&tid).map(|th| &mut **th)
    }

    fn decide(&self) -> Outcome {
        if self.panic.is_some() {
            Outcome::Panicked
        } else if self.blocked.is_empty() {
            info!("all threads completed");
            Outcome::AllFinished
        } else {
            let blocked = self.blocked.iter().collect::<Vec<_>>();
            error!(?blocked, "the system is deadlocked");
            Outcome::Deadlock(blocked)
        }
    }
}

/// Why the current execution gives the processor away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cause {
    /// The thread asked for it: yield, block or exit.
    Voluntary,
    /// A timer tick interrupted it. The interrupted code may be in the
    /// middle of an allocation, so nothing on this path touches the heap.
    Tick,
}

/// The scheduler proper, pinned in memory while it runs.
pub(crate) struct Core {
    boot: Context,
    state: RefCell<State>,
    config: Config,
    next_tid: Cell<NonZeroU64>,
}

// Every method below expects preemption to be disabled by its caller.
impl Core {
    fn new(config: Config) -> Self {
        Self {
            boot: Context::default(),
            state: RefCell::new(State {
                current: None,
                threads: BTreeMap::new(),
                ready: Queue::new(),
                blocked: Queue::new(),
                zombies: Vec::new(),
                outcome: None,
                panic: None,
            }),
            config,
            next_tid: Cell::new(NonZeroU64::MIN),
        }
    }

    pub(crate) fn spawn(
        &self,
        name: Option<String>,
        stack_size: Option<usize>,
        task: Box<dyn Task>,
    ) -> Result<ThreadHandle, SchedError> {
        let size = stack_size.unwrap_or(self.config.stack_size);
        let stack = Stack::new(size).ok_or(SchedError::InvalidStackSize(size))?;
        let tid = ThreadId(self.next_tid.get());
        self.next_tid.set(tid.0.saturating_add(1));

        let th = Thread::new(tid, name, stack, task);
        debug!(%tid, name = ?th.name, stack = th.stack.size(), "thread spawned");
        let mut st = self.state.borrow_mut();
        st.threads.insert(tid, th);
        // A tick re-queues the running thread; the ready queue must never
        // grow on that path.
        let live = st.threads.len();
        st.ready.reserve(live);
        st.ready.append(tid);
        Ok(ThreadHandle::new(tid))
    }

    pub(crate) fn current_tid(&self) -> Option<ThreadId> {
        self.state.borrow().current
    }

    fn with_thread<R>(&self, tid: ThreadId, f: impl FnOnce(&Thread) -> R) -> Option<R> {
        self.state.borrow().threads.get(&tid).map(|th| f(th))
    }

    pub(crate) fn state_of(&self, tid: ThreadId) -> Option<ThreadState> {
        self.with_thread(tid, |th| th.state)
    }

    pub(crate) fn name_of(&self, tid: ThreadId) -> Option<String> {
        self.with_thread(tid, |th| th.name.clone()).flatten()
    }

    /// Decides what runs next.
    ///
    /// The current thread is filed according to its state: a running one
    /// goes to the back of the ready queue, a blocked one to the blocked
    /// queue, and a finished one becomes a zombie. Returns `None` when the
    /// caller should simply continue, either because it is the only
    /// runnable thread or because it is the boot context and nothing is left
    /// to run.
    fn schedule(&self, cause: Cause) -> Option<Switch> {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        let prev = st.current.take();
        let save: *const Context = match prev {
            Some(tid) => {
                let Some(th) = st.threads.get_mut(&tid) else {
                    unreachable!("thread {tid} is current but not in the thread table")
                };
                if !th.stack.is_intact() {
                    error!(%tid, name = ?th.name, "stack overflow detected");
                    std::process::abort();
                }
                let state = th.state;
                if state == ThreadState::Running && st.ready.is_empty() && st.panic.is_none() {
                    st.current = prev;
                    return None;
                }
                let ctx: *const Context = &th.context;
                match state {
                    ThreadState::Running | ThreadState::Ready => {
                        th.state = ThreadState::Ready;
                        st.ready.append(tid);
                    }
                    ThreadState::Blocked => st.blocked.append(tid),
                    ThreadState::Finished => {
                        debug_assert_eq!(cause, Cause::Voluntary);
                        st.zombies.extend(st.threads.remove(&tid));
                    }
                }
                ctx
            }
            None => &self.boot,
        };

        let next = match st.panic {
            Some(_) => None,
            None => st.ready.take_front(),
        };
        let next: *const Context = match next.and_then(|tid| st.threads.get_mut(&tid)) {
            Some(th) => {
                if cause == Cause::Voluntary {
                    trace!(from = ?prev, to = %th.tid, "context switch");
                }
                th.state = ThreadState::Running;
                st.current = Some(th.tid);
                &th.context
            }
            None => {
                st.outcome = Some(st.decide());
                // The boot context itself found nothing to run.
                prev?;
                &self.boot
            }
        };
        Some(Switch {
            save,
            next,
            transfer: prev.map_or(0, |tid| tid.as_u64() as usize),
        })
    }

    /// Releases the threads that finished since the last voluntary switch.
    fn reap(&self) {
        let zombies = std::mem::take(&mut self.state.borrow_mut().zombies);
        drop(zombies);
    }

    /// Runs the post-switch bookkeeping of a context that just got resumed.
    fn resumed(&self, own: &Context, transfer: usize, cause: Cause) {
        if cause == Cause::Voluntary {
            self.reap();
            trace!(prev = ?ThreadId::new(transfer as u64), "resumed");
        }
        switch::restore(own);
    }

    fn switch_away(&self, cause: Cause) {
        let Some(switch) = self.schedule(cause) else {
            return;
        };
        let own = switch.save;
        // SAFETY: preemption is disabled, `schedule` released its borrow and
        // both contexts belong to threads owned by this core.
        let transfer = unsafe { switch.perform() };
        // SAFETY: we were resumed, so our control block is alive.
        self.resumed(unsafe { &*own }, transfer, cause);
    }

    /// Suspends the current thread and runs the scheduler.
    ///
    /// Returns once the current thread is resumed, which is immediately if
    /// no other thread is ready.
    pub(crate) fn suspend(&self) {
        self.switch_away(Cause::Voluntary);
    }

    /// Like [`Core::suspend`], from a timer tick.
    fn preempt(&self) {
        self.switch_away(Cause::Tick);
    }

    /// The first steps of a fresh thread.
    ///
    /// Returns the body of the current thread, with the thread's own
    /// preemption depth reinstated.
    pub(crate) fn enter(&self, own: &Context, transfer: usize) -> *mut dyn Task {
        self.reap();
        let task: *mut dyn Task = {
            let mut st = self.state.borrow_mut();
            let Some(th) = st.current_mut() else {
                unreachable!("a thread was started without being current")
            };
            debug!(tid = %th.tid, prev = ?ThreadId::new(transfer as u64), "thread started");
            &mut *th.task as *mut dyn Task
        };
        switch::restore(own);
        task
    }

    pub(crate) fn block_current(&self) {
        {
            let mut st = self.state.borrow_mut();
            let Some(th) = st.current_mut() else {
                panic!("{}", SchedError::NotRunning)
            };
            th.state = ThreadState::Blocked;
            debug!(tid = %th.tid, "thread blocked");
        }
        self.suspend();
    }

    pub(crate) fn unblock(&self, tid: ThreadId) -> Result<(), SchedError> {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        let Some(th) = st.threads.get_mut(&tid) else {
            return Err(SchedError::NoSuchThread(tid));
        };
        if th.state != ThreadState::Blocked {
            return Err(SchedError::NotBlocked {
                tid,
                state: th.state,
            });
        }
        assert!(
            st.blocked.remove(tid),
            "thread {tid} is blocked but not in the blocked queue"
        );
        th.state = ThreadState::Ready;
        st.ready.append(tid);
        debug!(%tid, "thread unblocked");
        Ok(())
    }

    /// Finishes the current thread and switches away for good.
    pub(crate) fn exit_current(&self) -> ! {
        let _guard = PreemptGuard::new();
        if let Some(th) = self.state.borrow_mut().current_mut() {
            th.state = ThreadState::Finished;
            info!(tid = %th.tid, name = ?th.name, "thread {} has finished executing", th.tid);
        }
        self.suspend();
        unreachable!("a finished thread was resumed")
    }

    /// Remembers the first panic raised by a thread.
    ///
    /// The scheduler stops at the next switch and `run` re-raises it.
    pub(crate) fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let mut st = self.state.borrow_mut();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Box<dyn Any>");
        let tid = st.current;
        error!(?tid, "thread panicked: {msg}");
        if st.panic.is_none() {
            st.panic = Some(payload);
        }
    }

    /// Collects the result of a finished run and the threads left behind.
    fn conclude(&self) -> (Result<Termination, Box<dyn Any + Send>>, Vec<Box<Thread>>) {
        let mut st = self.state.borrow_mut();
        let outcome = match st.outcome.take() {
            Some(outcome) => outcome,
            None => st.decide(),
        };
        let result = match outcome {
            Outcome::AllFinished => Ok(Termination::AllFinished),
            Outcome::Deadlock(blocked) => Ok(Termination::Deadlock {
                blocked: blocked.into_iter().map(ThreadHandle::new).collect(),
            }),
            Outcome::Panicked => Err(st
                .panic
                .take()
                .unwrap_or_else(|| Box::new("thread panicked") as Box<dyn Any + Send>)),
        };
        st.current = None;
        st.ready = Queue::new();
        st.blocked = Queue::new();
        let mut leftovers = std::mem::take(&mut st.zombies);
        leftovers.extend(std::mem::take(&mut st.threads).into_values());
        (result, leftovers)
    }
}

thread_local! {
    static ACTIVE: Cell<*const Core> = const { Cell::new(std::ptr::null()) };
    static PENDING: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// The core running on this OS thread.
pub(crate) fn active() -> Option<&'static Core> {
    // SAFETY: `ACTIVE` is only set while `Scheduler::run` keeps the core
    // alive, and cleared before the core can go away.
    ACTIVE.with(|active| unsafe { active.get().as_ref() })
}

/// Marks a core as running on this OS thread for as long as it lives.
struct Activation;

impl Activation {
    fn install(core: &Core) -> Result<Self, SchedError> {
        ACTIVE.with(|active| {
            if !active.get().is_null() {
                return Err(SchedError::AlreadyRunning);
            }
            active.set(core);
            Ok(Self)
        })
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(std::ptr::null()));
    }
}

/// Runs `f` on the scheduler that [`start`] will run on this OS thread.
pub(crate) fn with_pending<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    PENDING.with(|pending| f(pending.borrow_mut().get_or_insert_with(Scheduler::new)))
}

/// Called on every timer tick, in signal context.
fn timer_tick() {
    if PreemptGuard::is_guarded() {
        return;
    }
    let _guard = PreemptGuard::new();
    if let Some(core) = active() {
        core.preempt();
    }
}

/// A thread scheduler.
///
/// Threads are spawned into a scheduler before it runs, or from inside its
/// threads while it runs; [`Scheduler::run`] then executes all of them on
/// the calling OS thread.
///
/// ```
/// use sthread::{Scheduler, Termination, thread};
///
/// let scheduler = Scheduler::new();
/// scheduler.spawn(|n: u32| {
///     for _ in 0..n {
///         thread::yield_now();
///     }
/// }, 3);
/// assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
/// ```
pub struct Scheduler {
    core: Box<Core>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a cooperative scheduler with the default configuration.
    pub fn new() -> Self {
        Self {
            core: Box::new(Core::new(Config::default())),
        }
    }

    /// Starts configuring a scheduler.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    pub(crate) fn core(&self) -> &Core {
        &self.core
    }

    /// Spawns a thread that runs `entry(arg)` once the scheduler runs.
    pub fn spawn<A: 'static>(&self, entry: fn(A), arg: A) -> ThreadHandle {
        ThreadBuilder::default()
            .spawn_in(self, move || entry(arg))
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Runs threads until none can run anymore.
    ///
    /// Returns [`Termination::AllFinished`] once every thread has finished,
    /// or [`Termination::Deadlock`] if the threads left are all blocked.
    /// Threads left behind are reclaimed before returning; values on their
    /// stacks are not dropped.
    ///
    /// # Panics
    ///
    /// If a thread panics, the scheduler stops at once and the panic is
    /// resumed here.
    pub fn run(self) -> Result<Termination, SchedError> {
        let core = &*self.core;
        let guard = PreemptGuard::new();
        let activation = Activation::install(core)?;
        let timer = match core.config.preemptive {
            true => Some(Timer::start(core.config.quantum, timer_tick)?),
            false => None,
        };
        debug!(
            threads = core.state.borrow().threads.len(),
            quantum = ?timer.as_ref().map(Timer::quantum),
            "scheduler started"
        );

        if let Some(switch) = core.schedule(Cause::Voluntary) {
            // SAFETY: preemption is disabled and the boot context lives in
            // this core until the run is over.
            let transfer = unsafe { switch.perform() };
            core.resumed(&core.boot, transfer, Cause::Voluntary);
        }

        drop(timer);
        drop(activation);
        let (result, leftovers) = core.conclude();
        drop(leftovers);
        drop(guard);
        match result {
            Ok(termination) => Ok(termination),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Runs the scheduler and exits the process with its [`ExitStatus`].
    ///
    /// How the run ended is reported on standard error before exiting.
    ///
    /// With `enable_timer`, the running thread is preempted every quantum
    /// ([`DEFAULT_QUANTUM`] unless configured otherwise). A thread panic or
    /// a failure to start aborts the process.
    pub fn start(mut self, enable_timer: bool) -> ! {
        self.core.config.preemptive = enable_timer;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.run())) {
            Ok(Ok(termination)) => {
                eprintln!("{termination}");
                std::process::exit(termination.exit_status().into())
            }
            Ok(Err(e)) => {
                error!("failed to run the scheduler: {e}");
                eprintln!("failed to run the scheduler: {e}");
                std::process::abort()
            }
            Err(_) => std::process::abort(),
        }
    }
}

/// Runs the threads spawned so far on this OS thread and exits the process.
///
/// See [`Scheduler::start`].
pub fn start(enable_timer: bool) -> ! {
    let scheduler = PENDING.with(|pending| pending.borrow_mut().take());
    scheduler.unwrap_or_default().start(enable_timer)
}

/// A builder for a [`Scheduler`] with a custom configuration.
///
/// ```
/// use std::time::Duration;
///
/// let scheduler = sthread::Scheduler::builder()
///     .stack_size(256 * 1024)
///     .preemptive(Duration::from_millis(5))
///     .build()
///     .unwrap();
/// # drop(scheduler);
/// ```
#[derive(Debug, Default)]
pub struct SchedulerBuilder {
    config: Config,
}

impl SchedulerBuilder {
    /// Sets the stack size of threads that do not ask for their own.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Preempts the running thread every `quantum`.
    pub fn preemptive(mut self, quantum: Duration) -> Self {
        self.config.preemptive = true;
        self.config.quantum = quantum;
        self
    }

    /// Builds the scheduler.
    pub fn build(mut self) -> Result<Scheduler, SchedError> {
        self.config.stack_size = stack::validate(self.config.stack_size)
            .ok_or(SchedError::InvalidStackSize(self.config.stack_size))?;
        if self.config.quantum.is_zero() {
            return Err(SchedError::InvalidQuantum(self.config.quantum));
        }
        Ok(Scheduler {
            core: Box::new(Core::new(self.config)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_validates() {
        assert!(matches!(
            Scheduler::builder().stack_size(1024).build(),
            Err(SchedError::InvalidStackSize(1024))
        ));
        assert!(matches!(
            Scheduler::builder().preemptive(Duration::ZERO).build(),
            Err(SchedError::InvalidQuantum(_))
        ));
        let s = Scheduler::builder()
            .stack_size(stack::MIN_STACK_SIZE + 1)
            .build()
            .unwrap();
        assert_eq!(s.core.config.stack_size, stack::MIN_STACK_SIZE + 16);
    }

    #[test]
    fn empty_scheduler_finishes() {
        assert_eq!(Scheduler::new().run().unwrap(), Termination::AllFinished);
    }

    #[test]
    fn ids_start_at_one() {
        let s = Scheduler::new();
        let a = s.spawn(|_: ()| {}, ());
        let b = s.spawn(|_: ()| {}, ());
        assert_eq!(a.id().as_u64(), 1);
        assert_eq!(b.id().as_u64(), 2);
        assert_eq!(s.run().unwrap(), Termination::AllFinished);
    }

    #[test]
    fn nested_run_is_rejected() {
        let s = Scheduler::new();
        s.spawn(
            |_: ()| {
                let inner = Scheduler::new();
                assert!(matches!(inner.run(), Err(SchedError::AlreadyRunning)));
            },
            (),
        );
        assert_eq!(s.run().unwrap(), Termination::AllFinished);
    }

    #[test]
    fn termination_is_reported_in_words() {
        assert_eq!(
            Termination::AllFinished.to_string(),
            "All threads completed, exiting."
        );
        let blocked = [2, 5]
            .into_iter()
            .filter_map(ThreadId::new)
            .map(ThreadHandle::new)
            .collect();
        assert_eq!(
            Termination::Deadlock { blocked }.to_string(),
            "The system is deadlocked! Blocked threads: 2 5"
        );
    }

    #[test]
    fn ready_queue_has_room_for_every_thread() {
        let s = Scheduler::new();
        for _ in 0..20 {
            s.spawn(|_: ()| {}, ());
        }
        {
            let st = s.core.state.borrow();
            assert!(st.ready.capacity() >= st.threads.len());
        }
        assert_eq!(s.run().unwrap(), Termination::AllFinished);
    }

    #[test]
    fn ticks_leave_finished_threads_for_a_voluntary_switch() {
        let before = stack::live_stacks();
        let s = Scheduler::new();
        s.spawn(
            |_: ()| {
                let Some(core) = active() else {
                    unreachable!("running without a scheduler")
                };
                let _guard = PreemptGuard::new();
                // The other thread runs to completion before we are back.
                core.preempt();
                let st = core.state.borrow();
                assert_eq!(st.zombies.len(), 1);
                assert_eq!(st.threads.len(), 1);
            },
            (),
        );
        let short = s.spawn(|_: ()| {}, ());
        assert_eq!(s.run().unwrap(), Termination::AllFinished);
        assert_eq!(short.state(), None);
        assert_eq!(stack::live_stacks(), before);
    }

    #[test]
    fn handles_report_states() {
        use crate::thread::{block_current, current_thread, unblock, yield_now};

        let s = Scheduler::new();
        let sleeper = ThreadBuilder::new("sleeper")
            .spawn_in(&s, block_current)
            .unwrap();
        s.spawn(
            |sleeper: ThreadHandle| {
                assert_eq!(current_thread().state(), Some(ThreadState::Running));
                assert_eq!(sleeper.state(), Some(ThreadState::Blocked));
                assert_eq!(sleeper.name().as_deref(), Some("sleeper"));
                unblock(sleeper);
                assert_eq!(sleeper.state(), Some(ThreadState::Ready));
                yield_now();
                assert_eq!(sleeper.state(), None);
            },
            sleeper,
        );
        assert_eq!(s.run().unwrap(), Termination::AllFinished);
        assert_eq!(sleeper.state(), None);
    }
}
