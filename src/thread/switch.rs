//! The suspend/resume protocol.
//!
//! A [`Context`] is everything the scheduler keeps about a suspended
//! execution: the stack pointer left behind by `machine::context::switch`
//! and the preemption depth that was in force when it stopped.
//!
//! Every switch happens with preemption disabled, and the disable stays
//! asserted across the switch: the resumed side, not the suspending one,
//! reinstates its own depth once it runs again.

use machine::preempt;
use std::cell::Cell;

/// A saved execution context.
#[derive(Debug, Default)]
pub(crate) struct Context {
    sp: Cell<usize>,
    depth: Cell<isize>,
}

impl Context {
    /// A context that has never run, whose stack is prepared at `sp`.
    ///
    /// It starts with preemption enabled.
    pub(crate) fn fresh(sp: usize) -> Self {
        Self {
            sp: Cell::new(sp),
            depth: Cell::new(0),
        }
    }
}

/// A pending transfer of control decided by the scheduler.
pub(crate) struct Switch {
    /// Where the running execution is saved.
    pub(crate) save: *const Context,
    /// What resumes.
    pub(crate) next: *const Context,
    /// The resume value handed to `next`.
    pub(crate) transfer: usize,
}

impl Switch {
    /// Suspends the running execution into `self.save` and resumes
    /// `self.next`.
    ///
    /// Returns the resume value once `self.save` is resumed in turn.
    ///
    /// # Safety
    ///
    /// Preemption must be disabled. Both contexts must stay alive until the
    /// switch completes, `next` must be suspended, and no `RefCell` borrow of
    /// scheduler state may be held by the caller.
    pub(crate) unsafe fn perform(self) -> usize {
        debug_assert!(preempt::PreemptGuard::is_guarded());
        // SAFETY: guaranteed by the caller.
        let (save, next) = unsafe { (&*self.save, &*self.next) };
        save.depth.set(preempt::depth());
        // SAFETY: `next.sp` was stored by `prepare` or by an earlier switch,
        // and the caller guarantees its stack is alive.
        unsafe { machine::context::switch(save.sp.as_ptr(), next.sp.get(), self.transfer) }
    }
}

/// Reinstates the preemption depth of `own` after it has been resumed.
pub(crate) fn restore(own: &Context) {
    // SAFETY: `own.depth` counts the guards alive on the resumed stack.
    unsafe { preempt::set_depth(own.depth.get()) };
}
