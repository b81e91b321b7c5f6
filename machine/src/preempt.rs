//! Preemption guard.
//!
//! The timer tick arrives as a signal on the very OS thread that runs the
//! scheduler, so "disabling interrupts" here means raising a per-OS-thread
//! counter that the tick handler consults before it forces a yield. The
//! guard nests: preemption is allowed again only when the outermost
//! [`PreemptGuard`] is dropped.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicIsize, Ordering, compiler_fence};

thread_local! {
    static DEPTH: AtomicIsize = const { AtomicIsize::new(0) };
}

/// An RAII implementation of a "scoped preemption-off section".
///
/// While at least one `PreemptGuard` is alive on an OS thread, a timer tick
/// delivered to that thread must not switch threads.
///
/// **Important:**
/// - [`PreemptGuard`] instances **must be dropped in reverse order of their
///   creation**.
/// - A guard belongs to the OS thread that created it and cannot be sent to
///   another one.
pub struct PreemptGuard {
    _not_send: PhantomData<*const ()>,
}

impl PreemptGuard {
    /// Creates a new `PreemptGuard`, disabling preemption.
    ///
    /// # Example
    /// ```rust
    /// # use machine::preempt::PreemptGuard;
    /// let _guard = PreemptGuard::new(); // Disables preemption
    /// // Critical section...
    /// // Preemption is restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        DEPTH.with(|d| d.fetch_add(1, Ordering::SeqCst));
        compiler_fence(Ordering::SeqCst);
        Self {
            _not_send: PhantomData,
        }
    }

    /// Whether preemption is currently disabled on this OS thread.
    pub fn is_guarded() -> bool {
        depth() > 0
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        let prev = DEPTH.with(|d| d.fetch_sub(1, Ordering::SeqCst));
        assert!(prev > 0, "Mismatched PreemptGuard drop calls: {prev}");
    }
}

/// The nesting depth of preemption guards on this OS thread.
pub fn depth() -> isize {
    DEPTH.with(|d| d.load(Ordering::SeqCst))
}

/// Overwrites the nesting depth of this OS thread.
///
/// The depth is a property of the code that is running, not of the OS
/// thread. A context switch therefore carries it along: the outgoing side
/// records its depth and the incoming side reinstates its own.
///
/// # Safety
///
/// Every guard alive on the current stack must be accounted for in `depth`.
pub unsafe fn set_depth(depth: isize) {
    DEPTH.with(|d| d.store(depth, Ordering::SeqCst));
    compiler_fence(Ordering::SeqCst);
}
