//! Thread stacks.
//!
//! Every stack is a single heap block. The lowest word holds
//! [`THREAD_MAGIC`]; a stack that grows past its end overwrites the magic
//! first, which [`Stack::is_intact`] reports.

use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::cell::Cell;
use std::ptr::NonNull;

/// The default size of a thread stack.
pub const STACK_SIZE: usize = 0x100000;
/// The smallest stack a thread may ask for.
pub const MIN_STACK_SIZE: usize = 0x4000;
/// A magic number to detect a stack overflow.
pub const THREAD_MAGIC: usize = 0xdeadbeefcafebabe;

const STACK_ALIGN: usize = 16;

thread_local! {
    static LIVE: Cell<usize> = const { Cell::new(0) };
}

/// The number of stacks allocated on this OS thread and not yet freed.
pub fn live_stacks() -> usize {
    LIVE.with(Cell::get)
}

/// Checks a requested stack size.
///
/// Returns the size rounded up to the stack alignment, or `None` if it is
/// below [`MIN_STACK_SIZE`] or absurdly large.
pub fn validate(size: usize) -> Option<usize> {
    if size < MIN_STACK_SIZE {
        return None;
    }
    let size = size.checked_next_multiple_of(STACK_ALIGN)?;
    Layout::from_size_align(size, STACK_ALIGN).ok()?;
    Some(size)
}

/// An owned, heap-allocated execution stack.
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
}

impl Stack {
    /// Allocates a stack of `size` bytes.
    ///
    /// Returns `None` if `size` does not pass [`validate`]. Running out of
    /// memory is reported through [`handle_alloc_error`].
    pub fn new(size: usize) -> Option<Self> {
        let size = validate(size)?;
        let layout = Layout::from_size_align(size, STACK_ALIGN).ok()?;
        // SAFETY: `layout` has a non-zero size.
        let Some(base) = NonNull::new(unsafe { alloc(layout) }) else {
            handle_alloc_error(layout)
        };
        // SAFETY: the block is at least `MIN_STACK_SIZE` bytes and aligned.
        unsafe { base.cast::<usize>().write(THREAD_MAGIC) };
        LIVE.with(|l| l.set(l.get() + 1));
        Some(Self { base, size })
    }

    /// The size of the stack in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The address one past the highest byte of the stack.
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.size
    }

    /// Whether the overflow magic at the bottom of the stack is untouched.
    pub fn is_intact(&self) -> bool {
        // SAFETY: the magic word is part of the block owned by `self`.
        unsafe { self.base.cast::<usize>().read_volatile() == THREAD_MAGIC }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated in `new` with this very layout.
        unsafe {
            dealloc(
                self.base.as_ptr(),
                Layout::from_size_align_unchecked(self.size, STACK_ALIGN),
            )
        };
        LIVE.with(|l| l.set(l.get() - 1));
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.base)
            .field("top", &format_args!("{:#x}", self.top()))
            .finish()
    }
}
