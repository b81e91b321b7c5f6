//! The machine layer underneath sthreads.
//!
//! This crate contains everything that talks to the processor or the host
//! operating system directly: the register save/restore trampoline, the
//! stack regions threads run on, the preemption-disable counter, and the
//! periodic tick that drives timer preemption.
//!
//! Nothing in here knows what a thread *is*. The `sthread` crate builds
//! thread control blocks, queues and the scheduler on top of these pieces,
//! and you are supposed to use that crate instead of calling into this one
//! directly. The code is kept separate so that the platform specific parts
//! stay behind a narrow boundary: a saved context is nothing but a stack
//! pointer, and the only operations on it are [`context::prepare`] and
//! [`context::switch`].
#![deny(missing_docs, unsafe_op_in_unsafe_fn)]

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("sthreads currently support only x86_64 Linux");

pub mod context;
pub mod preempt;
pub mod stack;
pub mod timer;
