//! # Synchronization Primitives.
//!
//! Threads of one scheduler share a single OS thread, so they never race in
//! the hardware sense. They still interleave: a thread may give the
//! processor away between two steps of an update, either on purpose or,
//! with a preemptive scheduler, because a timer tick arrived. The primitives
//! here let threads wait for each other without spinning:
//!
//! - [`Semaphore`]: a counting primitive whose waiters are released in the
//!   order they started waiting.
//!
//! - [`BoundedBuffer`]: a fixed-capacity FIFO channel between producers and
//!   consumers, built from three semaphores.
//!
//! Both keep their bookkeeping consistent by disabling preemption around
//! every update, and both are `!Sync`: share them between threads of the
//! same scheduler with an [`Rc`](std::rc::Rc).
mod bounded_buffer;
mod semaphore;

pub use bounded_buffer::BoundedBuffer;
pub use semaphore::{Semaphore, SemaphorePermit};
