//! Bounded buffer.
//!
//! A circular queue of fixed capacity. Producers block while it is full,
//! consumers while it is empty. Three semaphores do the work: one counts
//! free slots, one counts filled slots and one keeps producers and consumers
//! out of the shared indices at the same time.

use super::Semaphore;
use crate::SchedError;
use machine::preempt::PreemptGuard;
use std::cell::{Cell, RefCell};

/// A fixed-capacity FIFO channel between threads of one scheduler.
///
/// ```
/// use std::rc::Rc;
/// use sthread::{Scheduler, sync::BoundedBuffer, thread::ThreadBuilder};
///
/// let scheduler = Scheduler::new();
/// let buffer = Rc::new(BoundedBuffer::new(1));
/// let producer = buffer.clone();
/// ThreadBuilder::new("producer")
///     .spawn_in(&scheduler, move || (1..=3).for_each(|i| producer.put(i)))
///     .unwrap();
/// ThreadBuilder::new("consumer")
///     .spawn_in(&scheduler, move || {
///         assert_eq!([buffer.take(), buffer.take(), buffer.take()], [1, 2, 3]);
///     })
///     .unwrap();
/// scheduler.run().unwrap();
/// ```
pub struct BoundedBuffer<T> {
    slots: RefCell<Box<[Option<T>]>>,
    capacity: usize,
    /// Index of the oldest record.
    head: Cell<usize>,
    /// Number of occupied slots.
    count: Cell<usize>,
    free: Semaphore,
    filled: Semaphore,
    exclusion: Semaphore,
}

impl<T> BoundedBuffer<T> {
    /// Creates an empty buffer that holds up to `capacity` records.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::try_new(capacity).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible version of [`BoundedBuffer::new`].
    pub fn try_new(capacity: usize) -> Result<Self, SchedError> {
        let permits = match i64::try_from(capacity) {
            Ok(permits) if permits > 0 => permits,
            _ => return Err(SchedError::InvalidCapacity(capacity)),
        };
        let _guard = PreemptGuard::new();
        Ok(Self {
            slots: RefCell::new((0..capacity).map(|_| None).collect()),
            capacity,
            head: Cell::new(0),
            count: Cell::new(0),
            free: Semaphore::try_new(permits)?,
            filled: Semaphore::try_new(0)?,
            exclusion: Semaphore::try_new(1)?,
        })
    }

    /// Appends `record`, waiting for a free slot if the buffer is full.
    pub fn put(&self, record: T) {
        self.free.wait();
        self.exclusion.wait();
        {
            let _guard = PreemptGuard::new();
            let idx = (self.head.get() + self.count.get()) % self.capacity;
            let old = self.slots.borrow_mut()[idx].replace(record);
            debug_assert!(old.is_none(), "slot {idx} overwritten");
            self.count.set(self.count.get() + 1);
        }
        self.exclusion.signal();
        self.filled.signal();
    }

    /// Removes the oldest record, waiting for one if the buffer is empty.
    pub fn take(&self) -> T {
        self.filled.wait();
        self.exclusion.wait();
        let (head, record) = {
            let _guard = PreemptGuard::new();
            let head = self.head.get();
            let record = self.slots.borrow_mut()[head].take();
            self.count.set(self.count.get() - 1);
            self.head.set((head + 1) % self.capacity);
            (head, record)
        };
        self.exclusion.signal();
        self.free.signal();
        match record {
            Some(record) => record,
            None => unreachable!("filled slot {head} is empty"),
        }
    }

    /// The number of records in the buffer.
    pub fn len(&self) -> usize {
        self.count.get()
    }

    /// The maximum number of records the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the buffer holds no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a `put` would block.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl<T> std::fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_must_be_positive() {
        assert!(matches!(
            BoundedBuffer::<u32>::try_new(0),
            Err(SchedError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn wraps_around() {
        let buffer = BoundedBuffer::new(3);
        for round in 0..4 {
            buffer.put(round * 2);
            buffer.put(round * 2 + 1);
            assert_eq!(buffer.len(), 2);
            assert_eq!(buffer.take(), round * 2);
            assert_eq!(buffer.take(), round * 2 + 1);
            assert!(buffer.is_empty());
        }
        for i in 0..3 {
            buffer.put(i);
        }
        assert!(buffer.is_full());
    }
}
