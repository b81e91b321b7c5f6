//! FIFO queue of threads.
//!
//! A queue holds thread ids, not the threads themselves: the control blocks
//! stay put in the scheduler's thread table and only their ids move between
//! the ready queue, the blocked queue and semaphore wait queues.

use super::ThreadId;
use std::collections::VecDeque;

/// An ordered collection of threads with FIFO insertion and removal.
#[derive(Debug, Default)]
pub struct Queue {
    inner: VecDeque<ThreadId>,
}

impl Queue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }

    /// Returns `true` if no thread is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the number of queued threads.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// The number of threads the queue holds without reallocating.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Makes room for `capacity` queued threads in total, so that appending
    /// up to that many never allocates.
    pub fn reserve(&mut self, capacity: usize) {
        self.inner.reserve(capacity.saturating_sub(self.inner.len()));
    }

    /// Adds `tid` at the tail.
    pub fn append(&mut self, tid: ThreadId) {
        debug_assert!(!self.contains(tid), "thread {tid} is queued twice");
        self.inner.push_back(tid);
    }

    /// Removes and returns the thread at the head.
    pub fn take_front(&mut self) -> Option<ThreadId> {
        self.inner.pop_front()
    }

    /// Removes `tid` from wherever it sits in the queue.
    ///
    /// Returns whether it was found. Removing a thread that is not queued is
    /// not an error and leaves the queue untouched.
    pub fn remove(&mut self, tid: ThreadId) -> bool {
        match self.inner.iter().position(|t| *t == tid) {
            Some(idx) => {
                self.inner.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `tid` is queued.
    pub fn contains(&self, tid: ThreadId) -> bool {
        self.inner.contains(&tid)
    }

    /// Iterates over the queued threads from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.inner.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u64) -> ThreadId {
        ThreadId::new(n).unwrap()
    }

    #[test]
    fn fifo_order() {
        let mut q = Queue::new();
        assert!(q.is_empty());
        for n in 1..=3 {
            q.append(tid(n));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.take_front(), Some(tid(1)));
        q.append(tid(4));
        assert_eq!(q.iter().collect::<Vec<_>>(), [tid(2), tid(3), tid(4)]);
        assert_eq!(q.take_front(), Some(tid(2)));
        assert_eq!(q.take_front(), Some(tid(3)));
        assert_eq!(q.take_front(), Some(tid(4)));
        assert_eq!(q.take_front(), None);
    }

    #[test]
    fn remove_from_the_middle() {
        let mut q = Queue::new();
        for n in 1..=4 {
            q.append(tid(n));
        }
        assert!(q.remove(tid(3)));
        assert!(!q.contains(tid(3)));
        assert_eq!(q.iter().collect::<Vec<_>>(), [tid(1), tid(2), tid(4)]);
    }

    #[test]
    fn reserved_room_is_kept() {
        let mut q = Queue::new();
        q.reserve(8);
        let room = q.capacity();
        assert!(room >= 8);
        for n in 1..=8 {
            q.append(tid(n));
        }
        assert_eq!(q.capacity(), room);
    }

    #[test]
    fn remove_absent_is_harmless() {
        let mut q = Queue::new();
        q.append(tid(1));
        assert!(!q.remove(tid(9)));
        assert_eq!(q.len(), 1);
        assert!(q.remove(tid(1)));
        assert!(!q.remove(tid(1)));
        assert!(q.is_empty());
    }
}
