use grading::{Recorder, assert_termination, validate_reclaim};
use rand::{Rng, SeedableRng, rngs::StdRng};
use sthread::{
    sync::{BoundedBuffer, Semaphore},
    thread::{self, ThreadBuilder},
};
use std::{cell::RefCell, rc::Rc};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Put(u32),
    Take(u32),
}

#[test]
#[assert_termination(AllFinished)]
#[validate_reclaim]
fn single_slot_alternates() {
    let buffer = Rc::new(BoundedBuffer::new(1));
    let done = Rc::new(Semaphore::new(0));
    let log = Recorder::new();
    {
        let (buffer, done, log) = (buffer.clone(), done.clone(), log.clone());
        ThreadBuilder::new("producer").spawn(move || {
            for i in 1..=3 {
                buffer.put(i);
                assert!(buffer.len() <= 1);
                log.record(Event::Put(i));
            }
            done.signal();
        });
    }
    {
        let (buffer, done, log) = (buffer.clone(), done.clone(), log.clone());
        ThreadBuilder::new("consumer").spawn(move || {
            for _ in 1..=3 {
                let i = buffer.take();
                log.record(Event::Take(i));
            }
            done.signal();
        });
    }
    done.wait();
    done.wait();
    assert_eq!(
        log.events(),
        [
            Event::Put(1),
            Event::Take(1),
            Event::Put(2),
            Event::Take(2),
            Event::Put(3),
            Event::Take(3),
        ]
    );
    assert!(buffer.is_empty());
}

#[test]
#[assert_termination(AllFinished)]
fn producer_blocks_while_full() {
    let buffer = Rc::new(BoundedBuffer::new(2));
    {
        let buffer = buffer.clone();
        ThreadBuilder::new("producer").spawn(move || {
            for i in 0..5 {
                buffer.put(i);
            }
        });
    }
    thread::yield_now();
    // The producer filled both slots and waits for a third.
    assert!(buffer.is_full());
    assert_eq!(buffer.len(), 2);
    let taken = (0..5).map(|_| buffer.take()).collect::<Vec<_>>();
    assert_eq!(taken, [0, 1, 2, 3, 4]);
}

#[test]
#[assert_termination(AllFinished)]
#[validate_reclaim]
fn single_producer_single_consumer_keeps_order() {
    const N: u32 = 200;
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(7)));
    let buffer = Rc::new(BoundedBuffer::new(3));
    let done = Rc::new(Semaphore::new(0));
    let consumed = Recorder::new();
    {
        let (buffer, done, rng) = (buffer.clone(), done.clone(), rng.clone());
        ThreadBuilder::new("producer").spawn(move || {
            for i in 0..N {
                buffer.put(i);
                if rng.borrow_mut().gen_bool(0.5) {
                    thread::yield_now();
                }
            }
            done.signal();
        });
    }
    {
        let (buffer, done, consumed) = (buffer.clone(), done.clone(), consumed.clone());
        ThreadBuilder::new("consumer").spawn(move || {
            for _ in 0..N {
                consumed.record(buffer.take());
                if rng.borrow_mut().gen_bool(0.3) {
                    thread::yield_now();
                }
            }
            done.signal();
        });
    }
    done.wait();
    done.wait();
    assert_eq!(consumed.events(), (0..N).collect::<Vec<_>>());
}

#[test]
#[assert_termination(AllFinished)]
#[validate_reclaim]
fn occupancy_stays_within_capacity() {
    const CAPACITY: usize = 4;
    const PRODUCERS: u32 = 3;
    const PER_PRODUCER: u32 = 40;
    const CONSUMERS: u32 = 2;

    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(1234)));
    let buffer = Rc::new(BoundedBuffer::new(CAPACITY));
    let done = Rc::new(Semaphore::new(0));
    let consumed = Recorder::new();

    let random_yields = {
        let rng = rng.clone();
        move || {
            let n = rng.borrow_mut().gen_range(0..4);
            for _ in 0..n {
                thread::yield_now();
            }
        }
    };

    for p in 0..PRODUCERS {
        let (buffer, done) = (buffer.clone(), done.clone());
        let random_yields = random_yields.clone();
        ThreadBuilder::new(format!("producer-{p}")).spawn(move || {
            for i in 0..PER_PRODUCER {
                random_yields();
                buffer.put(p * 1000 + i);
                assert!(buffer.len() <= CAPACITY);
            }
            done.signal();
        });
    }
    let total = PRODUCERS * PER_PRODUCER;
    for c in 0..CONSUMERS {
        let (buffer, done, consumed) = (buffer.clone(), done.clone(), consumed.clone());
        let random_yields = random_yields.clone();
        ThreadBuilder::new(format!("consumer-{c}")).spawn(move || {
            for _ in 0..total / CONSUMERS {
                random_yields();
                consumed.record(buffer.take());
                assert!(buffer.len() <= CAPACITY);
            }
            done.signal();
        });
    }
    for _ in 0..PRODUCERS + CONSUMERS {
        done.wait();
    }

    let mut consumed = consumed.events();
    assert_eq!(consumed.len(), total as usize);
    // Records of one producer come out in the order it put them.
    for p in 0..PRODUCERS {
        let mine = consumed
            .iter()
            .copied()
            .filter(|v| v / 1000 == p)
            .collect::<Vec<_>>();
        assert_eq!(mine, (0..PER_PRODUCER).map(|i| p * 1000 + i).collect::<Vec<_>>());
    }
    consumed.sort_unstable();
    consumed.dedup();
    assert_eq!(consumed.len(), total as usize);
    assert!(buffer.is_empty());
}
