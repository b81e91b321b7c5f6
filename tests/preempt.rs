//! Timer preemption.
//!
//! The threads in these tests never yield on their own. They only touch
//! atomics while preemption is enabled: allocating or printing from a thread
//! that a tick may interrupt is not allowed. The test keeps a clone of every
//! shared value so that nothing is freed before the run is over.

use sthread::{
    Scheduler, Termination,
    thread::{self, ThreadBuilder},
};
use std::{
    rc::Rc,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

const DEADLINE: Duration = Duration::from_secs(10);

fn preemptive() -> Scheduler {
    grading::init_logging();
    Scheduler::builder()
        .preemptive(Duration::from_millis(1))
        .build()
        .unwrap()
}

fn spin_until(flag: &AtomicBool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while !flag.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            return false;
        }
        std::hint::spin_loop();
    }
    true
}

#[test]
fn busy_threads_make_progress() {
    let scheduler = preemptive();
    let a_started = Rc::new(AtomicBool::new(false));
    let b_started = Rc::new(AtomicBool::new(false));
    let a_ok = Rc::new(AtomicBool::new(false));
    {
        let (a_started, b_started, a_ok) = (a_started.clone(), b_started.clone(), a_ok.clone());
        ThreadBuilder::new("a")
            .spawn_in(&scheduler, move || {
                a_started.store(true, Ordering::SeqCst);
                a_ok.store(spin_until(&b_started), Ordering::SeqCst);
            })
            .unwrap();
    }
    {
        let (a_started, b_started) = (a_started.clone(), b_started.clone());
        ThreadBuilder::new("b")
            .spawn_in(&scheduler, move || {
                b_started.store(true, Ordering::SeqCst);
                spin_until(&a_started);
            })
            .unwrap();
    }
    assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
    assert!(a_ok.load(Ordering::SeqCst), "thread b never got the processor");
}

#[test]
fn guarded_sections_are_not_preempted() {
    let scheduler = preemptive();
    let counter = Rc::new(AtomicU64::new(0));
    let stop = Rc::new(AtomicBool::new(false));
    let verdict = Rc::new(AtomicU64::new(u64::MAX));
    {
        let (counter, stop, verdict) = (counter.clone(), stop.clone(), verdict.clone());
        ThreadBuilder::new("observer")
            .spawn_in(&scheduler, move || {
                let deadline = Instant::now() + DEADLINE;
                while counter.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
                    std::hint::spin_loop();
                }
                let moved = thread::without_preemption(|| {
                    let before = counter.load(Ordering::SeqCst);
                    let until = Instant::now() + Duration::from_millis(30);
                    while Instant::now() < until {
                        std::hint::spin_loop();
                    }
                    counter.load(Ordering::SeqCst) - before
                });
                verdict.store(moved, Ordering::SeqCst);
                stop.store(true, Ordering::SeqCst);
            })
            .unwrap();
    }
    {
        let (counter, stop) = (counter.clone(), stop.clone());
        ThreadBuilder::new("counter")
            .spawn_in(&scheduler, move || {
                while !stop.load(Ordering::SeqCst) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }
    assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
    assert!(counter.load(Ordering::SeqCst) > 0);
    assert_eq!(verdict.load(Ordering::SeqCst), 0);
}

#[test]
fn cooperative_code_still_works_with_a_timer() {
    use sthread::sync::BoundedBuffer;

    let scheduler = preemptive();
    let buffer = Rc::new(BoundedBuffer::new(2));
    let sum = Rc::new(AtomicU64::new(0));
    {
        let buffer = buffer.clone();
        ThreadBuilder::new("producer")
            .spawn_in(&scheduler, move || {
                for i in 1..=1000u64 {
                    buffer.put(i);
                }
            })
            .unwrap();
    }
    {
        let (buffer, sum) = (buffer.clone(), sum.clone());
        ThreadBuilder::new("consumer")
            .spawn_in(&scheduler, move || {
                for _ in 0..1000 {
                    sum.fetch_add(buffer.take(), Ordering::SeqCst);
                }
            })
            .unwrap();
    }
    assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
    assert_eq!(sum.load(Ordering::SeqCst), 500_500);
}
