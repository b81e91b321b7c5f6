use grading::{Recorder, assert_termination, validate_reclaim};
use sthread::{
    Scheduler, Termination,
    sync::Semaphore,
    thread::{self, ThreadBuilder},
};
use std::rc::Rc;

fn yield_k_times((name, k, log): (char, usize, Recorder<char>)) {
    for _ in 0..k {
        log.record(name);
        thread::yield_now();
    }
}

#[test]
fn spawn_order_is_run_order() {
    grading::init_logging();
    let log = Recorder::new();
    let scheduler = Scheduler::new();
    for name in ['A', 'B', 'C'] {
        scheduler.spawn(yield_k_times, (name, 3, log.clone()));
    }
    assert_eq!(scheduler.run().unwrap(), Termination::AllFinished);
    assert_eq!(
        log.events().into_iter().collect::<String>(),
        "ABCABCABC"
    );
}

#[test]
#[assert_termination(AllFinished)]
#[validate_reclaim]
fn late_spawns_join_the_cycle() {
    let log = Recorder::new();
    let done = Rc::new(Semaphore::new(0));
    for name in ['A', 'B', 'C', 'D'] {
        let (log, done) = (log.clone(), done.clone());
        ThreadBuilder::new(name.to_string()).spawn(move || {
            yield_k_times((name, 2, log));
            done.signal();
        });
    }
    for _ in 0..4 {
        done.wait();
    }
    assert_eq!(log.events().into_iter().collect::<String>(), "ABCDABCD");
}

#[test]
#[assert_termination(AllFinished)]
fn lone_thread_keeps_running() {
    // Nothing else is ready, so yielding returns at once.
    let me = thread::current_thread();
    for _ in 0..100 {
        thread::yield_now();
        assert_eq!(thread::current_thread(), me);
    }
}

#[test]
#[assert_termination(AllFinished)]
fn yield_after_spawn_runs_the_child() {
    let log = Recorder::new();
    let child_log = log.clone();
    thread::spawn(|log: Recorder<&'static str>| log.record("child"), child_log);
    log.record("parent before");
    thread::yield_now();
    log.record("parent after");
    assert_eq!(log.events(), ["parent before", "child", "parent after"]);
}
