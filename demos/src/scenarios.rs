use clap::ValueEnum;
use sthread::{
    SchedError, Scheduler,
    sync::{BoundedBuffer, Semaphore},
    thread::{self, ThreadBuilder},
};
use std::{
    fmt,
    hint::black_box,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Threads may be preempted, so output and frees happen with preemption
/// disabled.
macro_rules! say {
    ($($arg:tt)*) => {
        thread::without_preemption(|| println!($($arg)*))
    };
}

fn release<T>(value: T) {
    thread::without_preemption(move || drop(value))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Two threads print their argument between yields
    Args,
    /// Six threads finish at different times
    Ret,
    /// Locals survive a suspend/resume cycle
    Stack,
    /// Producers compute Fibonacci numbers for a consumer
    ProducerConsumer,
    /// A thread waits on a semaphore nobody signals
    Deadlock,
    /// Busy threads share the processor through timer ticks
    Preempt,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}

impl Scenario {
    pub fn needs_timer(self) -> bool {
        self == Scenario::Preempt
    }

    /// Spawns the threads of this scenario into `scheduler`.
    pub fn populate(self, scheduler: &Scheduler) -> Result<(), SchedError> {
        match self {
            Scenario::Args => {
                for arg in [5, 7] {
                    scheduler.spawn(print_arg, arg);
                }
            }
            Scenario::Ret => {
                for arg in [2, 4, 8, 16, 32, 64] {
                    scheduler.spawn(finish_after, arg);
                }
            }
            Scenario::Stack => {
                for seed in 1..=3 {
                    scheduler.spawn(nine_locals, seed);
                }
            }
            Scenario::ProducerConsumer => producer_consumer(scheduler)?,
            Scenario::Deadlock => deadlock(scheduler)?,
            Scenario::Preempt => preempt(scheduler)?,
        }
        Ok(())
    }
}

fn print_arg(arg: u32) {
    say!("{arg} should print {arg} times.");
    for _ in 0..arg {
        thread::yield_now();
        say!(" loop argument passed in is: {arg}");
    }
}

fn finish_after(arg: u32) {
    say!(" thread {arg} should print {arg} times.");
    for _ in 0..arg {
        thread::yield_now();
        say!(" thread {arg}");
    }
    say!(" thread {arg} is done.");
}

#[inline(never)]
fn nine_locals(seed: u64) {
    let expected: [u64; 9] = std::array::from_fn(|k| seed * 100 + k as u64);
    let [a, b, c, d, e, f, g, h, i] = black_box(expected);
    thread::yield_now();
    let kept = black_box([a, b, c, d, e, f, g, h, i]);
    assert_eq!(kept, expected, "locals of thread {seed} were clobbered");
    say!(" thread {seed}: {kept:?} survived a yield");
}

/// One result of the producer/consumer scenario.
#[derive(Clone, Copy, Debug)]
pub struct Record {
    /// Index of the producer that computed it.
    pub id: usize,
    /// The Fibonacci index.
    pub arg: u32,
    /// The Fibonacci number.
    pub val: u64,
}

/// Yields once per step so producers interleave.
fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a.wrapping_add(b));
        thread::yield_now();
    }
    a
}

fn producer_consumer(scheduler: &Scheduler) -> Result<(), SchedError> {
    const PRODUCERS: usize = 2;
    const PER_PRODUCER: u32 = 20;

    let buffer = Rc::new(BoundedBuffer::<Record>::try_new(5)?);
    for id in 0..PRODUCERS {
        let buffer = buffer.clone();
        ThreadBuilder::new(format!("producer-{id}")).spawn_in(scheduler, move || {
            for arg in 0..PER_PRODUCER {
                buffer.put(Record {
                    id,
                    arg,
                    val: fib(arg),
                });
            }
            release(buffer);
        })?;
    }
    ThreadBuilder::new("consumer").spawn_in(scheduler, move || {
        for _ in 0..PRODUCERS * PER_PRODUCER as usize {
            let Record { id, arg, val } = buffer.take();
            say!(" producer {id}: fib({arg}) = {val}");
        }
        release(buffer);
    })?;
    Ok(())
}

fn deadlock(scheduler: &Scheduler) -> Result<(), SchedError> {
    let never = Rc::new(Semaphore::try_new(0)?);
    ThreadBuilder::new("waiter").spawn_in(scheduler, move || {
        say!(" waiting for a signal that never comes");
        never.wait();
        unreachable!("the semaphore is never signaled");
    })?;
    ThreadBuilder::new("bystander").spawn_in(scheduler, || say!(" bystander is done"))?;
    Ok(())
}

const BUSY_FOR: Duration = Duration::from_millis(200);

static PROGRESS: [AtomicU64; 2] = [AtomicU64::new(0), AtomicU64::new(0)];

/// Spins without yielding and counts how often the other thread moved.
fn busy(me: usize) {
    let other = &PROGRESS[1 - me];
    let until = Instant::now() + BUSY_FOR;
    let (mut last, mut switches) = (other.load(Ordering::Relaxed), 0u64);
    while Instant::now() < until {
        PROGRESS[me].fetch_add(1, Ordering::Relaxed);
        let seen = other.load(Ordering::Relaxed);
        if seen != last {
            (last, switches) = (seen, switches + 1);
        }
    }
    say!(" busy thread {me} saw the other thread run {switches} times");
}

fn preempt(scheduler: &Scheduler) -> Result<(), SchedError> {
    for (me, progress) in PROGRESS.iter().enumerate() {
        progress.store(0, Ordering::Relaxed);
        ThreadBuilder::new(format!("busy-{me}")).spawn_in(scheduler, move || busy(me))?;
    }
    Ok(())
}
