//! Preemption timer.
//!
//! A [`Timer`] plays the role of a hardware timer interrupt for one OS
//! thread. A helper OS thread wakes up once per quantum and sends `SIGALRM`
//! to the thread that started the timer; the signal handler calls the tick
//! function registered with [`Timer::start`] on whatever stack the target
//! thread was executing.
//!
//! The handler is installed with `SA_NODEFER`, so a tick function that
//! switches away and never comes back through the handler's epilogue does
//! not leave `SIGALRM` blocked for the next context.

use crossbeam_utils::sync::{Parker, Unparker};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

static ON_TICK: AtomicUsize = AtomicUsize::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn deliver(_signo: libc::c_int) {
    let f = ON_TICK.load(Ordering::SeqCst);
    if f == 0 {
        return;
    }
    // SAFETY: only `Timer::start` stores into `ON_TICK`, and it stores a
    // `fn()`.
    let on_tick: fn() = unsafe { core::mem::transmute::<usize, fn()>(f) };
    // The interrupted code may be inspecting errno.
    let errno = unsafe { *libc::__errno_location() };
    on_tick();
    unsafe { *libc::__errno_location() = errno };
}

fn install() -> io::Result<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    // SAFETY: `sigaction` is plain old data.
    let mut action: libc::sigaction = unsafe { core::mem::zeroed() };
    action.sa_sigaction = deliver as extern "C" fn(libc::c_int) as usize;
    action.sa_flags = libc::SA_NODEFER | libc::SA_RESTART;
    // SAFETY: `action` is fully initialized and `deliver` has the signature
    // of a plain signal handler.
    let rc = unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGALRM, &action, core::ptr::null_mut())
    };
    if rc != 0 {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A periodic tick delivered to the OS thread that started it.
///
/// Dropping the timer stops the ticks. The `SIGALRM` handler stays
/// installed and ignores signals for which no tick function is registered.
pub struct Timer {
    stop: Arc<AtomicBool>,
    unparker: Unparker,
    ticker: Option<JoinHandle<()>>,
    quantum: Duration,
}

impl Timer {
    /// Starts calling `on_tick` on the current OS thread every `quantum`.
    ///
    /// `on_tick` runs in signal context. It may switch stacks, but it must
    /// not take locks that the interrupted code could be holding.
    pub fn start(quantum: Duration, on_tick: fn()) -> io::Result<Self> {
        ON_TICK.store(on_tick as usize, Ordering::SeqCst);
        install()?;

        // SAFETY: always succeeds.
        let target = unsafe { libc::pthread_self() };
        let stop = Arc::new(AtomicBool::new(false));
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let ticker = std::thread::Builder::new()
            .name("sthread-timer".into())
            .spawn({
                let stop = stop.clone();
                move || {
                    loop {
                        parker.park_timeout(quantum);
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        // SAFETY: `Timer::drop` joins this thread before the
                        // target thread can go away.
                        unsafe { libc::pthread_kill(target, libc::SIGALRM) };
                    }
                }
            })?;
        Ok(Self {
            stop,
            unparker,
            ticker: Some(ticker),
            quantum,
        })
    }

    /// The interval between two ticks.
    pub fn quantum(&self) -> Duration {
        self.quantum
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.unparker.unpark();
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}
