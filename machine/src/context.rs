//! Register save/restore.
//!
//! A suspended execution context is represented by a single stack pointer.
//! Before giving up the processor, [`switch`] pushes every callee-saved
//! register, together with the SSE and x87 control words, onto the stack of
//! the running context and records where that stack ended. Resuming pops the
//! same frame from the other stack and returns into whatever called
//! [`switch`] there.
//!
//! Caller-saved registers need no treatment: the compiler already spilled
//! them around the call to [`switch`], so every local of the suspended code
//! survives the round trip.
//!
//! A context that has never run is manufactured by [`prepare`], which lays
//! out a frame identical to the one [`switch`] would have left behind, with
//! the return address pointing at a small entry stub.

use crate::stack::Stack;
use core::arch::naked_asm;

/// Power-on MXCSR: all exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1f80;
/// Power-on x87 control word.
const FPUCW_DEFAULT: u16 = 0x037f;

/// The entry point of a fresh context.
///
/// The first argument is the transfer value of the [`switch`] that started
/// the context, the second is the payload given to [`prepare`]. The function
/// must never return: there is nothing above it on the stack.
pub type Entry = extern "C" fn(transfer: usize, payload: usize) -> !;

/// A struct to mimic a stack state on context switch.
#[repr(C)]
struct ContextSwitchFrame {
    mxcsr: u32,
    fpucw: u16,
    _pad: u16,
    r15: usize,
    r14: usize,
    r13: usize,
    r12: usize,
    rbx: usize,
    rbp: usize,
    ret_addr: usize,
    entry: usize,
    payload: usize,
    end_of_stack: usize,
}

// `start` pops `entry` and `payload` and jumps with the stack pointer on
// `end_of_stack`; the frame size keeps that slot at 8 mod 16 as the ABI
// expects on function entry.
const _: () = assert!(core::mem::size_of::<ContextSwitchFrame>() % 16 == 8);

/// Lays out a fresh context on `stack`.
///
/// The first [`switch`] to the returned stack pointer calls
/// `entry(transfer, payload)` at the top of `stack`.
pub fn prepare(stack: &mut Stack, entry: Entry, payload: usize) -> usize {
    let frame = (stack.top() - core::mem::size_of::<ContextSwitchFrame>()) as *mut ContextSwitchFrame;
    // SAFETY: `top` is 16-byte aligned and the stack is far larger than a
    // frame, so the frame lies inside memory exclusively owned by `stack`.
    unsafe {
        frame.write(ContextSwitchFrame {
            mxcsr: MXCSR_DEFAULT,
            fpucw: FPUCW_DEFAULT,
            _pad: 0,
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            ret_addr: start as usize,
            entry: entry as usize,
            payload,
            end_of_stack: 0,
        });
    }
    frame as usize
}

/// The very beginning of a context built by [`prepare`].
#[unsafe(naked)]
unsafe extern "C" fn start() -> ! {
    // RAX: transfer value handed over by `switch`.
    naked_asm!(
        "mov rdi, rax",
        "pop rax",
        "pop rsi",
        // The return address seen by `entry` is `end_of_stack`, which ends
        // any backtrace here.
        "jmp rax",
    );
}

/// Saves the running context into `*save` and resumes the context `next`.
///
/// `transfer` is delivered to the resumed side: it becomes the return value
/// of the `switch` call that suspended `next`, or the first argument of the
/// entry function if `next` was built by [`prepare`].
///
/// Returns once some later `switch` resumes the context saved here, yielding
/// that call's `transfer`.
///
/// # Safety
///
/// `next` must be a stack pointer returned by [`prepare`] or stored by an
/// earlier `switch`, which has not been resumed since, and whose stack is
/// still alive. `save` must be valid for a write.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut usize, _next: usize, _transfer: usize) -> usize {
    // RDI: save slot, RSI: next stack pointer, RDX: transfer value.
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        // Switch.
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "mov rax, rdx",
        "ret",
    );
}
