// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Register-context snapshots for fault recovery.
//!
//! A snapshot is a plain `ucontext_t` filled by `getcontext(3)` at the
//! recovery point. When a protected fault is handled, [`inject`] copies the
//! resumable subset of that snapshot over the context the kernel delivered to
//! the signal handler, so that returning from the handler resumes the thread
//! at the recovery point instead of the faulting instruction.
//!
//! Only the callee-saved registers plus stack and instruction pointers are
//! copied. Caller-saved registers keep their fault-time values, which is the
//! state a normal return from the recovery-point call would leave them in.
//! `setcontext(3)` is unusable here: it would jump into the saved context
//! immediately instead of editing the one the kernel is about to resume.

use libc::ucontext_t;

// glibc declares getcontext for every architecture, the libc crate only on
// x86_64.
extern "C" {
    fn getcontext(ucp: *mut ucontext_t) -> libc::c_int;
}

/// Records the calling thread's context into `snapshot`.
///
/// Control returns here a second time, with `ret == 0` again, when a handled
/// fault injects the snapshot; callers distinguish the two returns through
/// the owning slot's `triggered` flag, never through the return value.
///
/// # Safety
/// `snapshot` must point to writable storage that outlives the protected
/// scope.
#[inline(always)]
pub(crate) unsafe fn record(snapshot: *mut ucontext_t) {
    // Cannot fail for the calling thread's own context.
    let _ = getcontext(snapshot);
}

/// Copies the resumable registers of `snapshot` into `delivered`, the context
/// the kernel built when it interrupted the faulting thread.
///
/// # Safety
/// Both pointers must be valid; `snapshot` must have been filled by
/// [`record`] on the same thread that `delivered` belongs to. Only called
/// from the signal-delivery path.
#[cfg(target_arch = "x86_64")]
pub(crate) unsafe fn inject(snapshot: *const ucontext_t, delivered: *mut ucontext_t) {
    use libc::{REG_R12, REG_R13, REG_R14, REG_R15, REG_RBP, REG_RBX, REG_RIP, REG_RSP};

    let saved = &(*snapshot).uc_mcontext.gregs;
    let gregs = &mut (*delivered).uc_mcontext.gregs;
    for reg in [
        REG_RBX, REG_RBP, REG_R12, REG_R13, REG_R14, REG_R15, REG_RSP, REG_RIP,
    ] {
        gregs[reg as usize] = saved[reg as usize];
    }
}

/// Copies the resumable registers of `snapshot` into `delivered`.
///
/// # Safety
/// Same contract as the x86_64 variant.
#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn inject(snapshot: *const ucontext_t, delivered: *mut ucontext_t) {
    let saved = &(*snapshot).uc_mcontext;
    let ctx = &mut (*delivered).uc_mcontext;
    // x19..x28 are callee-saved; x29 is the frame pointer, x30 the link
    // register the recovery point will return through.
    for i in 19..=30 {
        ctx.regs[i] = saved.regs[i];
    }
    ctx.sp = saved.sp;
    ctx.pc = saved.pc;
}
