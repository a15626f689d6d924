// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fixup scope lifecycle: claim a record, capture the recovery point,
//! run the risky code, release. Also the signal-side lookup that makes a
//! protected fault resume at the recovery point instead of crashing.

use crate::context;
use crate::signal_handler_manager;
use crate::slot_table::{FixupSlot, SLOTS};
use libc::{c_void, pid_t, siginfo_t, ucontext_t};
use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum FixupError {
    /// Every slot is owned by some thread; the caller must treat the read as
    /// unavailable for this sample rather than run it unprotected.
    #[error("all {} fixup slots are in use", crate::MAX_PROTECTED_THREADS)]
    CapacityExceeded,
}

/// Returns the kernel thread id of the calling thread.
///
/// Raw syscall, usable from the signal-delivery path.
#[inline]
fn current_thread_id() -> pid_t {
    // SAFETY: syscall(SYS_gettid) has no preconditions for the current thread.
    unsafe { libc::syscall(libc::SYS_gettid) as pid_t }
}

/// Installs the SIGSEGV override. Call once before the first [`enter`];
/// additional calls are no-ops.
pub fn init() -> anyhow::Result<()> {
    signal_handler_manager::install()
}

/// Opens a fixup scope for the calling thread.
///
/// The returned record is inert until [`capture`] stores a recovery point in
/// it. Every successful `enter` must be paired with exactly one [`exit`] on
/// the same thread, on both the normal and the faulted path. Entering twice
/// without an intervening exit is a contract violation (debug-fatal).
pub fn enter() -> Result<&'static FixupSlot, FixupError> {
    SLOTS
        .claim(current_thread_id())
        .ok_or(FixupError::CapacityExceeded)
}

/// Captures the recovery point for `slot` in the caller's frame.
///
/// After a protected fault, control returns to just after this call with
/// `slot.is_triggered()` reading true and only callee-saved registers intact.
///
/// # Safety
/// The caller's frame must stay live for the whole protected scope: the
/// risky code must run strictly between this call and [`exit`], within the
/// same function activation.
#[inline(always)]
pub unsafe fn capture(slot: &FixupSlot) {
    context::record(slot.context_ptr());
}

/// Closes a fixup scope. `slot` must be the record [`enter`] returned to
/// this thread.
pub fn exit(slot: &FixupSlot) {
    SLOTS.release(slot, current_thread_id());
}

/// Runs `f` inside a fixup scope.
///
/// `Ok(Some(value))` means `f` ran to completion; `Ok(None)` means an
/// invalid memory access interrupted it and execution was recovered here.
/// On the faulted path `f`'s frame is abandoned wholesale: destructors of
/// values it owned do not run, so the closure should not hold resources that
/// need dropping.
pub fn protected<T>(f: impl FnOnce() -> T) -> Result<Option<T>, FixupError> {
    let slot = enter()?;
    // SAFETY: the recovery point is this frame, which stays live until the
    // scope closes below; `f` runs strictly within it.
    unsafe { capture(slot) };
    if slot.is_triggered() {
        exit(slot);
        return Ok(None);
    }
    let value = f();
    exit(slot);
    Ok(Some(value))
}

/// Resolves a delivered fault against the slot table.
///
/// Returns false when no record owns the faulting thread, in which case the
/// fault is foreign and must be chained. Bounded scan plus two atomic
/// stores; async-signal safe.
fn handle_fixup(ucontext: *mut c_void) -> bool {
    // SIGSEGV is delivered synchronously on the thread that faulted.
    let tid = current_thread_id();
    let Some(slot) = SLOTS.find_by_thread(tid) else {
        return false;
    };
    // SAFETY: the slot is owned by this thread, so its snapshot was filled by
    // `capture` on this thread; `ucontext` is the context the kernel handed
    // to the signal handler.
    unsafe { context::inject(slot.context_ptr(), ucontext as *mut ucontext_t) };
    slot.set_triggered();
    true
}

/// The installed SIGSEGV action: recover our faults, delegate the rest.
pub(crate) extern "C" fn fixup_sigaction(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    // The interrupted code may be mid-inspection of errno.
    let saved_errno = Errno::last_raw();
    if !handle_fixup(ucontext) {
        // SAFETY: only reachable from the handler installed by `install`.
        unsafe { signal_handler_manager::chain_previous_handler(signum, sig_info, ucontext) };
    }
    Errno::set_raw(saved_errno);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_exit_leaves_no_trace() {
        let slot = enter().unwrap();
        assert!(!slot.is_triggered());
        assert_eq!(slot.owner(), current_thread_id());
        exit(slot);
    }

    #[test]
    fn protected_scope_without_fault_returns_value() {
        init().unwrap();
        assert_eq!(protected(|| 7 * 6).unwrap(), Some(42));
    }
}
