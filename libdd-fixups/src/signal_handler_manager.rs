// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Installs the process-wide SIGSEGV override, once, and chains faults that
//! are not ours to whatever handler the host had registered before us.

use crate::barrier::fixup_sigaction;
use libc::{c_void, siginfo_t};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, Signal};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;

static INIT_STARTED: AtomicBool = AtomicBool::new(false);
static INIT_FINISHED: AtomicBool = AtomicBool::new(false);
static mut PREVIOUS_HANDLER: Option<SigAction> = None;

/// Replaces the process SIGSEGV action with the fixup handler.
///
/// The override happens at most once per process; later calls are no-ops and
/// report success. The action that was in place beforehand (a JVM installs
/// its own, for instance) is captured and invoked for every fault no fixup
/// record claims.
///
/// ATOMICITY:
///     Guarded by `INIT_STARTED`/`INIT_FINISHED` so that only one caller ever
///     writes `PREVIOUS_HANDLER`, and the chain path never reads it before
///     the write is published.
pub(crate) fn install() -> anyhow::Result<()> {
    if INIT_STARTED.compare_exchange(false, true, SeqCst, SeqCst).is_err() {
        return Ok(());
    }

    let sig_action = SigAction::new(
        SigHandler::SigAction(fixup_sigaction),
        // The handler either resumes the protected thread or delegates; it
        // must stay callable for a fault raised inside a chained handler.
        SaFlags::SA_NODEFER,
        signal::SigSet::empty(),
    );
    // SAFETY: installing a sigaction has no preconditions; the handler only
    // uses async-signal-safe operations.
    let old_handler = unsafe { signal::sigaction(Signal::SIGSEGV, &sig_action)? };
    // SAFETY: `INIT_STARTED` guarantees this store happens on exactly one
    // thread, and `INIT_FINISHED` is not yet published.
    unsafe { PREVIOUS_HANDLER = Some(old_handler) };
    INIT_FINISHED.store(true, SeqCst);
    tracing::debug!("installed process-wide SIGSEGV fixup handler");
    Ok(())
}

/// Forwards a fault no fixup record claimed to the previously installed
/// handler.
///
/// SAFETY: Only called from the signal handler registered by [`install`],
/// which implies `INIT_FINISHED` was observed true and `PREVIOUS_HANDLER`
/// will never be written again.
pub(crate) unsafe fn chain_previous_handler(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    if !INIT_FINISHED.load(SeqCst) {
        // A fault raced handler installation; nothing sane to chain to.
        std::process::abort();
    }
    #[allow(static_mut_refs)]
    let Some(previous) = (unsafe { PREVIOUS_HANDLER.as_ref() }) else {
        std::process::abort();
    };
    match previous.handler() {
        SigHandler::SigDfl => {
            // Restore the default action and re-raise so the process gets
            // the normal termination (and core dump) for a genuine crash.
            let _ = unsafe { signal::sigaction(Signal::SIGSEGV, previous) };
            let _ = unsafe { libc::raise(signum) };
        }
        SigHandler::SigIgn => (),
        SigHandler::Handler(f) => f(signum),
        SigHandler::SigAction(f) => f(signum, sig_info, ucontext),
    }
}
