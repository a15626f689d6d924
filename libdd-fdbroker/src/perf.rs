// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Creation of the per-thread sampling counters the broker hands out.

use crate::error::BrokerError;
use libc::pid_t;
use nix::errno::Errno;
use perf_event_open_sys::bindings as perf;
use perf_event_open_sys::ioctls;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Sampling period in CPU-clock nanoseconds (100 Hz).
pub const SAMPLE_PERIOD: u64 = 10_000_000;

/// Seam between the protocol loop and handle creation, so the exchange can be
/// exercised without perf privileges.
pub trait HandleFactory {
    fn create(&self, tid: pid_t) -> Result<OwnedFd, BrokerError>;
}

/// The production factory: a software CPU-clock sampler with call-chain
/// capture, scoped to one thread, created disabled so the requester decides
/// when counting starts.
pub struct PerfCounterFactory;

impl HandleFactory for PerfCounterFactory {
    fn create(&self, tid: pid_t) -> Result<OwnedFd, BrokerError> {
        let mut attr = perf::perf_event_attr::default();
        attr.size = std::mem::size_of_val(&attr) as u32;
        attr.type_ = perf::PERF_TYPE_SOFTWARE;
        attr.config = perf::PERF_COUNT_SW_CPU_CLOCK as u64;
        attr.__bindgen_anon_1.sample_period = SAMPLE_PERIOD;
        attr.sample_type = perf::PERF_SAMPLE_CALLCHAIN as u64;
        attr.set_precise_ip(2);
        attr.set_disabled(1);
        attr.__bindgen_anon_2.wakeup_events = 1;

        let cpu: libc::c_int = -1; // any cpu
        let group_fd: libc::c_int = -1; // standalone counter
        let flags = perf::PERF_FLAG_FD_CLOEXEC as libc::c_ulong;

        // SAFETY: attr is fully initialized and outlives the call.
        let fd = Errno::result(unsafe {
            libc::syscall(libc::SYS_perf_event_open, &attr, tid, cpu, group_fd, flags)
        })
        .map_err(|source| BrokerError::PerfEventOpen { tid, source })?;

        // SAFETY: on success the syscall returned a fresh descriptor we own.
        Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
    }
}

/// Starts a counter received from the broker (they arrive disabled).
pub fn enable(fd: BorrowedFd<'_>) -> std::io::Result<()> {
    // SAFETY: ENABLE only reads the descriptor.
    Errno::result(unsafe { ioctls::ENABLE(fd.as_raw_fd(), 0) })?;
    Ok(())
}
