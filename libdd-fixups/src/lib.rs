// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fault-isolation barrier for speculative memory reads.
//!
//! A sampling profiler routinely dereferences pointers it found in another
//! thread's stack or heap. Those pointers are usually valid; occasionally they
//! are not, and an unguarded read takes down the whole host process. This
//! crate lets such reads run inside a *fixup scope*: a SIGSEGV delivered while
//! the scope is active is intercepted, execution is rewound to the scope's
//! recovery point, and the caller is told the read never completed. Faults
//! that do not belong to any scope are chained unchanged to whatever handler
//! the host had installed before us.
//!
//! ```no_run
//! libdd_fixups::init()?;
//! let ptr: *const u64 = 0x7f00_dead_0000 as *const u64;
//! match libdd_fixups::protected(|| unsafe { std::ptr::read_volatile(ptr) })? {
//!     Some(value) => println!("read {value}"),
//!     None => println!("address was not readable"),
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

#[cfg(target_os = "linux")]
mod barrier;
#[cfg(target_os = "linux")]
mod context;
#[cfg(target_os = "linux")]
mod signal_handler_manager;
#[cfg(target_os = "linux")]
mod slot_table;

#[cfg(target_os = "linux")]
pub use barrier::{capture, enter, exit, init, protected, FixupError};
#[cfg(target_os = "linux")]
pub use slot_table::{FixupSlot, MAX_PROTECTED_THREADS};
