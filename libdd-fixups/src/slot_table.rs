// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity table of in-flight fixup records, indexed by thread id.
//!
//! The table is a static arena: it is never resized, never allocates, and all
//! ownership transitions are single compare-and-swaps on `owner_tid`. That
//! keeps every operation the signal-delivery path needs (a bounded linear
//! scan and two atomic stores) async-signal safe.

use libc::{pid_t, ucontext_t};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicI32};

/// Upper bound on threads holding a protected scope at the same time. This is
/// a tunable constant, not an architectural limit, but it must stay fixed for
/// the lifetime of the process.
pub const MAX_PROTECTED_THREADS: usize = 128;

/// One in-flight fixup record.
///
/// `owner_tid == 0` marks a free slot. A non-zero owner is set by exactly one
/// thread (compare-and-swap in [`FixupSlotTable::claim`]) and cleared only by
/// that thread. `triggered` is written by the signal path of the owning
/// thread and read by the owner after the protected block returns, so plain
/// atomic stores/loads are enough.
pub struct FixupSlot {
    owner_tid: AtomicI32,
    triggered: AtomicBool,
    saved_context: UnsafeCell<MaybeUninit<ucontext_t>>,
}

// SAFETY: `saved_context` is only written between claim and the first risky
// access (owner thread) and only read by the signal handler running *on* the
// owner thread; `owner_tid` and `triggered` are atomics.
unsafe impl Sync for FixupSlot {}

impl FixupSlot {
    const fn new() -> Self {
        Self {
            owner_tid: AtomicI32::new(0),
            triggered: AtomicBool::new(false),
            saved_context: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// True iff a protected fault was recovered through this record since it
    /// was last claimed.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(SeqCst)
    }

    pub(crate) fn set_triggered(&self) {
        self.triggered.store(true, SeqCst);
    }

    pub(crate) fn owner(&self) -> pid_t {
        self.owner_tid.load(SeqCst)
    }

    pub(crate) fn context_ptr(&self) -> *mut ucontext_t {
        self.saved_context.get().cast()
    }
}

pub(crate) struct FixupSlotTable {
    slots: [FixupSlot; MAX_PROTECTED_THREADS],
}

pub(crate) static SLOTS: FixupSlotTable = FixupSlotTable::new();

impl FixupSlotTable {
    pub(crate) const fn new() -> Self {
        const FREE: FixupSlot = FixupSlot::new();
        Self {
            slots: [FREE; MAX_PROTECTED_THREADS],
        }
    }

    /// Claims a free slot for `tid` and resets its `triggered` flag.
    ///
    /// Returns `None` when every slot is owned. A thread that already owns a
    /// slot must not claim another one; that is a contract violation by the
    /// caller, checked in debug builds.
    pub(crate) fn claim(&self, tid: pid_t) -> Option<&FixupSlot> {
        debug_assert!(tid != 0, "claim requires a real thread id");
        debug_assert!(
            self.find_by_thread(tid).is_none(),
            "thread {tid} entered a fixup scope it never exited"
        );
        for slot in &self.slots {
            if slot.owner_tid.compare_exchange(0, tid, SeqCst, SeqCst).is_ok() {
                slot.triggered.store(false, SeqCst);
                return Some(slot);
            }
        }
        None
    }

    /// Releases `slot`, which must be owned by `tid`.
    pub(crate) fn release(&self, slot: &FixupSlot, tid: pid_t) {
        debug_assert_eq!(
            slot.owner(),
            tid,
            "fixup slot released by a thread that does not own it"
        );
        slot.owner_tid.store(0, SeqCst);
    }

    /// Finds the record owned by `tid`, if any.
    ///
    /// Called from the signal-delivery path: bounded scan, no allocation, no
    /// locking. Claim-time checking keeps owners unique, so the first match
    /// is the only match.
    pub(crate) fn find_by_thread(&self, tid: pid_t) -> Option<&FixupSlot> {
        self.slots.iter().find(|slot| slot.owner() == tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn claim_then_release_round_trip() {
        let table = FixupSlotTable::new();
        let slot = table.claim(41).expect("fresh table has room");
        assert_eq!(slot.owner(), 41);
        assert!(!slot.is_triggered());
        assert!(std::ptr::eq(table.find_by_thread(41).unwrap(), slot));
        table.release(slot, 41);
        assert!(table.find_by_thread(41).is_none());
    }

    #[test]
    fn claim_resets_triggered() {
        let table = FixupSlotTable::new();
        let slot = table.claim(7).unwrap();
        slot.set_triggered();
        table.release(slot, 7);
        let slot = table.claim(7).unwrap();
        assert!(!slot.is_triggered());
        table.release(slot, 7);
    }

    #[test]
    fn claim_fails_when_full() {
        let table = FixupSlotTable::new();
        let mut held = Vec::new();
        for tid in 1..=MAX_PROTECTED_THREADS as pid_t {
            held.push((table.claim(tid).expect("table not yet full"), tid));
        }
        assert!(table.claim(9999).is_none());
        let (slot, tid) = held.pop().unwrap();
        table.release(slot, tid);
        assert!(table.claim(9999).is_some());
    }

    #[test]
    fn concurrent_claims_never_alias_a_slot() {
        const THREADS: pid_t = 8;
        const CYCLES: usize = 200;

        static TABLE: FixupSlotTable = FixupSlotTable::new();
        let in_use: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());

        std::thread::scope(|scope| {
            for t in 1..=THREADS {
                let in_use = &in_use;
                scope.spawn(move || {
                    for _ in 0..CYCLES {
                        let slot = TABLE.claim(t).expect("capacity far above thread count");
                        let key = slot as *const FixupSlot as usize;
                        assert!(
                            in_use.lock().unwrap().insert(key),
                            "two threads own the same slot"
                        );
                        assert_eq!(slot.owner(), t);
                        assert!(in_use.lock().unwrap().remove(&key));
                        TABLE.release(slot, t);
                    }
                });
            }
        });

        for t in 1..=THREADS {
            assert!(TABLE.find_by_thread(t).is_none(), "slot leaked by {t}");
        }
    }
}
