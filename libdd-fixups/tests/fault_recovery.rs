// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end fault recovery: these tests take real SIGSEGVs, so they live in
//! their own test binary where installing the process-wide handler cannot
//! interfere with unrelated tests.

#![cfg(target_os = "linux")]

use libdd_fixups::{capture, enter, exit, init, protected};
use std::ptr;

/// Maps one page with no access rights; reading it faults deterministically,
/// unlike a dangling pointer, which might alias a live mapping.
fn inaccessible_page() -> *const u8 {
    // SAFETY: fresh anonymous mapping, never unmapped (tests share it).
    let page = unsafe {
        libc::mmap(
            ptr::null_mut(),
            page_size(),
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    assert_ne!(page, libc::MAP_FAILED, "mmap failed");
    page as *const u8
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[test]
fn protected_read_of_inaccessible_page_is_recovered() {
    init().unwrap();
    let page = inaccessible_page();
    let outcome = protected(|| unsafe { ptr::read_volatile(page) }).unwrap();
    assert_eq!(outcome, None, "the faulting read must not produce a value");

    // The slot was released on the faulted path: the thread can open a fresh
    // scope and complete it normally.
    assert_eq!(protected(|| 1u8).unwrap(), Some(1));
}

#[test]
fn protected_read_of_valid_memory_returns_it() {
    init().unwrap();
    let value = 0x5ca1ab1eu64;
    let outcome = protected(|| unsafe { ptr::read_volatile(&value) }).unwrap();
    assert_eq!(outcome, Some(value));
}

#[test]
fn raw_scope_reports_trigger_state() {
    init().unwrap();
    let page = inaccessible_page();

    let slot = enter().unwrap();
    // SAFETY: the risky read happens inside this frame, before exit.
    unsafe { capture(slot) };
    if !slot.is_triggered() {
        let _ = unsafe { ptr::read_volatile(page) };
        // Unreachable: the read faults and control resumes at the capture
        // point with the trigger set.
        exit(slot);
        panic!("read of PROT_NONE page did not fault");
    }
    assert!(slot.is_triggered());
    exit(slot);
}

#[test]
fn faults_recover_independently_across_threads() {
    init().unwrap();
    let page = inaccessible_page() as usize;

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(move || {
                for round in 0..50 {
                    let outcome = if round % 2 == 0 {
                        protected(|| unsafe { ptr::read_volatile(page as *const u8) }).unwrap()
                    } else {
                        protected(|| round as u8).unwrap()
                    };
                    match (round % 2, outcome) {
                        (0, None) => (),
                        (1, Some(v)) => assert_eq!(v, round as u8),
                        other => panic!("unexpected outcome {other:?}"),
                    }
                }
            });
        }
    });
}
