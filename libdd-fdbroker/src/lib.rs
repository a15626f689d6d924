// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-namespace broker for per-thread perf-counter descriptors.
//!
//! A profiler that samples a containerized process cannot always call
//! `perf_event_open(2)` itself: the target's threads live in another PID
//! namespace and the syscall needs privileges the profiler was deliberately
//! not given. The broker splits the work: a privileged `fdbroker` process is
//! started inside the target's namespaces, binds an abstract unix socket
//! whose name both sides derive from the target's PID-namespace identity, and
//! answers thread-id requests by opening a software-clock sampling counter
//! for that thread and passing the descriptor back as `SCM_RIGHTS` ancillary
//! data.
//!
//! The wire format is deliberately minimal: a request is one native-endian
//! `i32` thread id, a response echoes the id with exactly one descriptor
//! attached, and a failed counter creation simply terminates the connection.
//! There is no error reply and no version field, for byte-compatibility with
//! existing peers; clients treat an unexpected close as "request failed".

mod error;

#[cfg(target_os = "linux")]
mod address;
#[cfg(target_os = "linux")]
mod client;
#[cfg(target_os = "linux")]
mod perf;
#[cfg(target_os = "linux")]
mod server;
#[cfg(target_os = "linux")]
mod sockets;

pub use error::BrokerError;

#[cfg(target_os = "linux")]
pub use address::{broker_socket_name, pid_namespace_inode, socket_name, SOCKET_PREFIX};
#[cfg(target_os = "linux")]
pub use client::{BrokerClient, CONNECT_RETRIES, CONNECT_RETRY_DELAY};
#[cfg(target_os = "linux")]
pub use perf::{enable, HandleFactory, PerfCounterFactory, SAMPLE_PERIOD};
#[cfg(target_os = "linux")]
pub use server::{broker_entry_point, BrokerServer};
