// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The target's PID-namespace identity could not be resolved, typically
    /// because the process exited. Not retried; the connection attempt is
    /// abandoned.
    #[error("cannot resolve pid namespace of process {pid}: {source}")]
    NamespaceResolution { pid: i32, source: io::Error },

    /// The derived name does not fit the abstract socket address buffer.
    #[error("socket name `{name}` exceeds the {max}-byte abstract address limit")]
    AddressTooLong { name: String, max: usize },

    /// The broker never started listening within the retry budget.
    #[error("broker socket `{name}` refused connection {attempts} times")]
    ConnectionRefused { name: String, attempts: u32 },

    /// The peer closed the stream mid-exchange. The protocol has no error
    /// reply, so this is also how a broker-side counter-creation failure
    /// surfaces to the client.
    #[error("connection closed before the exchange completed")]
    UnexpectedEof,

    /// The in-band thread id of a response did not match the request.
    #[error("response tagged for thread {got}, expected {want}")]
    TidMismatch { want: i32, got: i32 },

    /// A response arrived without ancillary data.
    #[error("response for thread {tid} carried no file descriptor")]
    MissingDescriptor { tid: i32 },

    #[error("perf_event_open failed for thread {tid}: {source}")]
    PerfEventOpen {
        tid: i32,
        source: nix::errno::Errno,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
