// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The broker role: accept a profiler connection and answer its thread-id
//! requests with freshly created counter descriptors.

use crate::address;
use crate::error::BrokerError;
use crate::perf::{HandleFactory, PerfCounterFactory};
use crate::sockets;
use libc::pid_t;
use sendfd::SendWithFd;
use std::io::{self, ErrorKind, Read};
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

pub struct BrokerServer<F: HandleFactory = PerfCounterFactory> {
    listener: UnixListener,
    factory: F,
    name: String,
}

impl BrokerServer<PerfCounterFactory> {
    /// Binds the abstract address derived for `pid` and creates real perf
    /// counters for each request.
    pub fn bind(pid: pid_t) -> Result<Self, BrokerError> {
        let name = address::broker_socket_name(pid)?;
        Self::bind_name(name, PerfCounterFactory)
    }
}

impl<F: HandleFactory> BrokerServer<F> {
    /// Binds an explicitly named abstract address with a caller-chosen
    /// factory. The name must match what the peer computes or is told.
    pub fn bind_name(name: String, factory: F) -> Result<Self, BrokerError> {
        let name = address::check_name_len(name)?;
        let listener = sockets::bind_abstract(&name)?;
        debug!(%name, "fd broker listening");
        Ok(Self {
            listener,
            factory,
            name,
        })
    }

    /// The rendezvous name this server is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepts one connection and serves it to completion.
    ///
    /// Returns `Ok(())` when the client closes the connection after its last
    /// request; that end-of-stream is the protocol's "no more requests".
    pub fn run(&self) -> Result<(), BrokerError> {
        let (stream, _) = self.listener.accept()?;
        self.serve_connection(stream)
    }

    /// Request/response loop over one established stream.
    ///
    /// A handle-creation failure tears the connection down without a reply;
    /// the wire format has no error message and the peer treats the close as
    /// "request failed".
    pub fn serve_connection(&self, stream: UnixStream) -> Result<(), BrokerError> {
        loop {
            let tid = match read_request(&stream)? {
                Some(tid) => tid,
                None => {
                    debug!("client closed the request stream, shutting down cleanly");
                    return Ok(());
                }
            };
            let handle = self.factory.create(tid).inspect_err(|error| {
                warn!(tid, %error, "handle creation failed, dropping connection");
            })?;
            send_response(&stream, tid, handle.as_fd())?;
            debug!(tid, "passed counter descriptor");
        }
    }
}

/// Reads one fixed-size thread-id request. `None` is a clean end-of-stream
/// before the first byte; EOF mid-request is an error.
fn read_request(mut stream: &UnixStream) -> Result<Option<pid_t>, BrokerError> {
    let mut buf = [0u8; size_of::<pid_t>()];
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(BrokerError::UnexpectedEof),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(pid_t::from_ne_bytes(buf)))
}

/// Echoes the thread id with the descriptor attached as ancillary data. The
/// id is redundant while requests are strictly serial, but keeps responses
/// self-describing if the protocol ever pipelines.
fn send_response(stream: &UnixStream, tid: pid_t, fd: BorrowedFd<'_>) -> Result<(), BrokerError> {
    let payload = tid.to_ne_bytes();
    let sent = stream.send_with_fd(&payload, &[fd.as_raw_fd()])?;
    if sent != payload.len() {
        return Err(io::Error::new(ErrorKind::WriteZero, "short descriptor-passing send").into());
    }
    Ok(())
}

/// Entry point of the `fdbroker` executable: serve counter requests for the
/// process given as the single positional argument (a namespace-local pid).
pub fn broker_entry_point() -> anyhow::Result<()> {
    use anyhow::Context;

    let mut args = std::env::args().skip(1);
    let pid = args
        .next()
        .context("usage: fdbroker <nspid>")?
        .parse::<pid_t>()
        .context("nspid must be a numeric process id")?;
    anyhow::ensure!(args.next().is_none(), "usage: fdbroker <nspid>");

    BrokerServer::bind(pid)?.run()?;
    Ok(())
}
