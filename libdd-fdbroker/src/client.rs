// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The requester role: connect to the broker and trade thread ids for
//! counter descriptors.

use crate::address;
use crate::error::BrokerError;
use crate::sockets;
use libc::pid_t;
use sendfd::RecvWithFd;
use std::io::Write;
use std::mem::size_of;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::debug;

/// Connection attempts before giving up on a broker that never listens.
pub const CONNECT_RETRIES: u32 = 10;
/// Pause between attempts while the broker is still starting.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct BrokerClient {
    stream: UnixStream,
}

impl BrokerClient {
    /// Connects to the broker serving `pid`, deriving the same rendezvous
    /// name the broker derived.
    pub fn connect(pid: pid_t) -> Result<Self, BrokerError> {
        Self::connect_name(address::broker_socket_name(pid)?)
    }

    /// Connects to an explicitly named abstract address.
    ///
    /// `ECONNREFUSED` means the broker has not bound the address yet and is
    /// retried on a fixed short schedule; any other failure is immediate.
    /// There is no read timeout once connected: a wedged broker blocks the
    /// requester, which is accepted for this strictly-paired protocol.
    pub fn connect_name(name: String) -> Result<Self, BrokerError> {
        let name = address::check_name_len(name)?;
        let mut attempts = 0;
        loop {
            match sockets::connect_abstract(&name) {
                Ok(stream) => {
                    debug!(%name, attempts, "connected to fd broker");
                    return Ok(Self { stream });
                }
                Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
                    attempts += 1;
                    if attempts == CONNECT_RETRIES {
                        return Err(BrokerError::ConnectionRefused { name, attempts });
                    }
                    debug!(%name, attempts, "broker not listening yet");
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Requests a counter descriptor for `tid` and blocks for the response.
    ///
    /// May be called repeatedly on one connection, one request in flight at
    /// a time. An unexpected close means the broker could not create the
    /// handle (the wire format carries no error reply).
    pub fn request_fd(&mut self, tid: pid_t) -> Result<OwnedFd, BrokerError> {
        self.stream.write_all(&tid.to_ne_bytes())?;

        let mut buf = [0u8; size_of::<pid_t>()];
        let mut fds: [RawFd; 1] = [-1];
        let mut filled = 0;
        let mut handle: Option<OwnedFd> = None;
        while filled < buf.len() {
            let (n, fd_count) = self.stream.recv_with_fd(&mut buf[filled..], &mut fds)?;
            if fd_count > 0 {
                // SAFETY: the kernel installed a fresh descriptor for the
                // SCM_RIGHTS payload; it is ours to own and close.
                handle = Some(unsafe { OwnedFd::from_raw_fd(fds[0]) });
            }
            if n == 0 {
                return Err(BrokerError::UnexpectedEof);
            }
            filled += n;
        }

        let got = pid_t::from_ne_bytes(buf);
        let handle = handle.ok_or(BrokerError::MissingDescriptor { tid })?;
        if got != tid {
            return Err(BrokerError::TidMismatch { want: tid, got });
        }
        debug!(tid, "received counter descriptor");
        Ok(handle)
    }
}
