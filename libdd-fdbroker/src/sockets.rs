// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Abstract unix-socket plumbing shared by the two protocol roles.

use nix::sys::socket::{
    bind, connect, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr,
};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};

/// One connection at a time; a second profiler instance computing the same
/// address is a configuration error, not load to absorb.
const BACKLOG: i32 = 1;

fn socket_stream() -> io::Result<OwnedFd> {
    Ok(socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?)
}

pub(crate) fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    let sock = socket_stream()?;
    let addr = UnixAddr::new_abstract(name.as_bytes())?;
    connect(sock.as_raw_fd(), &addr)?;
    Ok(sock.into())
}

pub(crate) fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    let sock = socket_stream()?;
    let addr = UnixAddr::new_abstract(name.as_bytes())?;
    bind(sock.as_raw_fd(), &addr)?;
    listen(&sock, Backlog::new(BACKLOG)?)?;
    Ok(sock.into())
}
