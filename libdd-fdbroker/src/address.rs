// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Derives the broker's abstract-socket name from the target's PID-namespace
//! identity.
//!
//! Two unrelated profiler instances must never rendezvous: a pid alone is
//! ambiguous across namespaces, so the name also carries the inode of the
//! target's PID-namespace (a stable per-instance identifier the kernel
//! exposes through `/proc/<pid>/ns/pid`). Abstract addresses live outside
//! the filesystem, so nothing needs cleaning up when the broker dies.

use crate::error::BrokerError;
use libc::pid_t;
use std::fs;
use std::path::Path;

pub const SOCKET_PREFIX: &str = "fdbroker";

/// `sun_path` capacity minus the leading NUL that marks an abstract address.
const SUN_PATH_MAX: usize = 107;

const SELF_NS_PID: &str = "/proc/self/ns/pid";

/// Resolves the PID-namespace identifier of `pid`.
///
/// Hosts without PID-namespace support get the 0 sentinel, so both sides of
/// the rendezvous still derive identical names there.
pub fn pid_namespace_inode(pid: pid_t) -> Result<u64, BrokerError> {
    if !Path::new(SELF_NS_PID).exists() {
        return Ok(0);
    }
    let link = fs::read_link(format!("/proc/{pid}/ns/pid"))
        .map_err(|source| BrokerError::NamespaceResolution { pid, source })?;
    link.to_str()
        .and_then(parse_ns_link)
        .ok_or_else(|| BrokerError::NamespaceResolution {
            pid,
            source: std::io::Error::other(format!("malformed ns link {link:?}")),
        })
}

/// Parses the `pid:[4026531836]` form of a namespace symlink target.
fn parse_ns_link(link: &str) -> Option<u64> {
    link.strip_prefix("pid:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Formats the rendezvous name for a (namespace, pid) pair. Deterministic:
/// both roles compute it independently and must land on the same bytes.
pub fn socket_name(ns_inode: u64, pid: pid_t) -> Result<String, BrokerError> {
    let name = format!("{SOCKET_PREFIX}-{ns_inode}-{pid}");
    check_name_len(name)
}

/// The full derivation: resolve the target's namespace, then format.
pub fn broker_socket_name(pid: pid_t) -> Result<String, BrokerError> {
    socket_name(pid_namespace_inode(pid)?, pid)
}

/// Rejects names the fixed-size `sockaddr_un` buffer cannot hold. Also used
/// for caller-supplied explicit names.
pub(crate) fn check_name_len(name: String) -> Result<String, BrokerError> {
    if name.len() > SUN_PATH_MAX {
        return Err(BrokerError::AddressTooLong {
            name,
            max: SUN_PATH_MAX,
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_name_is_deterministic() {
        assert_eq!(socket_name(0, 4242).unwrap(), socket_name(0, 4242).unwrap());
        assert_eq!(socket_name(0, 4242).unwrap(), "fdbroker-0-4242");
        assert_eq!(
            socket_name(4026531836, 17).unwrap(),
            "fdbroker-4026531836-17"
        );
    }

    #[test]
    fn distinct_targets_get_distinct_names() {
        assert_ne!(socket_name(0, 4242).unwrap(), socket_name(0, 4243).unwrap());
        assert_ne!(socket_name(1, 4242).unwrap(), socket_name(2, 4242).unwrap());
    }

    #[test]
    fn oversized_names_are_rejected() {
        let err = check_name_len("x".repeat(SUN_PATH_MAX + 1)).unwrap_err();
        assert!(matches!(err, BrokerError::AddressTooLong { max, .. } if max == SUN_PATH_MAX));
        assert!(check_name_len("x".repeat(SUN_PATH_MAX)).is_ok());
    }

    #[test]
    fn ns_link_parsing() {
        assert_eq!(parse_ns_link("pid:[4026531836]"), Some(4026531836));
        assert_eq!(parse_ns_link("net:[4026531836]"), None);
        assert_eq!(parse_ns_link("pid:[not-a-number]"), None);
        assert_eq!(parse_ns_link("pid:[123"), None);
    }

    #[test]
    fn own_namespace_resolves_stably() {
        let pid = std::process::id() as pid_t;
        let first = pid_namespace_inode(pid).unwrap();
        let second = pid_namespace_inode(pid).unwrap();
        assert_eq!(first, second);
        // Every modern kernel has PID namespaces; the sentinel only shows up
        // on hosts without them.
        if Path::new(SELF_NS_PID).exists() {
            assert_ne!(first, 0);
        }
    }

    #[test]
    fn dead_process_fails_resolution() {
        if !Path::new(SELF_NS_PID).exists() {
            return;
        }
        // pid_t::MAX is far above any real pid_max.
        let err = pid_namespace_inode(pid_t::MAX).unwrap_err();
        assert!(matches!(err, BrokerError::NamespaceResolution { .. }));
    }
}
