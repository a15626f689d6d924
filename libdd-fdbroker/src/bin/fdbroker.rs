// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

// Privileged side of the counter-descriptor exchange. Run inside the target's
// namespaces, e.g. `nsenter -t <pid> -n -p fdbroker <nspid>`.

#[cfg(not(target_os = "linux"))]
fn main() {}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    libdd_fdbroker::broker_entry_point()
}
