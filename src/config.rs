// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tunables for the focus client.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of focus handle slots per process.
pub const DEFAULT_MAX_HANDLES: usize = 512;

/// Configuration for a [`FocusClient`](crate::FocusClient).
#[derive(Debug, Clone)]
pub struct FocusConfig {
    /// Directory holding the notification FIFOs. The arbiter must agree on it.
    pub fifo_dir: PathBuf,
    /// Capacity of the handle table.
    pub max_handles: usize,
    /// How long unregister waits for an in-flight callback before proceeding anyway.
    pub unregister_wait: Duration,
    /// How long one dispatch wait lasts before the loop re-checks its stop flag.
    pub dispatch_poll: Duration,
    /// How long a fatal signal handler waits for the arbiter to be told about the exit.
    pub crash_notify_timeout: Duration,
    /// Install handlers for fatal signals when the client is created.
    pub install_crash_guard: bool,
}

impl FocusConfig {
    pub fn new() -> Self {
        Self {
            fifo_dir: PathBuf::from("/tmp"),
            max_handles: DEFAULT_MAX_HANDLES,
            unregister_wait: Duration::from_millis(2500),
            dispatch_poll: Duration::from_millis(500),
            crash_notify_timeout: Duration::from_millis(1000),
            install_crash_guard: true,
        }
    }

    pub fn with_fifo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fifo_dir = dir.into();
        self
    }

    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    pub fn with_unregister_wait(mut self, wait: Duration) -> Self {
        self.unregister_wait = wait;
        self
    }

    pub fn with_dispatch_poll(mut self, poll: Duration) -> Self {
        self.dispatch_poll = poll;
        self
    }

    pub fn with_crash_notify_timeout(mut self, timeout: Duration) -> Self {
        self.crash_notify_timeout = timeout;
        self
    }

    pub fn with_crash_guard(mut self, install: bool) -> Self {
        self.install_crash_guard = install;
        self
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self::new()
    }
}
