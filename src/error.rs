// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type shared by every focus client operation.

use std::io;
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the focus client.
#[derive(Error, Debug)]
pub enum FocusError {
    /// A caller-supplied id, type or option was rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Every handle slot is occupied.
    #[error("no free focus handle slots (capacity {0})")]
    Exhausted(usize),

    /// The arbiter rejected the request. The code is the arbiter's own.
    #[error("arbiter rejected request with code {0}")]
    Transport(i32),

    /// The arbiter answered with a reply that does not match the request.
    #[error("unexpected reply to {0} request")]
    UnexpectedReply(&'static str),

    /// Local resource failure: FIFO create/open, pipe, thread spawn.
    #[error("internal error: {0}")]
    Internal(#[from] io::Error),

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl FocusError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// The arbiter's error code, if the failure came from the arbiter.
    pub fn transport_code(&self) -> Option<i32> {
        match self {
            Self::Transport(code) => Some(*code),
            _ => None,
        }
    }
}

/// Convenience alias for results carrying [`FocusError`].
pub type Result<T> = StdResult<T, FocusError>;
