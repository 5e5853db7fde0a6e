// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request/reply boundary to the focus arbiter.
//
// Concrete backends (RPC bus, legacy message queue) live outside this crate.
// They implement `Transport`; the client only ever sees `Request`/`Reply`.

use crate::error::Result;
use crate::event::FocusType;

/// A request sent to the arbiter. Each variant is one arbiter method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetUniqueId,
    RegisterFocus {
        owner: i32,
        id: i32,
        stream_type: String,
        is_for_session: bool,
    },
    UnregisterFocus {
        owner: i32,
        id: i32,
        is_for_session: bool,
    },
    AcquireFocus {
        owner: i32,
        id: i32,
        focus_type: FocusType,
        option: i32,
        additional_info: String,
        is_for_session: bool,
    },
    ReleaseFocus {
        owner: i32,
        id: i32,
        focus_type: FocusType,
        option: i32,
        additional_info: String,
        is_for_session: bool,
    },
    SetFocusReacquisition {
        owner: i32,
        id: i32,
        reacquire: bool,
    },
    GetFocusReacquisition {
        owner: i32,
        id: i32,
    },
    GetAcquiredFocusStreamType {
        focus_type: FocusType,
    },
    SetFocusWatch {
        owner: i32,
        id: i32,
        focus_type: FocusType,
        is_for_session: bool,
    },
    RequestUnsetFocusWatch {
        owner: i32,
        id: i32,
    },
    UnsetFocusWatch {
        owner: i32,
        id: i32,
        is_for_session: bool,
    },
    /// The process `pid` is dying; drop every handle it owns.
    EmergentExit { pid: i32 },
}

impl Request {
    /// Arbiter method name, used for logging and reply errors.
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetUniqueId => "GetUniqueId",
            Self::RegisterFocus { .. } => "RegisterFocus",
            Self::UnregisterFocus { .. } => "UnregisterFocus",
            Self::AcquireFocus { .. } => "AcquireFocus",
            Self::ReleaseFocus { .. } => "ReleaseFocus",
            Self::SetFocusReacquisition { .. } => "SetFocusReacquisition",
            Self::GetFocusReacquisition { .. } => "GetFocusReacquisition",
            Self::GetAcquiredFocusStreamType { .. } => "GetAcquiredFocusStreamType",
            Self::SetFocusWatch { .. } => "SetFocusWatch",
            Self::RequestUnsetFocusWatch { .. } => "RequestUnsetFocusWatch",
            Self::UnsetFocusWatch { .. } => "UnsetFocusWatch",
            Self::EmergentExit { .. } => "EmergentExit",
        }
    }
}

/// What the stream holding a focus asked for when it acquired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFocus {
    pub stream_type: String,
    pub option: i32,
    pub additional_info: String,
}

/// A successful arbiter reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    UniqueId(i32),
    Reacquisition(bool),
    AcquiredFocus(AcquiredFocus),
}

/// Out-of-band arbiter broadcasts that do not travel over a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArbiterSignal {
    DeviceConnected,
    DeviceInfoChanged,
    VolumeChanged,
    FocusChanged,
}

/// Identifies one `subscribe` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handler for an out-of-band broadcast; receives the raw payload.
pub type SignalHandler = Box<dyn Fn(ArbiterSignal, &[u8]) + Send + Sync>;

/// Synchronous request/reply channel to the arbiter plus broadcast subscription.
///
/// `call` must be bounded by the backend's own timeout. An arbiter-side
/// rejection is reported as [`FocusError::Transport`](crate::FocusError::Transport)
/// carrying the arbiter's code verbatim.
pub trait Transport: Send + Sync {
    fn call(&self, request: Request) -> Result<Reply>;

    /// Subscribe to a broadcast. `filter` is backend-defined (e.g. a device mask).
    fn subscribe(&self, signal: ArbiterSignal, filter: u32, handler: SignalHandler)
        -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Issue a request whose only acceptable reply is [`Reply::Done`].
pub(crate) fn call_done(transport: &dyn Transport, request: Request) -> Result<()> {
    let method = request.method();
    match transport.call(request)? {
        Reply::Done => Ok(()),
        _ => Err(crate::FocusError::UnexpectedReply(method)),
    }
}
