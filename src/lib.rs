// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client side of audio focus arbitration.
// Registers, acquires, releases and watches focus through an arbiter
// `Transport`, receives grant/revoke events over per-handle notification
// channels (legacy FIFO layout compatible), acks every event once its
// callback has returned, and reports handles left behind on a fatal signal.

mod error;
pub use error::{FocusError, Result};

mod config;
pub use config::{FocusConfig, DEFAULT_MAX_HANDLES};

pub mod event;
pub use event::{FocusAck, FocusEvent, FocusState, FocusType};

pub mod transport;
pub use transport::{
    AcquiredFocus, ArbiterSignal, Reply, Request, SignalHandler, SubscriptionId, Transport,
};

pub mod fifo_name;

mod platform;

pub mod handle_table;
pub use handle_table::{HandleClass, HandleTable, SlotIndex, FREE_ID};

pub mod notify;
pub use notify::{
    ChannelKey, FifoNotifier, FifoPeer, MemoryNotifier, NotificationTransport, PeerChannel,
    Purpose,
};

mod dispatch;
pub use dispatch::DispatchLoop;

mod crash_guard;
pub use crash_guard::{CrashGuard, ExitNotifier, FATAL_SIGNALS};

mod client;
pub use client::FocusClient;
