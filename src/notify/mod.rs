// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-handle notification channels: the arbiter pushes a `FocusEvent` down
// one stream and waits for a `FocusAck` on the other.
//
// Two backends implement `NotificationTransport`:
// - `fifo`   : the legacy named-FIFO layout the arbiter speaks
// - `memory` : in-process queues, for tests and embedding

use std::time::Duration;

use crate::error::Result;
use crate::event::{FocusAck, FocusEvent, WATCH_ACK_SENTINEL};
use crate::handle_table::HandleClass;

pub mod fifo;
pub mod memory;

pub use fifo::{FifoNotifier, FifoPeer, PeerChannel};
pub use memory::MemoryNotifier;

/// What a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Events for one exclusive focus handle.
    Normal(i32),
    /// Events for every watch registration of the owner.
    Watch,
}

/// Identifies one channel: its owner pid and purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub owner: i32,
    pub purpose: Purpose,
}

impl ChannelKey {
    pub fn focus(owner: i32, handle_id: i32) -> Self {
        Self {
            owner,
            purpose: Purpose::Normal(handle_id),
        }
    }

    pub fn watch(owner: i32) -> Self {
        Self {
            owner,
            purpose: Purpose::Watch,
        }
    }

    /// Id space of the handle ids carried by events on this channel.
    pub fn class(&self) -> HandleClass {
        match self.purpose {
            Purpose::Normal(_) => HandleClass::Focus,
            Purpose::Watch => HandleClass::Watch,
        }
    }

    /// Ack written when the channel is torn down.
    pub fn final_ack(&self) -> FocusAck {
        match self.purpose {
            Purpose::Normal(handle_id) => FocusAck::new(handle_id),
            Purpose::Watch => FocusAck::new(WATCH_ACK_SENTINEL),
        }
    }
}

/// Client half of the notification channels.
///
/// `open` and `close` are reference-counted per key: several watch
/// registrations of one owner share one channel, which exists from the
/// first `open` to the matching last `close`. Every operation is
/// best-effort and none of them may block indefinitely.
pub trait NotificationTransport: Send + Sync {
    /// Create the event/ack pair for `key` (or take another reference to it)
    /// and start listening on the event stream.
    fn open(&self, key: ChannelKey) -> Result<()>;

    /// Drop one reference. The last one stops listening, writes a final ack
    /// for a peer that may still be waiting, and removes the streams.
    /// Failures are logged. Closing an unknown key is a no-op.
    fn close(&self, key: ChannelKey);

    /// Tell the peer the callback for `ack.handle_id` finished. A peer that
    /// is no longer listening is not an error.
    fn send_ack(&self, key: ChannelKey, ack: FocusAck) -> Result<()>;

    /// Wait up to `timeout` for the next event on any open channel.
    /// `Ok(None)` on timeout or [`wake`](Self::wake).
    fn next_event(&self, timeout: Duration) -> Result<Option<(ChannelKey, FocusEvent)>>;

    /// Interrupt a pending [`next_event`](Self::next_event).
    fn wake(&self);

    fn is_open(&self, key: ChannelKey) -> bool;
}
