// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Filesystem names of the notification FIFOs. The arbiter derives the same
// paths from (owner pid, handle id), so these must not change:
//
//   <dir>/FOCUS.<pid>.<handle>    event stream, exclusive handle
//   <dir>/FOCUS.<pid>.<handle>r   ack stream,   exclusive handle
//   <dir>/FOCUS.<pid>.wch         event stream, watch channel of <pid>
//   <dir>/FOCUS.<pid>.wchr        ack stream,   watch channel of <pid>

use std::path::{Path, PathBuf};

use crate::notify::{ChannelKey, Purpose};

pub const FIFO_PREFIX: &str = "FOCUS";

/// Suffix appended to an event stream name to get its ack stream.
pub const ACK_SUFFIX: &str = "r";

fn base_name(key: &ChannelKey) -> String {
    match key.purpose {
        Purpose::Normal(handle_id) => format!("{FIFO_PREFIX}.{}.{handle_id}", key.owner),
        Purpose::Watch => format!("{FIFO_PREFIX}.{}.wch", key.owner),
    }
}

/// Path of the arbiter→client event stream.
pub fn event_path(dir: &Path, key: &ChannelKey) -> PathBuf {
    dir.join(base_name(key))
}

/// Path of the client→arbiter ack stream.
pub fn ack_path(dir: &Path, key: &ChannelKey) -> PathBuf {
    dir.join(format!("{}{ACK_SUFFIX}", base_name(key)))
}
