// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Focus notifications and their fixed-size wire records.
//
// The arbiter writes the event record as a raw C struct, so every integer is
// a native-endian i32 and every string a NUL-terminated fixed array:
//
//   offset  size  field
//        0     4  pid
//        4     4  handle
//        8     4  type        (FocusType)
//       12     4  state       (FocusState)
//       16    64  stream_type (reason for the change)
//       80    64  name        (requester name)
//      144   256  ext_info    (additional info)
//
// The ack record is a single i32.

use std::fmt;

use crate::error::{FocusError, Result};

pub const MAX_STREAM_TYPE_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_EXT_INFO_LEN: usize = 256;

/// Size in bytes of one event record on the wire.
pub const EVENT_RECORD_SIZE: usize = 16 + MAX_STREAM_TYPE_LEN + MAX_NAME_LEN + MAX_EXT_INFO_LEN;

/// Size in bytes of one ack record on the wire.
pub const ACK_RECORD_SIZE: usize = 4;

/// Ack value written on a watch channel when no specific handle applies.
pub const WATCH_ACK_SENTINEL: i32 = -1;

/// Which direction of audio a focus covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusType {
    Playback,
    Capture,
    Both,
}

impl FocusType {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Playback => 1,
            Self::Capture => 2,
            Self::Both => 3,
        }
    }

    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Playback),
            2 => Ok(Self::Capture),
            3 => Ok(Self::Both),
            other => Err(FocusError::invalid(format!("unknown focus type {other}"))),
        }
    }

    /// Whether a change of `other` is visible through this filter.
    pub fn covers(self, other: Self) -> bool {
        self.as_raw() & other.as_raw() != 0
    }
}

/// State a focus moved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusState {
    Released,
    Acquired,
}

impl FocusState {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Released => 0,
            Self::Acquired => 1,
        }
    }

    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Released),
            1 => Ok(Self::Acquired),
            other => Err(FocusError::invalid(format!("unknown focus state {other}"))),
        }
    }
}

impl fmt::Display for FocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => f.write_str("released"),
            Self::Acquired => f.write_str("acquired"),
        }
    }
}

/// A focus change pushed by the arbiter to one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    /// Pid stamped into the record by the arbiter.
    pub pid: i32,
    /// Focus id, or watch id for events on a watch channel.
    pub handle_id: i32,
    pub focus_type: FocusType,
    pub new_state: FocusState,
    pub reason: String,
    pub additional_info: String,
    pub requester_name: String,
}

impl FocusEvent {
    pub fn new(handle_id: i32, focus_type: FocusType, new_state: FocusState) -> Self {
        Self {
            pid: 0,
            handle_id,
            focus_type,
            new_state,
            reason: String::new(),
            additional_info: String::new(),
            requester_name: String::new(),
        }
    }

    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_owned();
        self
    }

    pub fn with_additional_info(mut self, info: &str) -> Self {
        self.additional_info = info.to_owned();
        self
    }

    pub fn with_requester(mut self, name: &str) -> Self {
        self.requester_name = name.to_owned();
        self
    }

    /// Encode into the fixed-size wire record. Over-long strings are truncated.
    pub fn to_record(&self) -> [u8; EVENT_RECORD_SIZE] {
        let mut buf = [0u8; EVENT_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.pid.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.handle_id.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.focus_type.as_raw().to_ne_bytes());
        buf[12..16].copy_from_slice(&self.new_state.as_raw().to_ne_bytes());
        let (stream_type, rest) = buf[16..].split_at_mut(MAX_STREAM_TYPE_LEN);
        let (name, ext_info) = rest.split_at_mut(MAX_NAME_LEN);
        copy_str(stream_type, &self.reason);
        copy_str(name, &self.requester_name);
        copy_str(ext_info, &self.additional_info);
        buf
    }

    /// Decode a wire record. Fails on unknown type or state values.
    pub fn from_record(buf: &[u8; EVENT_RECORD_SIZE]) -> Result<Self> {
        let stream_type = &buf[16..16 + MAX_STREAM_TYPE_LEN];
        let name = &buf[16 + MAX_STREAM_TYPE_LEN..16 + MAX_STREAM_TYPE_LEN + MAX_NAME_LEN];
        let ext_info = &buf[16 + MAX_STREAM_TYPE_LEN + MAX_NAME_LEN..];
        Ok(Self {
            pid: read_i32(buf, 0),
            handle_id: read_i32(buf, 4),
            focus_type: FocusType::from_raw(read_i32(buf, 8))?,
            new_state: FocusState::from_raw(read_i32(buf, 12))?,
            reason: read_str(stream_type),
            requester_name: read_str(name),
            additional_info: read_str(ext_info),
        })
    }
}

/// Acknowledgment that the callback for `handle_id` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusAck {
    pub handle_id: i32,
}

impl FocusAck {
    pub fn new(handle_id: i32) -> Self {
        Self { handle_id }
    }

    pub fn to_record(self) -> [u8; ACK_RECORD_SIZE] {
        self.handle_id.to_ne_bytes()
    }

    pub fn from_record(buf: [u8; ACK_RECORD_SIZE]) -> Self {
        Self {
            handle_id: i32::from_ne_bytes(buf),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_i32(buf: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    i32::from_ne_bytes(raw)
}

/// Copy `src` into `dst`, truncating on a char boundary so a NUL always fits.
fn copy_str(dst: &mut [u8], src: &str) {
    let mut len = src.len().min(dst.len() - 1);
    while !src.is_char_boundary(len) {
        len -= 1;
    }
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
    dst[len] = 0;
}

fn read_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}
