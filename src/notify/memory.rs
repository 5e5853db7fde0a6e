// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process notification channels backed by crossbeam queues. Behaves like
// the FIFO backend as seen from the client: events for closed channels are
// lost, acks nobody waits for are dropped, close acks an outstanding event.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{ChannelKey, NotificationTransport};
use crate::error::{FocusError, Result};
use crate::event::{FocusAck, FocusEvent};

enum Wire {
    Event(ChannelKey, FocusEvent),
    Wake,
}

#[derive(Default)]
struct ChannelState {
    refs: usize,
    /// Events pushed but not yet acknowledged.
    outstanding: usize,
}

/// Notification channels that never leave the process.
pub struct MemoryNotifier {
    channels: Mutex<HashMap<ChannelKey, ChannelState>>,
    events_tx: Sender<Wire>,
    events_rx: Receiver<Wire>,
    acks_tx: Sender<(ChannelKey, FocusAck)>,
    acks_rx: Receiver<(ChannelKey, FocusAck)>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        let (acks_tx, acks_rx) = unbounded();
        Self {
            channels: Mutex::new(HashMap::new()),
            events_tx,
            events_rx,
            acks_tx,
            acks_rx,
        }
    }

    /// Arbiter side: queue `event` on `key`. Fails like a FIFO write would
    /// when the client has no such channel open.
    pub fn push(&self, key: ChannelKey, event: FocusEvent) -> Result<()> {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(&key) else {
            return Err(FocusError::invalid(format!("channel {key:?} is not open")));
        };
        ch.outstanding += 1;
        // The receiver lives as long as `self`, so the send cannot fail.
        let _ = self.events_tx.send(Wire::Event(key, event));
        Ok(())
    }

    /// Arbiter side: wait for the next ack.
    pub fn recv_ack(&self, timeout: Duration) -> Option<(ChannelKey, FocusAck)> {
        self.acks_rx.recv_timeout(timeout).ok()
    }

    pub fn open_channels(&self) -> usize {
        self.channels.lock().len()
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationTransport for MemoryNotifier {
    fn open(&self, key: ChannelKey) -> Result<()> {
        self.channels.lock().entry(key).or_default().refs += 1;
        Ok(())
    }

    fn close(&self, key: ChannelKey) {
        let waiting = {
            let mut channels = self.channels.lock();
            match channels.get_mut(&key) {
                None => return,
                Some(ch) if ch.refs > 1 => {
                    ch.refs -= 1;
                    return;
                }
                Some(ch) => {
                    let waiting = ch.outstanding > 0;
                    channels.remove(&key);
                    waiting
                }
            }
        };
        self.wake();
        if waiting {
            let _ = self.acks_tx.send((key, key.final_ack()));
        }
    }

    fn send_ack(&self, key: ChannelKey, ack: FocusAck) -> Result<()> {
        let mut channels = self.channels.lock();
        match channels.get_mut(&key) {
            Some(ch) if ch.outstanding > 0 => {
                ch.outstanding -= 1;
                let _ = self.acks_tx.send((key, ack));
            }
            _ => debug!(?key, "nobody waiting for ack {}", ack.handle_id),
        }
        Ok(())
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<(ChannelKey, FocusEvent)>> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(Wire::Event(key, ev)) => {
                if self.is_open(key) {
                    Ok(Some((key, ev)))
                } else {
                    debug!(?key, "event for closed channel dropped");
                    Ok(None)
                }
            }
            Ok(Wire::Wake) | Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn wake(&self) {
        let _ = self.events_tx.send(Wire::Wake);
    }

    fn is_open(&self, key: ChannelKey) -> bool {
        self.channels.lock().contains_key(&key)
    }
}
