// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Legacy named-FIFO notification channels.
//
// Per channel the client creates an event FIFO and an ack FIFO (see
// `fifo_name`). The client holds the event FIFO open read+write so it never
// sees hang-up between arbiter writes. Acks are written by opening the ack
// FIFO write-only and non-blocking: if the arbiter already gave up and
// closed its read end the open fails with ENXIO, which just means nobody is
// waiting any more.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ChannelKey, NotificationTransport};
use crate::error::{FocusError, Result};
use crate::event::{FocusAck, FocusEvent, ACK_RECORD_SIZE, EVENT_RECORD_SIZE};
use crate::fifo_name;
use crate::platform::posix::{self, FifoAccess, Pipe};

struct OpenChannel {
    event_fd: Arc<OwnedFd>,
    refs: usize,
}

/// Client side of the FIFO channels, plus the wake pipe of the dispatch wait.
pub struct FifoNotifier {
    dir: PathBuf,
    channels: Mutex<HashMap<ChannelKey, OpenChannel>>,
    wake: Pipe,
    /// Channel index the next scan starts at, so one busy channel cannot starve the rest.
    cursor: AtomicUsize,
}

impl FifoNotifier {
    /// FIFOs are created under `dir`, which must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            channels: Mutex::new(HashMap::new()),
            wake: Pipe::new(true)?,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create(&self, key: &ChannelKey) -> io::Result<OwnedFd> {
        let event = fifo_name::event_path(&self.dir, key);
        let ack = fifo_name::ack_path(&self.dir, key);
        posix::make_fifo(&event)?;
        if let Err(e) = posix::make_fifo(&ack) {
            let _ = posix::remove_fifo(&event);
            return Err(e);
        }
        let fd = posix::open_fifo(&event, FifoAccess::ReadHeld).inspect_err(|_| {
            let _ = posix::remove_fifo(&event);
            let _ = posix::remove_fifo(&ack);
        })?;
        // The path may have been replaced since it was checked.
        posix::ensure_fifo(fd.as_raw_fd())?;
        Ok(fd)
    }

    fn remove_files(&self, key: &ChannelKey) {
        for path in [
            fifo_name::event_path(&self.dir, key),
            fifo_name::ack_path(&self.dir, key),
        ] {
            if let Err(e) = posix::remove_fifo(&path) {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// Read one event record from a readable channel.
    fn read_event(key: &ChannelKey, fd: &OwnedFd) -> Option<FocusEvent> {
        let mut buf = [0u8; EVENT_RECORD_SIZE];
        let n = match posix::read_some(fd.as_raw_fd(), &mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                warn!(?key, "event read failed: {}", e);
                return None;
            }
        };
        if n != EVENT_RECORD_SIZE {
            if n > 0 {
                warn!(?key, "dropping partial event record ({n} bytes)");
            }
            return None;
        }
        match FocusEvent::from_record(&buf) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!(?key, "dropping malformed event: {}", e);
                None
            }
        }
    }
}

impl NotificationTransport for FifoNotifier {
    fn open(&self, key: ChannelKey) -> Result<()> {
        {
            let mut channels = self.channels.lock();
            if let Some(ch) = channels.get_mut(&key) {
                ch.refs += 1;
                return Ok(());
            }
            let fd = self.create(&key)?;
            channels.insert(
                key,
                OpenChannel {
                    event_fd: Arc::new(fd),
                    refs: 1,
                },
            );
        }
        debug!(?key, "notification channel opened");
        self.wake();
        Ok(())
    }

    fn close(&self, key: ChannelKey) {
        {
            let mut channels = self.channels.lock();
            match channels.get_mut(&key) {
                None => {
                    debug!(?key, "close of a channel that is not open");
                    return;
                }
                Some(ch) if ch.refs > 1 => {
                    ch.refs -= 1;
                    return;
                }
                Some(_) => {
                    channels.remove(&key);
                }
            }
        }
        self.wake();
        if let Err(e) = self.send_ack(key, key.final_ack()) {
            debug!(?key, "final ack not delivered: {}", e);
        }
        self.remove_files(&key);
        debug!(?key, "notification channel closed");
    }

    fn send_ack(&self, key: ChannelKey, ack: FocusAck) -> Result<()> {
        let path = fifo_name::ack_path(&self.dir, &key);
        let fd = match posix::open_fifo(&path, FifoAccess::Write) {
            Ok(fd) => fd,
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENXIO) | Some(libc::ENOENT)) => {
                debug!(?key, "arbiter no longer waiting for ack {}", ack.handle_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        posix::write_record(fd.as_raw_fd(), &ack.to_record())?;
        Ok(())
    }

    fn next_event(&self, timeout: Duration) -> Result<Option<(ChannelKey, FocusEvent)>> {
        let snapshot: Vec<(ChannelKey, Arc<OwnedFd>)> = self
            .channels
            .lock()
            .iter()
            .map(|(k, ch)| (*k, Arc::clone(&ch.event_fd)))
            .collect();

        let mut fds = Vec::with_capacity(snapshot.len() + 1);
        fds.push(self.wake.read.as_raw_fd());
        fds.extend(snapshot.iter().map(|(_, fd)| fd.as_raw_fd()));

        let ready = posix::poll_readable(&fds, timeout)?;
        if ready[0] {
            self.wake.drain();
        }

        let n = snapshot.len();
        if n == 0 {
            return Ok(None);
        }
        let start = self.cursor.load(Ordering::Relaxed) % n;
        for step in 0..n {
            let idx = (start + step) % n;
            if !ready[idx + 1] {
                continue;
            }
            let (key, fd) = &snapshot[idx];
            if let Some(ev) = Self::read_event(key, fd) {
                self.cursor.store(idx + 1, Ordering::Relaxed);
                return Ok(Some((*key, ev)));
            }
        }
        Ok(None)
    }

    fn wake(&self) {
        if let Err(e) = self.wake.poke(1) {
            warn!("failed to wake dispatch wait: {}", e);
        }
    }

    fn is_open(&self, key: ChannelKey) -> bool {
        self.channels.lock().contains_key(&key)
    }
}

impl Drop for FifoNotifier {
    fn drop(&mut self) {
        let keys: Vec<ChannelKey> = self.channels.get_mut().drain().map(|(k, _)| k).collect();
        for key in keys {
            self.remove_files(&key);
        }
    }
}

// ---------------------------------------------------------------------------
// Arbiter side
// ---------------------------------------------------------------------------

/// Arbiter half of the FIFO protocol.
pub struct FifoPeer {
    dir: PathBuf,
}

impl FifoPeer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Start listening for acks on `key`'s channel. Fails if the client has
    /// not created the channel.
    pub fn connect(&self, key: ChannelKey) -> Result<PeerChannel> {
        let ack = posix::open_fifo(&fifo_name::ack_path(&self.dir, &key), FifoAccess::Read)?;
        Ok(PeerChannel {
            key,
            event_path: fifo_name::event_path(&self.dir, &key),
            ack,
        })
    }

    /// Push one event and block until it is acknowledged or `timeout` elapses.
    pub fn deliver(&self, key: ChannelKey, event: &FocusEvent, timeout: Duration) -> Result<FocusAck> {
        let chan = self.connect(key)?;
        chan.post(event)?;
        chan.wait_ack(timeout)
    }
}

/// One connected channel on the arbiter side. Dropping it stops listening
/// for acks.
pub struct PeerChannel {
    key: ChannelKey,
    event_path: PathBuf,
    ack: OwnedFd,
}

impl PeerChannel {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Write one event without waiting for its ack.
    pub fn post(&self, event: &FocusEvent) -> Result<()> {
        let fd = posix::open_fifo(&self.event_path, FifoAccess::Write)?;
        posix::write_record(fd.as_raw_fd(), &event.to_record())?;
        Ok(())
    }

    /// Wait for the next ack record.
    pub fn wait_ack(&self, timeout: Duration) -> Result<FocusAck> {
        let deadline = Instant::now() + timeout;
        let fd = self.ack.as_raw_fd();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FocusError::Timeout(timeout));
            }
            if !posix::poll_readable(&[fd], remaining)?[0] {
                continue;
            }
            let mut buf = [0u8; ACK_RECORD_SIZE];
            match posix::read_some(fd, &mut buf) {
                Ok(ACK_RECORD_SIZE) => return Ok(FocusAck::from_record(buf)),
                Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                Ok(n) => warn!(key = ?self.key, "dropping partial ack ({n} bytes)"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
