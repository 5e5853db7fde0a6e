// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The single background thread that turns arbiter events into callbacks.
//
// Per event: resolve the handle, take its slot guard, run the callback,
// release the guard, then ack. Events are handled one at a time, so no two
// callbacks of a client ever overlap and each handle sees its events in
// arrival order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::event::{FocusAck, FocusEvent};
use crate::handle_table::{HandleClass, HandleTable};
use crate::notify::{ChannelKey, NotificationTransport};

/// Back-off after a failed wait, so a broken poll set cannot spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

/// Lazily started dispatch thread.
pub struct DispatchLoop {
    running: Mutex<Option<Running>>,
    /// Every thread this loop has spawned. Kept past `stop`, since a stop
    /// issued from a callback leaves that thread running until it returns.
    /// Thread ids are never reused, so stale entries match nobody.
    threads: Mutex<Vec<ThreadId>>,
}

impl DispatchLoop {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Start the thread unless it is already running.
    pub fn ensure_running(
        &self,
        table: &Arc<HandleTable>,
        notifier: &Arc<dyn NotificationTransport>,
        poll: Duration,
    ) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = Arc::clone(table);
            let notifier = Arc::clone(notifier);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("focus-dispatch".into())
                .spawn(move || run(&table, notifier.as_ref(), &stop, poll))?
        };
        let thread = handle.thread().id();
        self.threads.lock().push(thread);
        *running = Some(Running {
            stop,
            handle,
            thread,
        });
        debug!("focus dispatch thread started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Whether the caller is a thread of this loop (i.e. inside a callback),
    /// including one that was asked to stop but has not returned yet.
    pub fn is_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.threads.lock().contains(&current)
    }

    /// Stop the thread and wait for it, unless called from the thread itself,
    /// in which case it exits after the current callback returns.
    pub fn stop(&self, notifier: &dyn NotificationTransport) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.store(true, Ordering::Release);
        notifier.wake();
        if running.thread == thread::current().id() {
            return;
        }
        if running.handle.join().is_err() {
            error!("focus dispatch thread panicked");
        }
        debug!("focus dispatch thread stopped");
    }
}

impl Default for DispatchLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn run(
    table: &HandleTable,
    notifier: &dyn NotificationTransport,
    stop: &AtomicBool,
    poll: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        match notifier.next_event(poll) {
            Ok(Some((key, ev))) => {
                dispatch_one(table, notifier, key, &ev);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("waiting for focus events failed: {}", e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

/// Deliver one event. Returns whether a callback slot was found for it.
///
/// An event whose handle is gone is dropped without an ack. A panicking
/// callback is logged and still acked.
pub(crate) fn dispatch_one(
    table: &HandleTable,
    notifier: &dyn NotificationTransport,
    key: ChannelKey,
    ev: &FocusEvent,
) -> bool {
    let class = key.class();
    let Some(slot) = table.find_by_handle_id(ev.handle_id, class) else {
        debug!(?key, "no handle {} for event, dropped", ev.handle_id);
        return false;
    };
    let (Some(guard), Some(handle)) = (table.guard(slot), table.get(slot)) else {
        return false;
    };

    {
        let bound = guard.lock();
        let Some(binding) = bound
            .as_ref()
            .filter(|b| b.id == ev.handle_id && b.class == class)
        else {
            debug!(?key, "handle {} unregistered before dispatch", ev.handle_id);
            return false;
        };
        if class == HandleClass::Watch && !handle.focus_type_filter.covers(ev.focus_type) {
            debug!(
                "watch {} filters out {:?} changes",
                ev.handle_id, ev.focus_type
            );
        } else {
            debug!(
                "dispatching {} {:?} to handle {} ({})",
                ev.new_state, ev.focus_type, ev.handle_id, ev.reason
            );
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| binding.kind.invoke(ev)));
            if outcome.is_err() {
                error!("focus callback for handle {} panicked", ev.handle_id);
            }
        }
    }

    if let Err(e) = notifier.send_ack(key, FocusAck::new(ev.handle_id)) {
        warn!(?key, "ack for handle {} failed: {}", ev.handle_id, e);
    }
    true
}
