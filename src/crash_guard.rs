// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tells the arbiter about handles left behind when the process dies from a
// fatal signal.
//
// The signal handler only does async-signal-safe work: it writes the signal
// number into a pipe and polls a second pipe for completion (bounded). A
// regular thread, with the fatal signals blocked, wakes on the first pipe,
// counts the handles this pid owns, sends one `EmergentExit` and answers on
// the second pipe. The handler then restores the previous disposition and
// re-raises, so the default crash handling still happens.

use std::os::fd::AsRawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{FocusError, Result};
use crate::handle_table::HandleTable;
use crate::platform::posix::{self, Pipe};
use crate::transport::{call_done, Request, Transport};

/// Signals that trigger the exit notification.
pub const FATAL_SIGNALS: [libc::c_int; 6] = [
    libc::SIGINT,
    libc::SIGABRT,
    libc::SIGSEGV,
    libc::SIGTERM,
    libc::SIGSYS,
    libc::SIGXCPU,
];

/// Byte asking the guard thread to exit. Signal numbers are never 0.
const SHUTDOWN: u8 = 0;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static REQUEST_FD: AtomicI32 = AtomicI32::new(-1);
static DONE_FD: AtomicI32 = AtomicI32::new(-1);
static NOTIFY_TIMEOUT_MS: AtomicI32 = AtomicI32::new(0);
static SAVED: AtomicPtr<SavedActions> = AtomicPtr::new(ptr::null_mut());

struct SavedActions {
    entries: Vec<(libc::c_int, libc::sigaction)>,
}

// ---------------------------------------------------------------------------
// Exit notification
// ---------------------------------------------------------------------------

/// The part of the crash path that talks to the arbiter.
pub struct ExitNotifier {
    table: Arc<HandleTable>,
    transport: Arc<dyn Transport>,
    lock_timeout: Duration,
}

impl ExitNotifier {
    pub fn new(table: Arc<HandleTable>, transport: Arc<dyn Transport>, lock_timeout: Duration) -> Self {
        Self {
            table,
            transport,
            lock_timeout,
        }
    }

    /// Send `EmergentExit{pid}` if `pid` owns any live handle. Returns
    /// whether a request was sent.
    ///
    /// If the table lock cannot be taken in time (the crashing thread may
    /// hold it) the request is sent anyway.
    pub fn notify(&self, pid: i32) -> Result<bool> {
        match self.table.owned_by(pid, self.lock_timeout) {
            Some(0) => {
                debug!("pid {pid} owns no focus handles");
                return Ok(false);
            }
            Some(n) => info!("pid {pid} exiting with {n} focus handles"),
            None => warn!("handle table busy; notifying arbiter of exit anyway"),
        }
        call_done(self.transport.as_ref(), Request::EmergentExit { pid })?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// CrashGuard
// ---------------------------------------------------------------------------

/// Installed fatal-signal handlers plus the thread that serves them.
/// Only one may be installed per process; dropping it restores the
/// previous dispositions.
pub struct CrashGuard {
    request: Arc<Pipe>,
    done: Arc<Pipe>,
    worker: Option<JoinHandle<()>>,
}

impl CrashGuard {
    pub fn install(notifier: ExitNotifier, notify_timeout: Duration) -> Result<Self> {
        if INSTALLED.swap(true, Ordering::AcqRel) {
            return Err(FocusError::invalid("crash guard already installed"));
        }
        match Self::start(notifier, notify_timeout) {
            Ok(guard) => Ok(guard),
            Err(e) => {
                INSTALLED.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn start(notifier: ExitNotifier, notify_timeout: Duration) -> Result<Self> {
        let request = Arc::new(Pipe::new(false)?);
        let done = Arc::new(Pipe::new(true)?);

        let worker = {
            let request = Arc::clone(&request);
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name("focus-crash-guard".into())
                .spawn(move || serve(&notifier, &request, &done))?
        };
        let mut guard = Self {
            request,
            done,
            worker: Some(worker),
        };

        let ms = notify_timeout.as_millis().min(i32::MAX as u128) as i32;
        NOTIFY_TIMEOUT_MS.store(ms, Ordering::Release);
        REQUEST_FD.store(guard.request.write.as_raw_fd(), Ordering::Release);
        DONE_FD.store(guard.done.read.as_raw_fd(), Ordering::Release);

        let mut saved = SavedActions {
            entries: Vec::with_capacity(FATAL_SIGNALS.len()),
        };
        for &signo in &FATAL_SIGNALS {
            match posix::install_handler(signo, on_fatal_signal) {
                Ok(previous) => saved.entries.push((signo, previous)),
                Err(e) => {
                    for (s, prev) in &saved.entries {
                        posix::restore_handler(*s, prev);
                    }
                    guard.stop_worker();
                    return Err(e.into());
                }
            }
        }
        SAVED.store(Box::into_raw(Box::new(saved)), Ordering::Release);
        debug!("crash guard installed");
        Ok(guard)
    }

    fn stop_worker(&mut self) {
        REQUEST_FD.store(-1, Ordering::Release);
        DONE_FD.store(-1, Ordering::Release);
        if let Err(e) = self.request.poke(SHUTDOWN) {
            warn!("failed to stop crash guard thread: {}", e);
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("crash guard thread panicked");
            }
        }
    }
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        // A handler on another thread may still be reading the saved
        // actions, so they are never freed. One small leak per install.
        let saved = SAVED.swap(ptr::null_mut(), Ordering::AcqRel);
        if !saved.is_null() {
            let saved = unsafe { &*saved };
            for (signo, previous) in &saved.entries {
                posix::restore_handler(*signo, previous);
            }
        }
        self.stop_worker();
        INSTALLED.store(false, Ordering::Release);
        debug!("crash guard removed");
    }
}

/// Guard thread: one exit notification per signal byte.
fn serve(notifier: &ExitNotifier, request: &Pipe, done: &Pipe) {
    if let Err(e) = posix::block_on_current_thread(&FATAL_SIGNALS) {
        warn!("crash guard could not block fatal signals: {}", e);
    }
    let pid = std::process::id() as i32;
    let mut byte = [0u8; 1];
    loop {
        match posix::read_some(request.read.as_raw_fd(), &mut byte) {
            Ok(1) if byte[0] != SHUTDOWN => {}
            Ok(_) => return,
            Err(e) => {
                error!("crash guard pipe failed: {}", e);
                return;
            }
        }
        warn!("fatal signal {} received", byte[0]);
        if let Err(e) = notifier.notify(pid) {
            error!("failed to notify arbiter of exit: {}", e);
        }
        if let Err(e) = done.poke(1) {
            error!("failed to release signal handler: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Signal handler (async-signal-safe only)
// ---------------------------------------------------------------------------

extern "C" fn on_fatal_signal(signo: libc::c_int) {
    rendezvous(signo);
    restore_previous(signo);
    unsafe {
        libc::raise(signo);
    }
}

/// Hand `signo` to the guard thread and wait, bounded, for it to finish.
/// Returns whether the guard thread answered in time.
fn rendezvous(signo: libc::c_int) -> bool {
    let request = REQUEST_FD.load(Ordering::Acquire);
    let done = DONE_FD.load(Ordering::Acquire);
    if request < 0 || done < 0 {
        return false;
    }
    let byte = signo as u8;
    let written = unsafe { libc::write(request, &byte as *const u8 as *const libc::c_void, 1) };
    if written != 1 {
        return false;
    }
    let mut pfd = libc::pollfd {
        fd: done,
        events: libc::POLLIN,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pfd, 1, NOTIFY_TIMEOUT_MS.load(Ordering::Acquire)) };
    if ready <= 0 {
        return false;
    }
    let mut ack = 0u8;
    unsafe {
        libc::read(done, &mut ack as *mut u8 as *mut libc::c_void, 1);
    }
    true
}

fn restore_previous(signo: libc::c_int) {
    let saved = SAVED.load(Ordering::Acquire);
    if !saved.is_null() {
        let saved = unsafe { &*saved };
        if let Some((_, previous)) = saved.entries.iter().find(|(s, _)| *s == signo) {
            posix::restore_handler(signo, previous);
            return;
        }
    }
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
    }
}
