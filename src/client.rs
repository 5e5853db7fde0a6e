// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Public focus API. Each operation combines a handle table slot, a
// notification channel, the dispatch thread and one arbiter round-trip.
//
// Registration order: slot -> channel -> arbiter -> dispatch thread. Any
// failure unwinds the steps already taken, so a failed register leaves no
// slot, channel or FIFO behind.
//
// Unregister order: slot guard (bounded wait) -> arbiter -> channel -> slot.
// The slot is freed even when the arbiter refuses, so capacity never leaks.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::FocusConfig;
use crate::crash_guard::{CrashGuard, ExitNotifier};
use crate::dispatch::DispatchLoop;
use crate::error::{FocusError, Result};
use crate::event::{FocusEvent, FocusType};
use crate::handle_table::{
    Binding, FocusHandle, HandleClass, HandleTable, Kind, Registration, SlotGuard, SlotIndex,
};
use crate::notify::{ChannelKey, FifoNotifier, NotificationTransport};
use crate::transport::{call_done, AcquiredFocus, Reply, Request, Transport};

/// Client half of focus arbitration for one process.
///
/// All methods take `&self` and may be called from any thread, including
/// from inside a focus callback.
pub struct FocusClient {
    config: FocusConfig,
    pid: i32,
    table: Arc<HandleTable>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn NotificationTransport>,
    dispatch: DispatchLoop,
    crash_guard: Mutex<Option<CrashGuard>>,
}

impl FocusClient {
    /// Client using the legacy FIFO channels under `config.fifo_dir`.
    pub fn new(config: FocusConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let notifier = Arc::new(FifoNotifier::new(config.fifo_dir.clone())?);
        Self::with_notifier(config, transport, notifier)
    }

    /// Client using an arbitrary notification backend.
    pub fn with_notifier(
        config: FocusConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn NotificationTransport>,
    ) -> Result<Self> {
        if config.max_handles == 0 {
            return Err(FocusError::invalid("max_handles must be at least 1"));
        }
        let table = Arc::new(HandleTable::new(config.max_handles));
        let crash_guard = if config.install_crash_guard {
            let exit = ExitNotifier::new(
                Arc::clone(&table),
                Arc::clone(&transport),
                config.crash_notify_timeout / 2,
            );
            Some(CrashGuard::install(exit, config.crash_notify_timeout)?)
        } else {
            None
        };
        Ok(Self {
            pid: std::process::id() as i32,
            config,
            table,
            transport,
            notifier,
            dispatch: DispatchLoop::new(),
            crash_guard: Mutex::new(crash_guard),
        })
    }

    pub fn config(&self) -> &FocusConfig {
        &self.config
    }

    /// Pid used as owner for registrations that are not session-delegated.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Number of live focus and watch registrations.
    pub fn live_handles(&self) -> usize {
        self.table.live_count()
    }

    /// Whether the caller is running on the dispatch thread, i.e. inside a callback.
    pub fn is_dispatch_thread(&self) -> bool {
        self.dispatch.is_current_thread()
    }

    // -----------------------------------------------------------------------
    // Arbiter queries
    // -----------------------------------------------------------------------

    /// Ask the arbiter for a fresh focus id.
    pub fn get_unique_id(&self) -> Result<i32> {
        match self.transport.call(Request::GetUniqueId)? {
            Reply::UniqueId(id) => Ok(id),
            _ => Err(FocusError::UnexpectedReply("GetUniqueId")),
        }
    }

    /// What the current holder of `focus_type` asked for when acquiring it.
    pub fn get_acquired_focus_stream_type(&self, focus_type: FocusType) -> Result<AcquiredFocus> {
        if focus_type == FocusType::Both {
            return Err(FocusError::invalid(
                "acquired stream type is per focus type, not both",
            ));
        }
        match self
            .transport
            .call(Request::GetAcquiredFocusStreamType { focus_type })?
        {
            Reply::AcquiredFocus(acquired) => Ok(acquired),
            _ => Err(FocusError::UnexpectedReply("GetAcquiredFocusStreamType")),
        }
    }

    // -----------------------------------------------------------------------
    // Exclusive focus
    // -----------------------------------------------------------------------

    /// Register focus id `id` and the callback that receives its grant and
    /// revoke events.
    ///
    /// `owner_pid` is only used when `is_for_session` is set; otherwise the
    /// calling process owns the handle.
    pub fn register_focus<F>(
        &self,
        id: i32,
        owner_pid: i32,
        stream_type: &str,
        is_for_session: bool,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&FocusEvent) + Send + 'static,
    {
        if id < 0 {
            return Err(FocusError::invalid(format!("focus id {id} is negative")));
        }
        if stream_type.is_empty() {
            return Err(FocusError::invalid("stream type is empty"));
        }
        let owner = self.resolve_owner(owner_pid, is_for_session)?;
        let channel = ChannelKey::focus(owner, id);

        let slot = self.table.allocate(|_| Registration {
            handle: FocusHandle {
                id,
                owner,
                class: HandleClass::Focus,
                focus_type_filter: FocusType::Both,
                is_for_session,
                stream_type: stream_type.to_owned(),
                channel,
            },
            kind: Kind::Exclusive(Box::new(callback)),
        })?;

        let request = Request::RegisterFocus {
            owner,
            id,
            stream_type: stream_type.to_owned(),
            is_for_session,
        };
        self.activate(slot, id, HandleClass::Focus, channel, request)?;
        debug!("registered focus {id} for pid {owner} ({stream_type})");
        Ok(())
    }

    /// Drop focus id `id`. Waits (bounded) for a running callback of this
    /// handle to return first.
    pub fn unregister_focus(&self, id: i32) -> Result<()> {
        let (slot, handle) = self.focus_handle(id)?;
        let request = Request::UnregisterFocus {
            owner: handle.owner,
            id,
            is_for_session: handle.is_for_session,
        };
        let result = self.teardown(slot, &handle, request);
        debug!("unregistered focus {id}");
        result
    }

    pub fn acquire_focus(
        &self,
        id: i32,
        focus_type: FocusType,
        option: i32,
        additional_info: &str,
    ) -> Result<()> {
        let (_, handle) = self.focus_handle(id)?;
        check_option(option)?;
        call_done(
            self.transport.as_ref(),
            Request::AcquireFocus {
                owner: handle.owner,
                id,
                focus_type,
                option,
                additional_info: additional_info.to_owned(),
                is_for_session: handle.is_for_session,
            },
        )
    }

    pub fn release_focus(
        &self,
        id: i32,
        focus_type: FocusType,
        option: i32,
        additional_info: &str,
    ) -> Result<()> {
        let (_, handle) = self.focus_handle(id)?;
        check_option(option)?;
        call_done(
            self.transport.as_ref(),
            Request::ReleaseFocus {
                owner: handle.owner,
                id,
                focus_type,
                option,
                additional_info: additional_info.to_owned(),
                is_for_session: handle.is_for_session,
            },
        )
    }

    /// Whether the arbiter hands focus back to `id` automatically after a
    /// higher-priority stream releases it.
    pub fn set_focus_reacquisition(&self, id: i32, reacquire: bool) -> Result<()> {
        let (_, handle) = self.focus_handle(id)?;
        call_done(
            self.transport.as_ref(),
            Request::SetFocusReacquisition {
                owner: handle.owner,
                id,
                reacquire,
            },
        )
    }

    pub fn get_focus_reacquisition(&self, id: i32) -> Result<bool> {
        let (_, handle) = self.focus_handle(id)?;
        match self.transport.call(Request::GetFocusReacquisition {
            owner: handle.owner,
            id,
        })? {
            Reply::Reacquisition(reacquire) => Ok(reacquire),
            _ => Err(FocusError::UnexpectedReply("GetFocusReacquisition")),
        }
    }

    // -----------------------------------------------------------------------
    // Watches
    // -----------------------------------------------------------------------

    /// Watch every focus change of `focus_type`. Returns the watch id.
    pub fn set_focus_watch_callback<F>(
        &self,
        owner_pid: i32,
        focus_type: FocusType,
        is_for_session: bool,
        callback: F,
    ) -> Result<i32>
    where
        F: Fn(&FocusEvent) + Send + 'static,
    {
        let owner = self.resolve_owner(owner_pid, is_for_session)?;
        let channel = ChannelKey::watch(owner);

        let slot = self.table.allocate(|slot| Registration {
            handle: FocusHandle {
                id: slot.watch_id(),
                owner,
                class: HandleClass::Watch,
                focus_type_filter: focus_type,
                is_for_session,
                stream_type: String::new(),
                channel,
            },
            kind: Kind::Watch(Box::new(callback)),
        })?;
        let id = slot.watch_id();

        let request = Request::SetFocusWatch {
            owner,
            id,
            focus_type,
            is_for_session,
        };
        self.activate(slot, id, HandleClass::Watch, channel, request)?;
        debug!("watch {id} set for pid {owner} on {focus_type:?}");
        Ok(id)
    }

    /// Ask the arbiter to stop delivering to watch `id`, ahead of
    /// [`unset_focus_watch_callback`](Self::unset_focus_watch_callback).
    pub fn request_unset_focus_watch_callback(&self, id: i32) -> Result<()> {
        let (_, handle) = self.watch_handle(id)?;
        call_done(
            self.transport.as_ref(),
            Request::RequestUnsetFocusWatch {
                owner: handle.owner,
                id,
            },
        )
    }

    pub fn unset_focus_watch_callback(&self, id: i32) -> Result<()> {
        let (slot, handle) = self.watch_handle(id)?;
        let request = Request::UnsetFocusWatch {
            owner: handle.owner,
            id,
            is_for_session: handle.is_for_session,
        };
        let result = self.teardown(slot, &handle, request);
        debug!("watch {id} unset");
        result
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop the dispatch thread, drop every remaining registration and
    /// restore the fatal signal dispositions. Safe to call more than once.
    pub fn finalize(&self) {
        self.dispatch.stop(self.notifier.as_ref());
        for (slot, handle) in self.table.handles() {
            let request = match handle.class {
                HandleClass::Focus => Request::UnregisterFocus {
                    owner: handle.owner,
                    id: handle.id,
                    is_for_session: handle.is_for_session,
                },
                HandleClass::Watch => Request::UnsetFocusWatch {
                    owner: handle.owner,
                    id: handle.id,
                    is_for_session: handle.is_for_session,
                },
            };
            match self.teardown(slot, &handle, request) {
                Ok(()) => {}
                Err(FocusError::InvalidArgument(_)) => {
                    debug!("handle {} already being torn down", handle.id)
                }
                Err(e) => warn!("dropping handle {} at finalize: {}", handle.id, e),
            }
        }
        if self.crash_guard.lock().take().is_some() {
            info!("focus client finalized");
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn resolve_owner(&self, owner_pid: i32, is_for_session: bool) -> Result<i32> {
        if !is_for_session {
            return Ok(self.pid);
        }
        if owner_pid <= 0 {
            return Err(FocusError::invalid(format!(
                "session owner pid {owner_pid} is not a process id"
            )));
        }
        Ok(owner_pid)
    }

    fn focus_handle(&self, id: i32) -> Result<(SlotIndex, FocusHandle)> {
        self.table
            .find_by_handle_id(id, HandleClass::Focus)
            .and_then(|slot| self.table.get(slot).map(|h| (slot, h)))
            .ok_or_else(|| FocusError::invalid(format!("focus id {id} is not registered")))
    }

    fn watch_handle(&self, id: i32) -> Result<(SlotIndex, FocusHandle)> {
        let slot = SlotIndex::from_watch_id(id)?;
        self.table
            .get(slot)
            .filter(|h| h.class == HandleClass::Watch && h.id == id)
            .map(|h| (slot, h))
            .ok_or_else(|| FocusError::invalid(format!("watch id {id} is not set")))
    }

    /// Open the channel for a freshly allocated slot, tell the arbiter and
    /// make sure events get dispatched. Unwinds on failure, unless a
    /// concurrent teardown already claimed the handle and will do it.
    fn activate(
        &self,
        slot: SlotIndex,
        id: i32,
        class: HandleClass,
        channel: ChannelKey,
        request: Request,
    ) -> Result<()> {
        if let Err(e) = self.notifier.open(channel) {
            warn!(?channel, "opening notification channel failed: {}", e);
            if self.table.claim(slot, id, class) {
                self.free_slot(slot, id, class);
            }
            return Err(e);
        }
        let method = request.method();
        if let Err(e) = call_done(self.transport.as_ref(), request) {
            warn!("{method} refused: {}", e);
            if self.table.claim(slot, id, class) {
                self.notifier.close(channel);
                self.free_slot(slot, id, class);
            }
            return Err(e);
        }
        if let Err(e) =
            self.dispatch
                .ensure_running(&self.table, &self.notifier, self.config.dispatch_poll)
        {
            warn!("starting focus dispatch failed: {}", e);
            if !self.table.claim(slot, id, class) {
                return Err(e);
            }
            if let Some(handle) = self.table.get(slot) {
                let undo = match handle.class {
                    HandleClass::Focus => Request::UnregisterFocus {
                        owner: handle.owner,
                        id: handle.id,
                        is_for_session: handle.is_for_session,
                    },
                    HandleClass::Watch => Request::UnsetFocusWatch {
                        owner: handle.owner,
                        id: handle.id,
                        is_for_session: handle.is_for_session,
                    },
                };
                if let Err(undo_err) = call_done(self.transport.as_ref(), undo) {
                    warn!("undoing {method} failed: {}", undo_err);
                }
            }
            self.notifier.close(channel);
            self.free_slot(slot, id, class);
            return Err(e);
        }
        Ok(())
    }

    /// Common tail of unregister and unset: the slot is always freed, the
    /// arbiter's answer is returned. Of several concurrent teardowns of one
    /// handle only the first proceeds; the others see it as not registered.
    fn teardown(&self, slot: SlotIndex, handle: &FocusHandle, request: Request) -> Result<()> {
        if !self.table.claim(slot, handle.id, handle.class) {
            return Err(FocusError::invalid(format!(
                "handle {} is not registered",
                handle.id
            )));
        }
        let guard = self.table.guard(slot);
        let held = guard.as_deref().and_then(|g| self.wait_for_callback(g, handle.id));

        let method = request.method();
        let result = call_done(self.transport.as_ref(), request);
        if let Err(e) = &result {
            warn!("{method} for handle {} failed: {}", handle.id, e);
        }

        self.notifier.close(handle.channel);
        self.table.release(slot, handle.id, handle.class);
        if let Some(mut bound) = held {
            if bound
                .as_ref()
                .is_some_and(|b| b.id == handle.id && b.class == handle.class)
            {
                *bound = None;
            }
        }
        result
    }

    /// Take the slot guard so no callback of this handle is running.
    ///
    /// From the dispatch thread the guard may be held by the caller's own
    /// callback, so it is only tried once there.
    fn wait_for_callback<'a>(
        &self,
        guard: &'a SlotGuard,
        id: i32,
    ) -> Option<MutexGuard<'a, Option<Binding>>> {
        if self.dispatch.is_current_thread() {
            let held = guard.try_lock();
            if held.is_none() {
                debug!("handle {id} torn down from inside its own callback");
            }
            return held;
        }
        let held = guard.try_lock_for(self.config.unregister_wait);
        if held.is_none() {
            warn!(
                "callback for handle {id} still running after {:?}, unregistering anyway",
                self.config.unregister_wait
            );
        }
        held
    }

    fn free_slot(&self, slot: SlotIndex, id: i32, class: HandleClass) {
        if let Some(guard) = self.table.guard(slot) {
            let mut bound = guard.lock();
            if self.table.release(slot, id, class).is_some() {
                *bound = None;
            }
        }
    }
}

impl Drop for FocusClient {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn check_option(option: i32) -> Result<()> {
    if option < 0 {
        return Err(FocusError::invalid(format!("focus option {option} is negative")));
    }
    Ok(())
}
