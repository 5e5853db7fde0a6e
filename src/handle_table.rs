// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide registry of focus handles.
//
// The table lock covers slot metadata (id, owner, channel) and is only held
// for scans. Each slot also owns a guard mutex holding its callback; the
// dispatch thread holds that guard for the whole callback, and unregister
// takes it before tearing the handle down. Nothing ever waits on a guard
// while holding the table lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FocusError, Result};
use crate::event::{FocusEvent, FocusType};
use crate::notify::ChannelKey;

/// Id value of a free slot.
pub const FREE_ID: i32 = -1;

/// Callback invoked on the dispatch thread for each event of a handle.
pub type FocusCallback = Box<dyn Fn(&FocusEvent) + Send>;

/// What a handle receives.
pub enum Kind {
    /// Grant/revoke for this handle's own focus requests.
    Exclusive(FocusCallback),
    /// Every focus change matching the handle's type filter.
    Watch(FocusCallback),
}

impl Kind {
    pub fn class(&self) -> HandleClass {
        match self {
            Self::Exclusive(_) => HandleClass::Focus,
            Self::Watch(_) => HandleClass::Watch,
        }
    }

    pub(crate) fn invoke(&self, event: &FocusEvent) {
        match self {
            Self::Exclusive(cb) | Self::Watch(cb) => cb(event),
        }
    }
}

/// Id space a handle id belongs to. Focus ids come from the arbiter,
/// watch ids are derived from the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleClass {
    Focus,
    Watch,
}

/// Index of a slot in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// Watch ids are `slot + 1` on the wire so that 0 is never a valid id.
    pub fn watch_id(self) -> i32 {
        self.0 as i32 + 1
    }

    pub fn from_watch_id(id: i32) -> Result<Self> {
        if id <= 0 {
            return Err(FocusError::invalid(format!("invalid watch id {id}")));
        }
        Ok(Self(id as usize - 1))
    }
}

/// Metadata of one live registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusHandle {
    pub id: i32,
    /// Pid the registration belongs to (the caller's, or a session pid).
    pub owner: i32,
    pub class: HandleClass,
    pub focus_type_filter: FocusType,
    pub is_for_session: bool,
    pub stream_type: String,
    pub channel: ChannelKey,
}

/// A handle plus its callback, as handed to [`HandleTable::allocate`].
pub struct Registration {
    pub handle: FocusHandle,
    pub kind: Kind,
}

/// Callback bound to a slot, owned by the slot guard.
pub struct Binding {
    pub id: i32,
    pub class: HandleClass,
    pub kind: Kind,
}

/// Per-slot guard serializing callback dispatch against unregister.
pub type SlotGuard = Mutex<Option<Binding>>;

struct Slot {
    handle: Option<FocusHandle>,
    /// Set once a teardown has claimed the handle.
    closing: bool,
    guard: Arc<SlotGuard>,
}

/// Fixed-capacity table of focus handles.
pub struct HandleTable {
    slots: Mutex<Vec<Slot>>,
    capacity: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                handle: None,
                closing: false,
                guard: Arc::new(Mutex::new(None)),
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim the first free slot and fill it with what `init` builds for it.
    ///
    /// A slot whose guard is still held (a callback outlived an unregister
    /// that gave up waiting) is skipped rather than waited on. A registration
    /// whose id is already live in the same id space is rejected.
    pub fn allocate<F>(&self, init: F) -> Result<SlotIndex>
    where
        F: FnOnce(SlotIndex) -> Registration,
    {
        let mut slots = self.slots.lock();
        for i in 0..slots.len() {
            if slots[i].handle.is_some() {
                continue;
            }
            let guard = Arc::clone(&slots[i].guard);
            let Some(mut bound) = guard.try_lock() else {
                continue;
            };
            let index = SlotIndex(i);
            let reg = init(index);
            let duplicate = slots.iter().any(|s| {
                matches!(&s.handle, Some(h) if h.id == reg.handle.id && h.class == reg.handle.class)
            });
            if duplicate {
                return Err(FocusError::invalid(format!(
                    "handle {} is already registered",
                    reg.handle.id
                )));
            }
            *bound = Some(Binding {
                id: reg.handle.id,
                class: reg.handle.class,
                kind: reg.kind,
            });
            slots[i].handle = Some(reg.handle);
            slots[i].closing = false;
            return Ok(index);
        }
        Err(FocusError::Exhausted(self.capacity))
    }

    /// Slot holding `id` in the given id space. `FREE_ID` is never found.
    pub fn find_by_handle_id(&self, id: i32, class: HandleClass) -> Option<SlotIndex> {
        if id == FREE_ID {
            return None;
        }
        let slots = self.slots.lock();
        slots
            .iter()
            .position(|s| matches!(&s.handle, Some(h) if h.id == id && h.class == class))
            .map(SlotIndex)
    }

    /// Copy of the metadata in `slot`, if it is in use.
    pub fn get(&self, slot: SlotIndex) -> Option<FocusHandle> {
        let slots = self.slots.lock();
        slots.get(slot.0).and_then(|s| s.handle.clone())
    }

    /// The guard of `slot`. Lock it without holding any table borrow.
    pub fn guard(&self, slot: SlotIndex) -> Option<Arc<SlotGuard>> {
        let slots = self.slots.lock();
        slots.get(slot.0).map(|s| Arc::clone(&s.guard))
    }

    /// Reserve the handle `id` in `slot` for teardown. Only one caller wins;
    /// later ones (and callers whose handle is gone) get `false`.
    pub fn claim(&self, slot: SlotIndex, id: i32, class: HandleClass) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(slot.0) {
            Some(s) if !s.closing && holds(s, id, class) => {
                s.closing = true;
                true
            }
            _ => false,
        }
    }

    /// Mark `slot` free and return what it held, provided it still holds
    /// handle `id` of `class`. Anything else in the slot is left alone.
    ///
    /// The caller must hold the slot guard (and clear the binding inside it)
    /// or have given up waiting for it, and must have closed the channel.
    pub fn release(&self, slot: SlotIndex, id: i32, class: HandleClass) -> Option<FocusHandle> {
        let mut slots = self.slots.lock();
        let s = slots.get_mut(slot.0)?;
        if !holds(s, id, class) {
            return None;
        }
        s.closing = false;
        s.handle.take()
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.handle.is_some()).count()
    }

    /// Snapshot of every live handle.
    pub fn handles(&self) -> Vec<(SlotIndex, FocusHandle)> {
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.handle.clone().map(|h| (SlotIndex(i), h)))
            .collect()
    }

    /// Number of live handles owned by `pid`, or `None` if the table lock
    /// could not be taken within `timeout` (its holder may be the crashing thread).
    pub fn owned_by(&self, pid: i32, timeout: Duration) -> Option<usize> {
        let slots = self.slots.try_lock_for(timeout)?;
        Some(
            slots
                .iter()
                .filter(|s| matches!(&s.handle, Some(h) if h.owner == pid))
                .count(),
        )
    }
}

fn holds(slot: &Slot, id: i32, class: HandleClass) -> bool {
    matches!(&slot.handle, Some(h) if h.id == id && h.class == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FocusState;

    fn focus_reg(_slot: SlotIndex, id: i32, owner: i32) -> Registration {
        Registration {
            handle: FocusHandle {
                id,
                owner,
                class: HandleClass::Focus,
                focus_type_filter: FocusType::Both,
                is_for_session: false,
                stream_type: "media".into(),
                channel: ChannelKey::focus(owner, id),
            },
            kind: Kind::Exclusive(Box::new(|_: &FocusEvent| {})),
        }
    }

    #[test]
    fn allocate_takes_first_free_slot() {
        let table = HandleTable::new(4);
        let a = table.allocate(|s| focus_reg(s, 10, 1)).unwrap();
        let b = table.allocate(|s| focus_reg(s, 11, 1)).unwrap();
        assert_eq!(a, SlotIndex(0));
        assert_eq!(b, SlotIndex(1));
        table.release(a, 10, HandleClass::Focus);
        let c = table.allocate(|s| focus_reg(s, 12, 1)).unwrap();
        assert_eq!(c, SlotIndex(0));
    }

    #[test]
    fn exhausted_when_full() {
        let table = HandleTable::new(2);
        table.allocate(|s| focus_reg(s, 1, 1)).unwrap();
        table.allocate(|s| focus_reg(s, 2, 1)).unwrap();
        assert!(matches!(
            table.allocate(|s| focus_reg(s, 3, 1)),
            Err(FocusError::Exhausted(2))
        ));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let table = HandleTable::new(4);
        table.allocate(|s| focus_reg(s, 7, 1)).unwrap();
        assert!(matches!(
            table.allocate(|s| focus_reg(s, 7, 1)),
            Err(FocusError::InvalidArgument(_))
        ));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn free_id_is_never_found() {
        let table = HandleTable::new(2);
        assert_eq!(table.find_by_handle_id(FREE_ID, HandleClass::Focus), None);
        table.allocate(|s| focus_reg(s, 5, 1)).unwrap();
        assert_eq!(table.find_by_handle_id(FREE_ID, HandleClass::Focus), None);
        assert_eq!(table.find_by_handle_id(5, HandleClass::Focus), Some(SlotIndex(0)));
        assert_eq!(table.find_by_handle_id(5, HandleClass::Watch), None);
    }

    #[test]
    fn slot_with_held_guard_is_skipped() {
        let table = HandleTable::new(2);
        let a = table.allocate(|s| focus_reg(s, 1, 1)).unwrap();
        let guard = table.guard(a).unwrap();
        let held = guard.lock();
        table.release(a, 1, HandleClass::Focus);
        let b = table.allocate(|s| focus_reg(s, 2, 1)).unwrap();
        assert_eq!(b, SlotIndex(1));
        drop(held);
    }

    #[test]
    fn only_one_teardown_claims_a_handle() {
        let table = HandleTable::new(2);
        let a = table.allocate(|s| focus_reg(s, 5, 1)).unwrap();
        assert!(!table.claim(a, 5, HandleClass::Watch));
        assert!(!table.claim(a, 6, HandleClass::Focus));
        assert!(table.claim(a, 5, HandleClass::Focus));
        assert!(!table.claim(a, 5, HandleClass::Focus));
        assert!(table.release(a, 5, HandleClass::Focus).is_some());
        assert!(!table.claim(a, 5, HandleClass::Focus));
    }

    #[test]
    fn release_leaves_a_different_occupant_alone() {
        let table = HandleTable::new(1);
        let a = table.allocate(|s| focus_reg(s, 5, 1)).unwrap();
        assert!(table.release(a, 5, HandleClass::Focus).is_some());
        let b = table.allocate(|s| focus_reg(s, 9, 1)).unwrap();
        assert_eq!(a, b);
        // A late release for the old handle must not free the new one.
        assert!(table.release(a, 5, HandleClass::Focus).is_none());
        assert_eq!(table.find_by_handle_id(9, HandleClass::Focus), Some(b));
        assert!(table.claim(b, 9, HandleClass::Focus));
    }

    #[test]
    fn binding_is_installed_in_guard() {
        let table = HandleTable::new(1);
        let slot = table.allocate(|s| focus_reg(s, 3, 1)).unwrap();
        let guard = table.guard(slot).unwrap();
        let bound = guard.lock();
        let binding = bound.as_ref().unwrap();
        assert_eq!(binding.id, 3);
        assert_eq!(binding.class, HandleClass::Focus);
        binding
            .kind
            .invoke(&FocusEvent::new(3, FocusType::Playback, FocusState::Acquired));
    }

    #[test]
    fn owned_by_counts_only_matching_pid() {
        let table = HandleTable::new(4);
        table.allocate(|s| focus_reg(s, 1, 100)).unwrap();
        table.allocate(|s| focus_reg(s, 2, 100)).unwrap();
        table.allocate(|s| focus_reg(s, 3, 200)).unwrap();
        assert_eq!(table.owned_by(100, Duration::from_millis(10)), Some(2));
        assert_eq!(table.owned_by(300, Duration::from_millis(10)), Some(0));
    }

    #[test]
    fn watch_ids_skip_zero() {
        assert_eq!(SlotIndex(0).watch_id(), 1);
        assert_eq!(SlotIndex::from_watch_id(1).unwrap(), SlotIndex(0));
        assert!(SlotIndex::from_watch_id(0).is_err());
        assert!(SlotIndex::from_watch_id(-3).is_err());
    }
}
