// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Registration lifecycle of the focus client: slot accounting, rollback,
// watch ids and the requests the arbiter sees.

mod common;

use std::collections::HashSet;

use libfocus::{ChannelKey, FocusError, FocusEvent, FocusType, NotificationTransport, Request};

use common::{config, entries, fifo_client, memory_client, ScriptedArbiter};

fn noop(_: &FocusEvent) {}

#[test]
fn register_then_unregister_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let arbiter = ScriptedArbiter::new();
    let client = fifo_client(dir.path(), &arbiter);

    client.register_focus(1, 0, "media", false, noop).unwrap();
    assert_eq!(client.live_handles(), 1);
    let base = format!("FOCUS.{}.1", client.pid());
    assert!(dir.path().join(&base).exists());
    assert!(dir.path().join(format!("{base}r")).exists());

    client.unregister_focus(1).unwrap();
    assert_eq!(client.live_handles(), 0);
    assert_eq!(entries(dir.path()), 0);
    assert_eq!(arbiter.count("RegisterFocus"), 1);
    assert_eq!(arbiter.count("UnregisterFocus"), 1);

    // Same id can be registered again.
    client.register_focus(1, 0, "media", false, noop).unwrap();
    assert_eq!(client.live_handles(), 1);
}

#[test]
fn unique_ids_fill_the_table_then_exhaust() {
    let arbiter = ScriptedArbiter::new();
    let (_, client) = memory_client(config().with_max_handles(8), &arbiter);

    let mut ids = HashSet::new();
    for _ in 0..8 {
        let id = client.get_unique_id().unwrap();
        assert!(ids.insert(id));
        client.register_focus(id, 0, "media", false, noop).unwrap();
    }
    assert_eq!(client.live_handles(), 8);

    let extra = client.get_unique_id().unwrap();
    let r = client.register_focus(extra, 0, "media", false, noop);
    assert!(matches!(r, Err(FocusError::Exhausted(8))));
    assert_eq!(client.live_handles(), 8);
    // Exhaustion is detected before the arbiter is asked.
    assert_eq!(arbiter.count("RegisterFocus"), 8);
}

#[test]
fn freed_slot_is_reused_after_exhaustion() {
    let arbiter = ScriptedArbiter::new();
    let (notifier, client) = memory_client(config().with_max_handles(3), &arbiter);

    for id in [10, 11, 12] {
        client.register_focus(id, 0, "media", false, noop).unwrap();
    }
    assert!(matches!(
        client.register_focus(13, 0, "media", false, noop),
        Err(FocusError::Exhausted(_))
    ));

    client.unregister_focus(11).unwrap();
    client.register_focus(13, 0, "media", false, noop).unwrap();
    assert_eq!(client.live_handles(), 3);
    assert!(notifier.is_open(ChannelKey::focus(client.pid(), 13)));
    assert!(!notifier.is_open(ChannelKey::focus(client.pid(), 11)));
}

#[test]
fn arbiter_refusal_rolls_registration_back() {
    let dir = tempfile::tempdir().unwrap();
    let arbiter = ScriptedArbiter::new();
    let client = fifo_client(dir.path(), &arbiter);
    arbiter.fail("RegisterFocus", -13);

    let r = client.register_focus(4, 0, "media", false, noop);
    assert_eq!(r.unwrap_err().transport_code(), Some(-13));
    assert_eq!(client.live_handles(), 0);
    assert_eq!(entries(dir.path()), 0);

    arbiter.heal("RegisterFocus");
    client.register_focus(4, 0, "media", false, noop).unwrap();
}

#[test]
fn unregister_frees_slot_even_when_arbiter_refuses() {
    let dir = tempfile::tempdir().unwrap();
    let arbiter = ScriptedArbiter::new();
    let client = fifo_client(dir.path(), &arbiter);
    client.register_focus(6, 0, "media", false, noop).unwrap();

    arbiter.fail("UnregisterFocus", -5);
    let r = client.unregister_focus(6);
    assert!(matches!(r, Err(FocusError::Transport(-5))));
    assert_eq!(client.live_handles(), 0);
    assert_eq!(entries(dir.path()), 0);
}

#[test]
fn bad_ids_are_rejected_before_any_request() {
    let arbiter = ScriptedArbiter::new();
    let (_, client) = memory_client(config(), &arbiter);

    assert!(matches!(
        client.register_focus(-1, 0, "media", false, noop),
        Err(FocusError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.register_focus(1, 0, "", false, noop),
        Err(FocusError::InvalidArgument(_))
    ));
    client.register_focus(1, 0, "media", false, noop).unwrap();
    assert!(matches!(
        client.register_focus(1, 0, "media", false, noop),
        Err(FocusError::InvalidArgument(_))
    ));
    assert!(matches!(client.unregister_focus(2), Err(FocusError::InvalidArgument(_))));
    assert!(matches!(
        client.release_focus(1, FocusType::Playback, -1, ""),
        Err(FocusError::InvalidArgument(_))
    ));

    assert_eq!(arbiter.count("RegisterFocus"), 1);
    assert_eq!(arbiter.requests().len(), 1);
    assert_eq!(client.live_handles(), 1);
}

#[test]
fn acquire_and_release_use_the_stored_owner() {
    let arbiter = ScriptedArbiter::new();
    let (notifier, client) = memory_client(config(), &arbiter);

    client.register_focus(3, 4321, "voip", true, noop).unwrap();
    assert!(notifier.is_open(ChannelKey::focus(4321, 3)));

    client
        .acquire_focus(3, FocusType::Both, 0, "incoming call")
        .unwrap();
    client.release_focus(3, FocusType::Capture, 1, "").unwrap();
    client.set_focus_reacquisition(3, false).unwrap();
    assert!(!client.get_focus_reacquisition(3).unwrap());

    let requests = arbiter.requests();
    assert_eq!(
        requests[1],
        Request::AcquireFocus {
            owner: 4321,
            id: 3,
            focus_type: FocusType::Both,
            option: 0,
            additional_info: "incoming call".into(),
            is_for_session: true,
        }
    );
    assert_eq!(
        requests[2],
        Request::ReleaseFocus {
            owner: 4321,
            id: 3,
            focus_type: FocusType::Capture,
            option: 1,
            additional_info: String::new(),
            is_for_session: true,
        }
    );
    assert_eq!(
        requests[3],
        Request::SetFocusReacquisition {
            owner: 4321,
            id: 3,
            reacquire: false,
        }
    );
}

#[test]
fn acquire_errors_come_back_verbatim() {
    let arbiter = ScriptedArbiter::new();
    let (_, client) = memory_client(config(), &arbiter);
    client.register_focus(2, 0, "media", false, noop).unwrap();

    arbiter.fail("AcquireFocus", -1);
    let err = client
        .acquire_focus(2, FocusType::Playback, 0, "")
        .unwrap_err();
    assert_eq!(err.transport_code(), Some(-1));
    // Acquire does not touch the registration.
    assert_eq!(client.live_handles(), 1);
}

#[test]
fn watch_ids_are_slot_based_and_share_one_channel() {
    let dir = tempfile::tempdir().unwrap();
    let arbiter = ScriptedArbiter::new();
    let client = fifo_client(dir.path(), &arbiter);

    client.register_focus(100, 0, "media", false, noop).unwrap();
    let first = client
        .set_focus_watch_callback(0, FocusType::Playback, false, noop)
        .unwrap();
    let second = client
        .set_focus_watch_callback(0, FocusType::Capture, false, noop)
        .unwrap();
    assert_eq!((first, second), (2, 3));

    let wch = dir.path().join(format!("FOCUS.{}.wch", client.pid()));
    assert!(wch.exists());

    client.request_unset_focus_watch_callback(first).unwrap();
    client.unset_focus_watch_callback(first).unwrap();
    assert!(wch.exists());
    client.unset_focus_watch_callback(second).unwrap();
    assert!(!wch.exists());

    assert!(matches!(
        client.unset_focus_watch_callback(0),
        Err(FocusError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.unset_focus_watch_callback(first),
        Err(FocusError::InvalidArgument(_))
    ));
    // A focus id is not a watch id even when the numbers line up.
    assert!(matches!(
        client.unset_focus_watch_callback(1),
        Err(FocusError::InvalidArgument(_))
    ));

    let requests = arbiter.requests();
    assert!(requests.contains(&Request::SetFocusWatch {
        owner: client.pid(),
        id: 2,
        focus_type: FocusType::Playback,
        is_for_session: false,
    }));
    assert!(requests.contains(&Request::RequestUnsetFocusWatch {
        owner: client.pid(),
        id: 2,
    }));
    assert_eq!(arbiter.count("UnsetFocusWatch"), 2);
}

#[test]
fn watch_refusal_rolls_back() {
    let arbiter = ScriptedArbiter::new();
    let (notifier, client) = memory_client(config(), &arbiter);
    arbiter.fail("SetFocusWatch", -3);
    let r = client.set_focus_watch_callback(0, FocusType::Both, false, noop);
    assert!(matches!(r, Err(FocusError::Transport(-3))));
    assert_eq!(client.live_handles(), 0);
    assert_eq!(notifier.open_channels(), 0);
}

#[test]
fn acquired_stream_type_query() {
    let arbiter = ScriptedArbiter::new();
    let (_, client) = memory_client(config(), &arbiter);
    let acquired = client
        .get_acquired_focus_stream_type(FocusType::Playback)
        .unwrap();
    assert_eq!(acquired.stream_type, "media");
    assert_eq!(acquired.additional_info, "music-player");
}

#[test]
fn drop_unregisters_and_removes_fifos() {
    let dir = tempfile::tempdir().unwrap();
    let arbiter = ScriptedArbiter::new();
    {
        let client = fifo_client(dir.path(), &arbiter);
        client.register_focus(8, 0, "media", false, noop).unwrap();
        client
            .set_focus_watch_callback(0, FocusType::Both, false, noop)
            .unwrap();
        assert_eq!(entries(dir.path()), 4);
    }
    assert_eq!(entries(dir.path()), 0);
    assert_eq!(arbiter.count("UnregisterFocus"), 1);
    assert_eq!(arbiter.count("UnsetFocusWatch"), 1);
}

#[test]
fn concurrent_registrations_get_distinct_slots() {
    let arbiter = ScriptedArbiter::new();
    let (_, client) = memory_client(config().with_max_handles(64), &arbiter);
    let client = std::sync::Arc::new(client);

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let client = std::sync::Arc::clone(&client);
            std::thread::spawn(move || {
                for i in 0..8 {
                    client
                        .register_focus(t * 8 + i, 0, "media", false, noop)
                        .unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(client.live_handles(), 64);
    assert!(matches!(
        client.register_focus(64, 0, "media", false, noop),
        Err(FocusError::Exhausted(64))
    ));
}
