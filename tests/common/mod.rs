// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared helpers for the integration tests: a scripted in-process arbiter
// and client construction.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use libfocus::{
    AcquiredFocus, ArbiterSignal, FocusClient, FocusConfig, FocusError, MemoryNotifier, Reply,
    Request, Result, SignalHandler, SubscriptionId, Transport,
};

/// Arbiter stand-in: records every request, answers with canned replies and
/// fails chosen methods with a chosen code.
pub struct ScriptedArbiter {
    requests: Mutex<Vec<Request>>,
    failures: Mutex<HashMap<&'static str, i32>>,
    next_id: AtomicI32,
    next_subscription: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, ArbiterSignal>>,
}

impl ScriptedArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
            next_subscription: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// Make every call of `method` fail with arbiter code `code`.
    pub fn fail(&self, method: &'static str, code: i32) {
        self.failures.lock().insert(method, code);
    }

    pub fn heal(&self, method: &'static str) {
        self.failures.lock().remove(method);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method() == method)
            .count()
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Transport for ScriptedArbiter {
    fn call(&self, request: Request) -> Result<Reply> {
        let failure = self.failures.lock().get(request.method()).copied();
        let reply = match &request {
            Request::GetUniqueId => Reply::UniqueId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            Request::GetFocusReacquisition { .. } => Reply::Reacquisition(false),
            Request::GetAcquiredFocusStreamType { .. } => Reply::AcquiredFocus(AcquiredFocus {
                stream_type: "media".into(),
                option: 0,
                additional_info: "music-player".into(),
            }),
            _ => Reply::Done,
        };
        self.requests.lock().push(request);
        match failure {
            Some(code) => Err(FocusError::Transport(code)),
            None => Ok(reply),
        }
    }

    fn subscribe(
        &self,
        signal: ArbiterSignal,
        _filter: u32,
        _handler: SignalHandler,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().insert(id, signal);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.subscriptions.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(FocusError::Transport(-22)),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test configuration: no signal handlers, short waits.
pub fn config() -> FocusConfig {
    FocusConfig::new()
        .with_crash_guard(false)
        .with_dispatch_poll(Duration::from_millis(50))
        .with_unregister_wait(Duration::from_millis(1500))
}

pub fn fifo_client(dir: &Path, arbiter: &Arc<ScriptedArbiter>) -> FocusClient {
    init_tracing();
    FocusClient::new(config().with_fifo_dir(dir), arbiter.clone()).expect("fifo client")
}

pub fn memory_client(
    config: FocusConfig,
    arbiter: &Arc<ScriptedArbiter>,
) -> (Arc<MemoryNotifier>, FocusClient) {
    init_tracing();
    let notifier = Arc::new(MemoryNotifier::new());
    let client =
        FocusClient::with_notifier(config, arbiter.clone(), notifier.clone()).expect("memory client");
    (notifier, client)
}

/// Number of entries left in a FIFO directory.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
