// src/dispatch/local.rs
//! Transports that never leave the process: a dry-run logger and a scripted
//! transport for tests and demos.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use super::{SendOutcome, Transport};

/// Dry-run transport: logs every payload and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, payload: &str) -> SendOutcome {
        tracing::info!(target: "dry_run", chars = payload.chars().count(), "\n{payload}");
        SendOutcome::Delivered
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

// --- Test helper ---

/// Replays queued outcomes in order (then `Delivered` forever) and records
/// every call with the time it started.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<SendOutcome>>,
    pub calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = SendOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: SendOutcome) {
        self.script.lock().expect("script mutex poisoned").push_back(outcome);
    }

    pub fn payloads(&self) -> Vec<String> {
        let calls = self.calls.lock().expect("calls mutex poisoned");
        calls.iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        let calls = self.calls.lock().expect("calls mutex poisoned");
        calls.iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &str) -> SendOutcome {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push((Instant::now(), payload.to_string()));
        self.script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or(SendOutcome::Delivered)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
