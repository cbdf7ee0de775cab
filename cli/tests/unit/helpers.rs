//! Shared test doubles: a recording progress reporter and an in-memory run log.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use vmgr_cli::application::ports::{ProgressReporter, RunStore};
use vmgr_cli::application::services::registry::Registry;
use vmgr_cli::domain::workflow::{RetryPolicy, StepPolicy, WorkflowPolicy};
use vmgr_cli::infra::memory::MemoryEngine;
use vmgr_common::{WorkflowPhase, WorkflowRun};

// ── Reporter ─────────────────────────────────────────────────────────────────

/// Captures every progress event as `"<kind>: <message>"`.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("warn: ").map(str::to_owned))
            .collect()
    }

    fn push(&self, kind: &str, message: &str) {
        self.events.lock().unwrap().push(format!("{kind}: {message}"));
    }
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.push("step", message);
    }
    fn success(&self, message: &str) {
        self.push("success", message);
    }
    fn warn(&self, message: &str) {
        self.push("warn", message);
    }
}

// ── Run log ──────────────────────────────────────────────────────────────────

/// Run log kept in memory. Remembers the phase of every save in order.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<BTreeMap<String, WorkflowRun>>,
    saved_phases: Mutex<Vec<WorkflowPhase>>,
}

impl MemoryRunStore {
    pub fn saved_phases(&self) -> Vec<WorkflowPhase> {
        self.saved_phases.lock().unwrap().clone()
    }

    pub fn insert(&self, run: WorkflowRun) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }
}

impl RunStore for MemoryRunStore {
    async fn load(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn save(&self, run: &WorkflowRun) -> Result<()> {
        self.saved_phases.lock().unwrap().push(run.phase);
        self.runs.lock().unwrap().insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<_> = self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

// ── Policies ─────────────────────────────────────────────────────────────────

/// Short backoff so paused-clock tests advance quickly.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        multiplier: 2,
    }
}

pub fn fast_workflow_policy(max_attempts: u32) -> WorkflowPolicy {
    WorkflowPolicy::uniform(StepPolicy {
        retry: fast_retry(max_attempts),
        timeout: Duration::from_secs(600),
    })
}

pub fn registry<'a>(engine: &'a MemoryEngine, project: &str) -> Registry<'a, MemoryEngine> {
    Registry::new(engine, project, fast_retry(3))
}
