//! Provisioning workflow state machine and step retry policies.
//!
//! No I/O, no async. The runner in `application::services::workflow`
//! executes the steps and persists each transition.

use std::time::Duration;

use vmgr_common::{RUN_ID_PREFIX, RunMode, WorkflowPhase};

/// Phase that follows `phase` on success, or `None` for terminal phases.
///
/// `Start → EnsuringNetwork → Deploying → Active → TearingDown → Done`.
/// Persistent runs stop after `Deploying` and leave the unit to the reaper.
#[must_use]
pub fn next_phase(phase: WorkflowPhase, mode: RunMode) -> Option<WorkflowPhase> {
    use WorkflowPhase as P;
    match (phase, mode) {
        (P::Start, _) => Some(P::EnsuringNetwork),
        (P::EnsuringNetwork, _) => Some(P::Deploying),
        (P::Deploying, RunMode::Ephemeral) => Some(P::Active),
        (P::Deploying, RunMode::Persistent) => Some(P::Done),
        (P::Active, _) => Some(P::TearingDown),
        (P::TearingDown, _) => Some(P::Done),
        (P::Done | P::Failed, _) => None,
    }
}

/// Generate a unique run identifier: `run-{16 hex chars}`.
///
/// Entropy sources: nanosecond timestamp and two independent `RandomState` hashes.
#[must_use]
pub fn generate_run_id() -> String {
    format!("{RUN_ID_PREFIX}{:016x}", entropy())
}

/// VM name used when `vm add` is given none: 8 decimal digits.
#[must_use]
pub fn random_vm_name() -> String {
    format!("{:08}", entropy() % 100_000_000)
}

fn entropy() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    hasher.write_u64(RandomState::new().build_hasher().finish());
    hasher.write_u64(RandomState::new().build_hasher().finish());
    hasher.finish()
}

/// Bounded exponential backoff for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    #[must_use]
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// Retry policy plus the per-attempt timeout of one workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Step policies for every phase that talks to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowPolicy {
    pub ensure_network: StepPolicy,
    pub deploy: StepPolicy,
    pub tear_down: StepPolicy,
}

impl WorkflowPolicy {
    /// The same policy for every step.
    #[must_use]
    pub fn uniform(step: StepPolicy) -> Self {
        Self {
            ensure_network: step,
            deploy: step,
            tear_down: step,
        }
    }

    /// Policy for the step executed in `phase`; `None` for phases without one.
    #[must_use]
    pub fn for_phase(&self, phase: WorkflowPhase) -> Option<&StepPolicy> {
        match phase {
            WorkflowPhase::EnsuringNetwork => Some(&self.ensure_network),
            WorkflowPhase::Deploying => Some(&self.deploy),
            WorkflowPhase::TearingDown => Some(&self.tear_down),
            _ => None,
        }
    }
}
