//! Expiry sweep planning.
//!
//! Pure: catalog rows and a clock reading in, reap candidates out. The
//! scheduler in `application::services::reaper` performs the destroys.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vmgr_common::{UnitSummary, is_reserved};

use crate::domain::error::SweepError;

/// A unit selected for reaping during one sweep. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapCandidate {
    pub name: String,
    pub last_update: DateTime<Utc>,
    pub age: Duration,
}

/// Age policy for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Units last updated more than this long ago are expired.
    pub threshold: Duration,
    /// Names never reaped in addition to the reserved network unit.
    pub protected: Vec<String>,
}

impl ExpiryPolicy {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            protected: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_protected(&self, name: &str) -> bool {
        is_reserved(name) || self.protected.iter().any(|p| p == name)
    }
}

/// Select the expired units of one sweep.
///
/// A unit is a candidate when it has a last-update timestamp, is not
/// protected, and was last updated strictly before `now - threshold`.
/// Units that never completed an apply are skipped, not destroyed.
#[must_use]
pub fn plan_sweep(
    units: &[UnitSummary],
    now: DateTime<Utc>,
    policy: &ExpiryPolicy,
) -> Vec<ReapCandidate> {
    let threshold =
        chrono::Duration::from_std(policy.threshold).unwrap_or(chrono::Duration::MAX);
    let boundary = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);

    units
        .iter()
        .filter(|u| !policy.is_protected(&u.name))
        .filter_map(|u| {
            let last_update = u.last_update?;
            (last_update < boundary).then(|| ReapCandidate {
                name: u.name.clone(),
                last_update,
                age: (now - last_update).to_std().unwrap_or_default(),
            })
        })
        .collect()
}

/// Per-unit outcome of one reap attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReapFailure {
    pub name: String,
    pub message: String,
}

/// Counts reported at the end of every sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub found: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ReapFailure>,
}

impl SweepReport {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, name: &str, message: String) {
        self.failed += 1;
        self.failures.push(ReapFailure {
            name: name.to_string(),
            message,
        });
    }

    /// `Ok` when every candidate was reaped.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::PartialSweepFailure`] when any candidate failed.
    pub fn into_result(self) -> Result<Self, SweepError> {
        if self.failed == 0 {
            Ok(self)
        } else {
            Err(SweepError::PartialSweepFailure {
                found: self.found,
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}
