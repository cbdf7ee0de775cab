//! Domain types and validators for vmgr configuration.
//!
//! Pure functions only; loading lives in `infra::config`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmgr_common::validate_unit_name;

use crate::domain::duration::parse_duration;
use crate::domain::error::ConfigurationError;
use crate::domain::reap::ExpiryPolicy;
use crate::domain::workflow::{RetryPolicy, StepPolicy, WorkflowPolicy};

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.vmgr/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmgrConfig {
    /// Project the VM and network units live in.
    pub project: String,
    /// Location written to the network unit before its first apply.
    pub location: String,
    pub engine: EngineConfig,
    pub site: SiteConfig,
    pub reaper: ReaperConfig,
    pub workflow: WorkflowConfig,
    pub retry: RetryConfig,
}

impl Default for VmgrConfig {
    fn default() -> Self {
        Self {
            project: "vmgr".to_string(),
            location: "westus".to_string(),
            engine: EngineConfig::default(),
            site: SiteConfig::default(),
            reaper: ReaperConfig::default(),
            workflow: WorkflowConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Stack CLI settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    /// Directory holding the unit programs; the current directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "pulumi".to_string(),
            work_dir: None,
        }
    }
}

/// The static-site chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub project: String,
    pub region: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            project: "static-site".to_string(),
            region: "us-west-2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub older_than: String,
    pub interval: String,
    pub protected: Vec<String>,
    /// Consecutive failed sweeps of one unit before it is flagged.
    pub alert_after: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            older_than: "1h".to_string(),
            interval: "60s".to_string(),
            protected: Vec::new(),
            alert_after: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub ttl: String,
    pub step_timeout: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            ttl: "5m".to_string(),
            step_timeout: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: "1s".to_string(),
            max_backoff: "30s".to_string(),
            multiplier: 2,
        }
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

fn setting_error(key: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn duration_setting(key: &str, value: &str) -> Result<Duration, ConfigurationError> {
    parse_duration(value).map_err(|e| setting_error(key, e.to_string()))
}

impl VmgrConfig {
    /// Check every field; returns the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, value) in [("project", &self.project), ("site.project", &self.site.project)] {
            validate_unit_name(value).map_err(|e| setting_error(key, e.to_string()))?;
        }
        if self.location.trim().is_empty() {
            return Err(setting_error("location", "must not be empty"));
        }
        if self.engine.program.trim().is_empty() {
            return Err(setting_error("engine.program", "must not be empty"));
        }
        if self.reaper.alert_after == 0 {
            return Err(setting_error("reaper.alert_after", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(setting_error("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.multiplier == 0 {
            return Err(setting_error("retry.multiplier", "must be at least 1"));
        }
        let interval = duration_setting("reaper.interval", &self.reaper.interval)?;
        if interval.is_zero() {
            return Err(setting_error("reaper.interval", "must be greater than zero"));
        }
        duration_setting("reaper.older_than", &self.reaper.older_than)?;
        duration_setting("workflow.ttl", &self.workflow.ttl)?;
        let timeout = duration_setting("workflow.step_timeout", &self.workflow.step_timeout)?;
        if timeout.is_zero() {
            return Err(setting_error("workflow.step_timeout", "must be greater than zero"));
        }
        let retry = self.retry_policy()?;
        if retry.initial_backoff > retry.max_backoff {
            return Err(setting_error(
                "retry.initial_backoff",
                "must not exceed retry.max_backoff",
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if a backoff duration does not parse.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigurationError> {
        Ok(RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: duration_setting("retry.initial_backoff", &self.retry.initial_backoff)?,
            max_backoff: duration_setting("retry.max_backoff", &self.retry.max_backoff)?,
            multiplier: self.retry.multiplier,
        })
    }

    /// Same retry policy and timeout for every workflow step.
    ///
    /// # Errors
    ///
    /// Returns an error if a duration does not parse.
    pub fn workflow_policy(&self) -> Result<WorkflowPolicy, ConfigurationError> {
        Ok(WorkflowPolicy::uniform(StepPolicy {
            retry: self.retry_policy()?,
            timeout: duration_setting("workflow.step_timeout", &self.workflow.step_timeout)?,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if `workflow.ttl` does not parse.
    pub fn ttl(&self) -> Result<Duration, ConfigurationError> {
        duration_setting("workflow.ttl", &self.workflow.ttl)
    }

    /// # Errors
    ///
    /// Returns an error if `reaper.older_than` does not parse.
    pub fn expiry_policy(&self) -> Result<ExpiryPolicy, ConfigurationError> {
        Ok(ExpiryPolicy {
            threshold: duration_setting("reaper.older_than", &self.reaper.older_than)?,
            protected: self.reaper.protected.clone(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if `reaper.interval` does not parse.
    pub fn reaper_interval(&self) -> Result<Duration, ConfigurationError> {
        duration_setting("reaper.interval", &self.reaper.interval)
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
