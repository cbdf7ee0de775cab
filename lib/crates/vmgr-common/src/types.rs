use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single named output produced by a unit after a successful apply.
///
/// Secret values are redacted by both `Debug` and `Display`; read
/// [`OutputValue::value`] explicitly when the plaintext is needed.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: serde_json::Value,
    #[serde(default)]
    pub secret: bool,
}

impl OutputValue {
    #[must_use]
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    #[must_use]
    pub fn secret(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }

    /// The value as a string slice, if it is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl fmt::Debug for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            f.write_str("OutputValue([secret])")
        } else {
            write!(f, "OutputValue({})", self.value)
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            return f.write_str("[secret]");
        }
        match &self.value {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// Outputs of one unit, keyed by output name. Ordered for stable rendering.
pub type OutputMap = BTreeMap<String, OutputValue>;

/// A named, independently applied bundle of infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub project: String,
    pub name: String,
    /// `None` until the first successful apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: OutputMap,
}

impl DeploymentUnit {
    #[must_use]
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            last_update: None,
            outputs: OutputMap::new(),
        }
    }

    /// Fully qualified `project/name` used in logs and error messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.project, self.name)
    }
}

/// One catalog row as reported by the engine's list operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub name: String,
    /// `None` means the unit was never successfully applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Outputs of the shared network prerequisite, cached in every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub resource_group: String,
    pub subnet_id: String,
}

/// Phase of a provisioning workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Start,
    EnsuringNetwork,
    Deploying,
    Active,
    TearingDown,
    Done,
    Failed,
}

impl WorkflowPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Human-readable description used in progress output.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Start => "Queued",
            Self::EnsuringNetwork => "Ensuring network",
            Self::Deploying => "Deploying VM",
            Self::Active => "VM active",
            Self::TearingDown => "Tearing down VM",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::EnsuringNetwork => "ensuring_network",
            Self::Deploying => "deploying",
            Self::Active => "active",
            Self::TearingDown => "tearing_down",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Whether a run tears its VM down after the TTL or leaves it for the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Deploy, hold for the TTL, tear down.
    #[default]
    Ephemeral,
    /// Deploy only; the expiry reaper cleans the unit up later.
    Persistent,
}

/// Terminal failure recorded on a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Phase whose step exhausted its retries.
    pub phase: WorkflowPhase,
    pub attempts: u32,
    pub message: String,
}

/// One durable execution of the provisioning lifecycle.
///
/// Persisted after every phase transition so a crashed worker can resume
/// from the last recorded phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub project: String,
    pub vm_name: String,
    #[serde(default)]
    pub mode: RunMode,
    pub phase: WorkflowPhase,
    /// Unit created in `Deploying`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInfo>,
    /// Public address reported by the VM unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub ttl_secs: u64,
    /// Deadline of the `Active` hold, fixed when the phase is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        project: impl Into<String>,
        vm_name: impl Into<String>,
        mode: RunMode,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            vm_name: vm_name.into(),
            mode,
            phase: WorkflowPhase::Start,
            unit_name: None,
            network: None,
            address: None,
            ttl_secs,
            active_until: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
