//! Typed output schemas, validated at the engine boundary.
//!
//! Every unit kind declares the named outputs it must produce. Parsing a
//! schema fails fast with [`ConfigurationError::MissingOutput`] or
//! [`ConfigurationError::SchemaMismatch`] instead of a runtime cast failure
//! deep inside an orchestration.

use vmgr_common::{NetworkInfo, OutputMap};

use crate::domain::error::ConfigurationError;

/// A fixed set of named, typed outputs produced by one kind of unit.
pub trait OutputSchema: Sized {
    /// Parse the schema out of a unit's raw outputs.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is absent or has the wrong type.
    fn from_outputs(unit: &str, outputs: &OutputMap) -> Result<Self, ConfigurationError>;
}

/// Read a required string output.
///
/// # Errors
///
/// `MissingOutput` when absent, `SchemaMismatch` when not a string.
pub fn required_str(
    unit: &str,
    outputs: &OutputMap,
    key: &str,
) -> Result<String, ConfigurationError> {
    let value = outputs
        .get(key)
        .ok_or_else(|| ConfigurationError::MissingOutput {
            unit: unit.to_string(),
            key: key.to_string(),
        })?;
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ConfigurationError::SchemaMismatch {
            unit: unit.to_string(),
            key: key.to_string(),
            expected: "string",
        })
}

// ── Network prerequisite ─────────────────────────────────────────────────────

pub const RESOURCE_GROUP_OUTPUT: &str = "resourceGroupName";
pub const SUBNET_OUTPUT: &str = "subnetID";

/// Outputs of the shared `networking` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOutputs {
    pub resource_group: String,
    pub subnet_id: String,
}

impl NetworkOutputs {
    /// A network unit counts as provisioned only when both outputs are non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.resource_group.is_empty() && !self.subnet_id.is_empty()
    }

    /// Reuse fast path: `Some` only for a fully provisioned network unit.
    /// Missing or malformed outputs mean the unit still needs an apply.
    #[must_use]
    pub fn existing(unit: &str, outputs: &OutputMap) -> Option<Self> {
        Self::from_outputs(unit, outputs)
            .ok()
            .filter(Self::is_complete)
    }
}

impl OutputSchema for NetworkOutputs {
    fn from_outputs(unit: &str, outputs: &OutputMap) -> Result<Self, ConfigurationError> {
        Ok(Self {
            resource_group: required_str(unit, outputs, RESOURCE_GROUP_OUTPUT)?,
            subnet_id: required_str(unit, outputs, SUBNET_OUTPUT)?,
        })
    }
}

impl From<NetworkOutputs> for NetworkInfo {
    fn from(n: NetworkOutputs) -> Self {
        Self {
            resource_group: n.resource_group,
            subnet_id: n.subnet_id,
        }
    }
}

// ── VM unit ──────────────────────────────────────────────────────────────────

pub const IP_OUTPUT: &str = "ip";

/// Outputs of a VM unit created by the provisioning workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOutputs {
    pub ip: String,
}

impl OutputSchema for VmOutputs {
    fn from_outputs(unit: &str, outputs: &OutputMap) -> Result<Self, ConfigurationError> {
        Ok(Self {
            ip: required_str(unit, outputs, IP_OUTPUT)?,
        })
    }
}

// ── Static site chain ────────────────────────────────────────────────────────

pub const BUCKET_ID_OUTPUT: &str = "bucketID";
pub const WEBSITE_URL_OUTPUT: &str = "websiteUrl";

/// Outputs of the upstream (container) unit of the static-site chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutputs {
    pub bucket_id: String,
    pub website_url: String,
}

impl OutputSchema for SiteOutputs {
    fn from_outputs(unit: &str, outputs: &OutputMap) -> Result<Self, ConfigurationError> {
        Ok(Self {
            bucket_id: required_str(unit, outputs, BUCKET_ID_OUTPUT)?,
            website_url: required_str(unit, outputs, WEBSITE_URL_OUTPUT)?,
        })
    }
}
