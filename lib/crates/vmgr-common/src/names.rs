//! Unit naming rules shared by every vmgr component.

use thiserror::Error;

/// Name of the shared network prerequisite unit.
///
/// One per project. Created by whichever workflow run first finds it absent
/// and never torn down by a workflow; the reaper skips it.
pub const NETWORK_UNIT: &str = "networking";

/// Prefix of every VM unit created by the provisioning workflow.
/// Format: vmgr{vm_name}
pub const UNIT_PREFIX: &str = "vmgr";

/// Maximum unit name length accepted by the stack backends we target.
pub const MAX_UNIT_NAME_LEN: usize = 100;

/// Run identifiers: `run-` followed by 16 lowercase hex characters.
pub const RUN_ID_PREFIX: &str = "run-";

/// Rejected unit names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitNameError {
    #[error("unit name must not be empty")]
    Empty,

    #[error("unit name '{0}' is longer than {MAX_UNIT_NAME_LEN} characters")]
    TooLong(String),

    #[error("unit name '{0}' may only contain [A-Za-z0-9_.-]")]
    InvalidCharacters(String),
}

/// Unit name for the VM provisioned on behalf of `vm_name`.
#[must_use]
pub fn vm_unit_name(vm_name: &str) -> String {
    format!("{UNIT_PREFIX}{vm_name}")
}

/// Names that must never be selected for reaping, regardless of age.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == NETWORK_UNIT
}

/// Validate a unit (stack) name before it is handed to the engine.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains characters
/// outside `[A-Za-z0-9_.-]`.
pub fn validate_unit_name(name: &str) -> Result<(), UnitNameError> {
    if name.is_empty() {
        return Err(UnitNameError::Empty);
    }
    if name.len() > MAX_UNIT_NAME_LEN {
        return Err(UnitNameError::TooLong(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(UnitNameError::InvalidCharacters(name.to_string()));
    }
    Ok(())
}

/// Validate a workflow run identifier: `run-[a-f0-9]{16}`.
///
/// Always call before building a path from user input.
///
/// # Errors
///
/// Returns a description of the first violated rule.
pub fn validate_run_id(run_id: &str) -> Result<(), &'static str> {
    if run_id.len() != RUN_ID_PREFIX.len() + 16 {
        return Err("run id must be 'run-' followed by 16 hex characters");
    }
    if !run_id.starts_with(RUN_ID_PREFIX) {
        return Err("run id must start with 'run-'");
    }
    if !run_id[RUN_ID_PREFIX.len()..]
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err("run id suffix must be lowercase hex [a-f0-9]");
    }
    Ok(())
}
