pub mod names;
pub mod types;

pub use names::{
    NETWORK_UNIT, RUN_ID_PREFIX, UNIT_PREFIX, UnitNameError, is_reserved, validate_run_id,
    validate_unit_name, vm_unit_name,
};
pub use types::*;
