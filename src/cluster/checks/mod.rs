//! Join checks shipped with the crate.

pub mod maintenance;
pub mod requirements;
pub mod shared_identity;

pub use maintenance::MaintenanceStateCheck;
pub use requirements::{
    DecodeError, EncodedRequirement, RequirementTypes, RequirementValue, RequirementsCheck,
};
pub use shared_identity::SharedIdentityCheck;
