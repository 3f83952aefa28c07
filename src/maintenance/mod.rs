//! Single-flight execution of maintenance tasks.

pub mod mode;
pub mod monitor;
pub mod service;

pub use mode::{MaintenanceMode, MaintenanceModeGuard};
pub use monitor::{
    MaintenanceTaskInfo, MaintenanceTaskState, TaskCallback, TaskMonitor, TaskOutcome,
};
pub use service::MaintenanceService;
