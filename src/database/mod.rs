//! Live database routing: the current handle, the latch in front of it, and
//! the drain used before a cutover.

pub mod current;
pub mod drain;
pub mod handle;
pub mod latch;
pub mod manager;

pub use current::CurrentDatabaseRef;
pub use drain::DrainHelper;
pub use handle::{DatabaseHandle, OperationGuard};
pub use latch::{DatabaseLatch, LatchMode, LatchState};
pub use manager::{DatabaseConnector, DatabaseManager, NoopConnector};
