pub mod error;

pub use error::{BoxError, MigrationError, Result};
