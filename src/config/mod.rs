pub mod data_source;
pub mod settings;

pub use data_source::{DataSourceConfig, DatabaseIdentity};
pub use settings::MigrationSettings;
