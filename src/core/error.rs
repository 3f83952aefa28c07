use thiserror::Error;

/// Boxed source carried by [`MigrationError::Failed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum MigrationError {
    /// The target configuration was rejected before anything was touched.
    #[error("Invalid data source configuration: {0}")]
    Validation(String),

    /// Administrator-requested abort. Carries no cause since it is not a failure.
    #[error("Migration canceled")]
    Canceled,

    #[error("Migration failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Maintenance task '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Database is already latched ({0})")]
    AlreadyLatched(String),

    #[error("Database handle {0} is closed")]
    HandleClosed(u64),

    #[error("Task '{0}' has already been run")]
    TaskAlreadyRun(String),

    /// Revert did not complete. The original cause is kept first so callers
    /// still see why the migration stopped.
    #[error("Revert failed after '{cause}': {revert_error}")]
    RevertFailed {
        cause: Box<MigrationError>,
        revert_error: String,
    },

    #[error("Join check transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl MigrationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn failed_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Only a clean cancellation counts; a cancellation whose revert failed
    /// is reported as a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether this error already belongs to the migration domain, as opposed
    /// to an infrastructure error that leaked out of a step.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Canceled
                | Self::Failed { .. }
                | Self::AlreadyRunning(_)
                | Self::RevertFailed { .. }
        )
    }

    /// Wraps infrastructure errors into [`MigrationError::Failed`].
    pub fn into_domain(self) -> Self {
        if self.is_domain() {
            self
        } else {
            let message = self.to_string();
            Self::failed_with(message, self)
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl<T> From<std::sync::PoisonError<T>> for MigrationError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MigrationError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MigrationError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_wrapped_once() {
        let err = MigrationError::Io(std::io::Error::other("disk gone")).into_domain();
        match &err {
            MigrationError::Failed { message, source } => {
                assert!(message.contains("disk gone"));
                assert!(source.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(err.into_domain(), MigrationError::Failed { .. }));
    }

    #[test]
    fn failed_revert_is_not_a_clean_cancellation() {
        let err = MigrationError::RevertFailed {
            cause: Box::new(MigrationError::Canceled),
            revert_error: "close failed".into(),
        };
        assert!(!err.is_canceled());
        assert!(err.is_domain());
        assert!(err.to_string().contains("close failed"));
    }
}
