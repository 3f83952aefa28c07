//! Cancelable units of work with weighted progress.
//!
//! Leaf work is wrapped in [`FnTask`]; ordered sequences of weighted tasks
//! are [`CompositeTask`]s, and a [`Phase`] is a composite whose child labels
//! are prefixed with the phase name.

pub mod cancel;
pub mod composite;
pub mod leaf;
pub mod progress;

pub use cancel::CancelFlag;
pub use composite::{CompositeTask, CompositeTaskBuilder, Phase};
pub use leaf::{FnTask, StepContext};
pub use progress::{ProgressCell, TaskProgress};

use crate::core::Result;
use async_trait::async_trait;

/// A unit of work that runs at most once.
///
/// `run` executes on the caller's task. It returns
/// [`crate::MigrationError::Canceled`] without doing anything if `cancel`
/// was called first; otherwise cancellation is observed at the points the
/// implementation checks for it. `progress` may be polled from any thread
/// while `run` is in progress and never waits on it.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;

    fn cancel(&self);

    fn is_canceled(&self) -> bool;

    fn progress(&self) -> TaskProgress;
}
