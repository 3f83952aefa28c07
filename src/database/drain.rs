use super::latch::DatabaseLatch;
use crate::core::{MigrationError, Result};
use crate::task::CancelFlag;
use log::{info, warn};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Bounded wait for in-flight operations on a latched database to finish.
///
/// The first window lets operations complete on their own. If some are still
/// running afterwards they are interrupted and a second window starts. The
/// outcome only says whether the database went quiet; callers are expected
/// to switch either way rather than block indefinitely.
pub struct DrainHelper;

impl DrainHelper {
    /// Returns `true` once nothing runs against the latched handle.
    pub async fn drain(latch: &DatabaseLatch, soft_timeout: Duration, force_timeout: Duration) -> bool {
        // A fresh flag can never fire, so this cannot return `Canceled`.
        Self::drain_cancellable(latch, soft_timeout, force_timeout, &CancelFlag::new())
            .await
            .unwrap_or(false)
    }

    /// Like [`DrainHelper::drain`] but gives up with
    /// [`MigrationError::Canceled`] as soon as `cancel` fires.
    pub async fn drain_cancellable(
        latch: &DatabaseLatch,
        soft_timeout: Duration,
        force_timeout: Duration,
        cancel: &CancelFlag,
    ) -> Result<bool> {
        let handle = latch.latched_handle();
        let started = Instant::now();
        let mut in_flight = handle.subscribe_in_flight();

        if wait_for_zero(&mut in_flight, soft_timeout, cancel).await? {
            latch.mark_drained();
            info!(
                "Drained {} in {:?} (latch #{})",
                handle,
                started.elapsed(),
                latch.id()
            );
            return Ok(true);
        }

        warn!(
            "{} operation(s) still running on {} after {:?}; interrupting",
            handle.in_flight(),
            handle,
            soft_timeout
        );
        handle.interrupt_operations();

        if wait_for_zero(&mut in_flight, force_timeout, cancel).await? {
            latch.mark_drained();
            info!(
                "Drained {} after interrupting operations ({:?})",
                handle,
                started.elapsed()
            );
            return Ok(true);
        }

        warn!(
            "Drain of {} timed out with {} operation(s) still running",
            handle,
            handle.in_flight()
        );
        Ok(false)
    }
}

async fn wait_for_zero(
    in_flight: &mut watch::Receiver<usize>,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<bool> {
    if *in_flight.borrow_and_update() == 0 {
        return Ok(true);
    }
    cancel.check()?;
    if timeout.is_zero() {
        return Ok(false);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(MigrationError::Canceled),
        waited = tokio::time::timeout(timeout, async {
            in_flight.wait_for(|count| *count == 0).await.is_ok()
        }) => Ok(waited.unwrap_or(false)),
    }
}
