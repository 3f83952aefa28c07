//! Leaf steps of the migration workflow.

use super::MigrationContext;
use super::state::MigrationState;
use crate::core::MigrationError;
use crate::database::{DrainHelper, LatchMode};
use crate::task::FnTask;
use log::{info, warn};
use std::sync::Arc;

pub(super) fn latch_and_drain(
    ctx: MigrationContext,
    state: Arc<MigrationState>,
    mode: LatchMode,
) -> FnTask {
    FnTask::new("latch and drain", move |step| async move {
        let latch = ctx.database.acquire_latch(mode)?;
        state.set_latch(Arc::clone(&latch));
        step.report(10.0);

        let drained = DrainHelper::drain_cancellable(
            &latch,
            ctx.settings.drain_soft_timeout(),
            ctx.settings.drain_force_timeout(),
            step.cancel_flag(),
        )
        .await?;
        if !drained {
            warn!(
                "Proceeding with migration although {} did not drain",
                latch.latched_handle()
            );
        }
        Ok(())
    })
}

pub(super) fn release_affixed(ctx: MigrationContext) -> FnTask {
    FnTask::new("release database components", move |step| async move {
        let total = ctx.affixed.len();
        for (index, component) in ctx.affixed.iter().enumerate() {
            step.check_canceled()?;
            component.release()?;
            info!("Released database component '{}'", component.name());
            step.report_fraction(index + 1, total);
        }
        Ok(())
    })
}

pub(super) fn backup_database(ctx: MigrationContext, state: Arc<MigrationState>) -> FnTask {
    FnTask::new("database backup", move |step| async move {
        ctx.backup
            .backup_database(
                state.source_database(),
                &state.database_backup_path(),
                &step,
            )
            .await
    })
}

pub(super) fn backup_configuration(ctx: MigrationContext, state: Arc<MigrationState>) -> FnTask {
    FnTask::new("configuration backup", move |step| async move {
        let config = match ctx.config_store.load_data_source_configuration().await? {
            Some(config) => config,
            None => state.source_database().config().clone(),
        };
        step.check_canceled()?;
        let bytes = serde_json::to_vec_pretty(&config)?;
        tokio::fs::write(state.configuration_backup_path(), bytes).await?;
        Ok(())
    })
}

pub(super) fn unpack_backup(ctx: MigrationContext, state: Arc<MigrationState>) -> FnTask {
    FnTask::new("unpack backup", move |step| async move {
        ctx.backup
            .unpack(&state.database_backup_path(), &state.unpacked_dir(), &step)
            .await
    })
}

pub(super) fn restore_database(ctx: MigrationContext, state: Arc<MigrationState>) -> FnTask {
    FnTask::new("database restore", move |step| async move {
        ctx.backup
            .restore_database(state.target_database(), &state.unpacked_dir(), &step)
            .await
    })
}

pub(super) fn unlatch_to_target(state: Arc<MigrationState>) -> FnTask {
    FnTask::new("switch to target database", move |_step| async move {
        let latch = state
            .take_latch()
            .ok_or_else(|| MigrationError::failed("no database latch held at cutover"))?;
        latch.unlatch_to(Arc::clone(state.target_database()))
    })
}

pub(super) fn finalize(ctx: MigrationContext, state: Arc<MigrationState>, note: String) -> FnTask {
    FnTask::new("finalize migration", move |step| async move {
        ctx.config_store
            .save_data_source_configuration(state.target_database().config(), &note)
            .await?;
        step.report(50.0);

        // The new configuration is already active; a source that refuses to
        // close is left for the operator rather than rolled back.
        if let Err(err) = ctx.database.close_handle(state.source_database()).await {
            warn!(
                "Could not close previous database {}: {}",
                state.source_database(),
                err
            );
        }
        Ok(())
    })
}
