use crate::cluster::{ClusterJoinCheck, JoinCheckResult, JoinRequest, PassivationTarget};
use crate::core::Result;
use crate::maintenance::{MaintenanceService, MaintenanceTaskInfo};
use async_trait::async_trait;
use std::sync::Arc;

/// Keeps a node running a maintenance task from merging with one that does
/// not know about it.
pub struct MaintenanceStateCheck {
    maintenance: Arc<MaintenanceService>,
}

impl MaintenanceStateCheck {
    pub const NAME: &'static str = "maintenance-state";

    pub fn new(maintenance: Arc<MaintenanceService>) -> Self {
        Self { maintenance }
    }

    /// Decides from this node's view given both nodes' latest task.
    pub fn decide(
        local: Option<&MaintenanceTaskInfo>,
        remote: Option<&MaintenanceTaskInfo>,
    ) -> JoinCheckResult {
        let remote_running = remote.is_some_and(MaintenanceTaskInfo::is_running);
        let Some(local) = local else {
            return if remote_running {
                JoinCheckResult::passivate(
                    PassivationTarget::ThisNode,
                    "Peer is running a maintenance task this node does not know",
                )
            } else {
                JoinCheckResult::Ok
            };
        };

        if remote.is_some_and(|r| r.id == local.id) {
            return JoinCheckResult::Ok;
        }
        if local.is_running() {
            JoinCheckResult::passivate(
                PassivationTarget::OtherNode,
                format!("Peer does not take part in maintenance task '{}'", local.id),
            )
        } else if remote_running {
            JoinCheckResult::passivate(
                PassivationTarget::ThisNode,
                "Peer is running a different maintenance task",
            )
        } else {
            JoinCheckResult::Ok
        }
    }
}

#[async_trait]
impl ClusterJoinCheck for MaintenanceStateCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn order(&self) -> i32 {
        10
    }

    async fn accept(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        let remote: Option<MaintenanceTaskInfo> = request.receive().await?;
        let local = self.maintenance.latest_task();
        request.send(&local).await?;
        Ok(Self::decide(local.as_ref(), remote.as_ref()))
    }

    async fn connect(&self, request: &mut JoinRequest) -> Result<JoinCheckResult> {
        let local = self.maintenance.latest_task();
        request.send(&local).await?;
        let remote: Option<MaintenanceTaskInfo> = request.receive().await?;
        Ok(Self::decide(local.as_ref(), remote.as_ref()))
    }
}
