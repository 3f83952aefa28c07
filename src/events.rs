//! Lifecycle notifications for maintenance work.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    /// Replace the database of a configured system.
    Migrate,
    /// First-time bootstrap of a fresh system.
    Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    MigrationStarted {
        task_id: String,
        kind: MigrationKind,
        target_url: String,
    },
    MigrationSucceeded {
        task_id: String,
        kind: MigrationKind,
    },
    MigrationFailed {
        task_id: String,
        kind: MigrationKind,
        reason: String,
    },
    MigrationCanceled {
        task_id: String,
        kind: MigrationKind,
    },
    MaintenanceModeEntered,
    MaintenanceModeExited,
}

/// Fire-and-forget sink for [`MigrationEvent`]s.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: MigrationEvent);
}

/// Publisher fanning events out to any number of tokio subscribers.
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<MigrationEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: MigrationEvent) {
        // No subscribers is not an error for a notification.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let publisher = BroadcastEventPublisher::default();
        let mut rx = publisher.subscribe();

        publisher.publish(MigrationEvent::MaintenanceModeEntered);
        publisher.publish(MigrationEvent::MigrationCanceled {
            task_id: "t".into(),
            kind: MigrationKind::Migrate,
        });

        assert_eq!(rx.recv().await.unwrap(), MigrationEvent::MaintenanceModeEntered);
        assert!(matches!(
            rx.recv().await.unwrap(),
            MigrationEvent::MigrationCanceled { .. }
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        BroadcastEventPublisher::new(1).publish(MigrationEvent::MaintenanceModeExited);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(MigrationEvent::MigrationSucceeded {
            task_id: "t1".into(),
            kind: MigrationKind::Setup,
        })
        .unwrap();
        assert_eq!(json["event"], "migration_succeeded");
        assert_eq!(json["kind"], "setup");
    }
}
