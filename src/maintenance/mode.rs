use crate::events::{EventPublisher, MigrationEvent};
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Public availability switch of the service.
///
/// While a guard from [`MaintenanceMode::enter`] is alive the service reports
/// itself unavailable.
pub struct MaintenanceMode {
    active: AtomicBool,
    events: Option<Arc<dyn EventPublisher>>,
}

impl MaintenanceMode {
    pub fn new(events: Option<Arc<dyn EventPublisher>>) -> Self {
        Self {
            active: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn enter(self: &Arc<Self>) -> MaintenanceModeGuard {
        if !self.active.swap(true, Ordering::SeqCst) {
            info!("Entering maintenance mode");
            if let Some(events) = &self.events {
                events.publish(MigrationEvent::MaintenanceModeEntered);
            }
        }
        MaintenanceModeGuard {
            mode: Arc::clone(self),
        }
    }
}

impl Default for MaintenanceMode {
    fn default() -> Self {
        Self::new(None)
    }
}

pub struct MaintenanceModeGuard {
    mode: Arc<MaintenanceMode>,
}

impl Drop for MaintenanceModeGuard {
    fn drop(&mut self) {
        if self.mode.active.swap(false, Ordering::SeqCst) {
            info!("Leaving maintenance mode");
            if let Some(events) = &self.mode.events {
                events.publish(MigrationEvent::MaintenanceModeExited);
            }
        }
    }
}
