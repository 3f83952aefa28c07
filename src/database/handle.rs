use crate::config::DataSourceConfig;
use crate::core::{MigrationError, Result};
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Reference to a live database connection target.
///
/// A handle is opaque to the migration core: it only tracks which
/// configuration it was opened from, how many operations are currently
/// running against it, and whether it was closed. Once closed a handle
/// never accepts work again.
pub struct DatabaseHandle {
    id: u64,
    config: DataSourceConfig,
    closed: AtomicBool,
    in_flight: watch::Sender<usize>,
    interrupt_generation: AtomicU64,
}

impl DatabaseHandle {
    pub(crate) fn new(config: DataSourceConfig) -> Arc<Self> {
        let (in_flight, _) = watch::channel(0);
        Arc::new(Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            closed: AtomicBool::new(false),
            in_flight,
            interrupt_generation: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of operations currently running against this handle
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Registers a new operation. The returned guard releases it when dropped.
    pub fn begin_operation(self: &Arc<Self>) -> Result<OperationGuard> {
        if self.is_closed() {
            return Err(MigrationError::HandleClosed(self.id));
        }
        self.in_flight.send_modify(|count| *count += 1);
        Ok(OperationGuard {
            handle: Arc::clone(self),
            generation: self.interrupt_generation.load(Ordering::SeqCst),
        })
    }

    /// Asks every operation started so far to stop as soon as it can.
    pub fn interrupt_operations(&self) {
        let generation = self.interrupt_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Interrupting {} in-flight operation(s) on database handle {} (generation {})",
            self.in_flight(),
            self.id,
            generation
        );
    }

    pub(crate) fn subscribe_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    /// Marks the handle closed. Returns `false` if it was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("id", &self.id)
            .field("url", &self.config.to_redacted_url())
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl fmt::Display for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.config.url())
    }
}

/// RAII guard for one in-flight database operation
#[derive(Debug)]
pub struct OperationGuard {
    handle: Arc<DatabaseHandle>,
    generation: u64,
}

impl OperationGuard {
    pub fn handle(&self) -> &Arc<DatabaseHandle> {
        &self.handle
    }

    /// Whether the drain asked this operation to give up.
    pub fn is_interrupted(&self) -> bool {
        self.handle.interrupt_generation.load(Ordering::SeqCst) > self.generation
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.handle
            .in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
