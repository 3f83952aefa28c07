use super::handle::DatabaseHandle;
use std::sync::{Arc, RwLock};

/// Slot holding the database every new operation is routed to.
///
/// Readers get a cloned `Arc`, so the slot never exposes an empty or
/// half-written pointer. Only [`super::DatabaseLatch::unlatch_to`] writes it.
#[derive(Debug)]
pub struct CurrentDatabaseRef {
    slot: RwLock<Arc<DatabaseHandle>>,
}

impl CurrentDatabaseRef {
    pub(crate) fn new(handle: Arc<DatabaseHandle>) -> Self {
        Self {
            slot: RwLock::new(handle),
        }
    }

    pub fn load(&self) -> Arc<DatabaseHandle> {
        match self.slot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replaces the current handle and returns the previous one.
    pub(super) fn store(&self, handle: Arc<DatabaseHandle>) -> Arc<DatabaseHandle> {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, handle)
    }
}
