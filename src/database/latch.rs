use super::current::CurrentDatabaseRef;
use super::handle::DatabaseHandle;
use crate::core::{MigrationError, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

static NEXT_LATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Scope of a latch, chosen by whoever acquires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatchMode {
    /// Only this node stops routing traffic.
    Local,
    /// The whole cluster is expected to be quiesced.
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatchState {
    /// Traffic flows to the live handle. Only observed through the gate.
    Open,
    /// New acquisitions are parked, existing operations are finishing.
    Draining,
    /// No operation is running against the latched handle.
    Drained,
    /// Released; traffic points at the handle given to `unlatch_to`.
    Switched,
}

/// Shared routing state: the current database plus the latch gate in front of it.
pub(crate) struct DatabaseGate {
    pub(crate) current: CurrentDatabaseRef,
    held: Mutex<Option<(u64, Weak<DatabaseLatch>)>>,
    latched: watch::Sender<bool>,
}

impl DatabaseGate {
    pub(crate) fn new(handle: Arc<DatabaseHandle>) -> Arc<Self> {
        let (latched, _) = watch::channel(false);
        Arc::new(Self {
            current: CurrentDatabaseRef::new(handle),
            held: Mutex::new(None),
            latched,
        })
    }

    fn lock_held(&self) -> MutexGuard<'_, Option<(u64, Weak<DatabaseLatch>)>> {
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn is_latched(&self) -> bool {
        *self.latched.borrow()
    }

    pub(crate) fn try_latch(self: &Arc<Self>, mode: LatchMode) -> Result<Arc<DatabaseLatch>> {
        // Declared before the guard so a last strong reference is dropped
        // after the slot is unlocked.
        let existing: Option<Arc<DatabaseLatch>>;
        let mut held = self.lock_held();
        existing = held.as_ref().and_then(|(_, latch)| latch.upgrade());
        if let Some(existing) = &existing {
            if !existing.is_released() {
                return Err(MigrationError::AlreadyLatched(format!(
                    "latch #{} in {:?} mode",
                    existing.id, existing.mode
                )));
            }
        }

        let latch = Arc::new(DatabaseLatch {
            id: NEXT_LATCH_ID.fetch_add(1, Ordering::Relaxed),
            mode,
            latched: self.current.load(),
            inner: Mutex::new(LatchInner {
                state: LatchState::Draining,
                switched_to: None,
            }),
            gate: Arc::clone(self),
        });
        *held = Some((latch.id, Arc::downgrade(&latch)));
        self.latched.send_replace(true);

        info!(
            "Database latch #{} acquired ({:?}) on {}",
            latch.id, mode, latch.latched
        );
        Ok(latch)
    }

    pub(crate) fn current_latch(&self) -> Option<Arc<DatabaseLatch>> {
        let latch = self.lock_held().as_ref().and_then(|(_, latch)| latch.upgrade());
        latch.filter(|latch| !latch.is_released())
    }

    /// Parks until no latch is held.
    pub(crate) async fn wait_open(&self) {
        let mut rx = self.latched.subscribe();
        // The sender lives as long as `self`, so this only errors on shutdown.
        let _ = rx.wait_for(|latched| !*latched).await;
    }

    fn release(&self, latch_id: u64) {
        let mut held = self.lock_held();
        if held.as_ref().is_none_or(|(id, _)| *id == latch_id) {
            *held = None;
            self.latched.send_replace(false);
        }
    }
}

struct LatchInner {
    state: LatchState,
    switched_to: Option<Arc<DatabaseHandle>>,
}

/// Gate suspending new database acquisitions while traffic is redirected.
///
/// A latch is obtained from [`super::DatabaseManager::acquire_latch`] and
/// starts in [`LatchState::Draining`]. [`DatabaseLatch::unlatch_to`] is the
/// only way out: it points the current database at the given handle and
/// wakes every parked caller. Dropping a latch that was never released
/// reopens the gate on the database that was latched.
pub struct DatabaseLatch {
    id: u64,
    mode: LatchMode,
    latched: Arc<DatabaseHandle>,
    inner: Mutex<LatchInner>,
    gate: Arc<DatabaseGate>,
}

impl DatabaseLatch {
    fn lock_inner(&self) -> MutexGuard<'_, LatchInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> LatchMode {
        self.mode
    }

    pub fn state(&self) -> LatchState {
        self.lock_inner().state
    }

    /// Database that was current when the latch was taken
    pub fn latched_handle(&self) -> &Arc<DatabaseHandle> {
        &self.latched
    }

    /// Handle the latch released traffic to, once switched
    pub fn switched_to(&self) -> Option<Arc<DatabaseHandle>> {
        self.lock_inner().switched_to.clone()
    }

    pub fn is_released(&self) -> bool {
        self.state() == LatchState::Switched
    }

    pub(crate) fn mark_drained(&self) {
        let mut inner = self.lock_inner();
        if inner.state == LatchState::Draining {
            inner.state = LatchState::Drained;
        }
    }

    /// Routes all traffic to `handle` and releases parked callers.
    ///
    /// Valid from `Draining` as well as `Drained`, so a timed-out drain can
    /// still be resolved. Calling it on a latch that was already released
    /// does nothing.
    pub fn unlatch_to(&self, handle: Arc<DatabaseHandle>) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.state == LatchState::Switched {
            debug!("Database latch #{} already released", self.id);
            return Ok(());
        }
        if handle.is_closed() {
            return Err(MigrationError::HandleClosed(handle.id()));
        }

        let previous = self.gate.current.store(Arc::clone(&handle));
        inner.state = LatchState::Switched;
        inner.switched_to = Some(Arc::clone(&handle));
        drop(inner);

        self.gate.release(self.id);
        info!(
            "Database latch #{} released: {} -> {}",
            self.id, previous, handle
        );
        Ok(())
    }
}

impl fmt::Debug for DatabaseLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseLatch")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("latched", &self.latched.id())
            .finish()
    }
}

impl Drop for DatabaseLatch {
    fn drop(&mut self) {
        let state = match self.inner.get_mut() {
            Ok(inner) => inner.state,
            Err(poisoned) => poisoned.into_inner().state,
        };
        if state != LatchState::Switched {
            warn!(
                "Database latch #{} dropped in {:?} state; reopening {}",
                self.id, state, self.latched
            );
            self.gate.release(self.id);
        }
    }
}
