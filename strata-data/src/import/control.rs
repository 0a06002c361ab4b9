//! Shared session state: cancellation flag, first failure, outstanding work.

use std::sync::{
    Arc, Condvar, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use super::ImportError;

/// Counters reported in the session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub imported: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// State shared by the importer and every worker of one session.
#[derive(Debug)]
pub struct SessionControl {
    keep_running: AtomicBool,
    failure: Mutex<Option<Arc<ImportError>>>,
    outstanding: Mutex<usize>,
    drained: Condvar,
    imported: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self {
            keep_running: AtomicBool::new(true),
            failure: Mutex::new(None),
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            imported: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }
}

impl SessionControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    /// Stop the session because of `error`.
    ///
    /// Only the first caller flips the flag and has its error recorded; the
    /// return value tells whether this call was that caller.
    pub fn fail(&self, error: Arc<ImportError>) -> bool {
        if self
            .keep_running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        true
    }

    /// The error that stopped the session, if any.
    pub fn failure(&self) -> Option<Arc<ImportError>> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count a submitted job; the returned guard releases it when dropped.
    pub fn begin(self: &Arc<Self>) -> WorkGuard {
        *self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        WorkGuard {
            control: Arc::clone(self),
        }
    }

    /// Block until every outstanding job has been released.
    pub fn wait_idle(&self) {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *outstanding > 0 {
            outstanding = self
                .drained
                .wait(outstanding)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn outstanding(&self) -> usize {
        *self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.drained.notify_all();
        }
    }

    pub fn record_imported(&self) {
        self.imported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> ImportCounts {
        ImportCounts {
            imported: self.imported.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Keeps one job counted as outstanding until dropped, including on panic.
#[derive(Debug)]
pub struct WorkGuard {
    control: Arc<SessionControl>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.control.release();
    }
}
