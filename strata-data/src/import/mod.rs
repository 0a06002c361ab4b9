//! Concurrent import sessions.
//!
//! An [`Importer`] runs one session at a time. Starting a session opens the
//! target database, creates the reference cache and hands one
//! [`ImportHelper`] to each worker thread. Features submitted through
//! [`Importer::import_feature`] are queued and persisted in batches; the
//! session ends with [`Importer::commit_session`], which flushes every worker
//! and resolves cached references once, or with [`Importer::abort_session`].
#![forbid(unsafe_code)]

mod control;
mod error;
mod graph;
mod handle;
mod helper;
mod options;
mod pool;
pub mod tables;

#[cfg(test)]
mod tests;

use std::{fmt, sync::Arc};

use rusqlite::Connection;
use strata_core::{Feature, ImportLogger, NoopImportLogger};

pub use control::ImportCounts;
pub use error::ImportError;
pub use handle::{HandleError, ImportHandle};
pub use helper::ImportHelper;
pub use options::{DEFAULT_BATCH_SIZE, ImportOptions, TransactionMode};
pub use tables::{
    BufferedTableImporter, Row, TableImporter, TableImporterFactory, TableRegistry, TableSet,
};

use self::{control::SessionControl, error::describe, pool::WorkerPool};
use crate::{
    adapter::SqliteAdapter,
    reference::{DanglingReference, ReferenceManager},
    schema::Table,
};

/// Lifecycle of an import session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session has been started yet.
    NotStarted,
    /// Workers are running and accept features.
    Started,
    /// The session committed and resolved its references.
    Committed,
    /// The session was aborted or stopped by a failure.
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not started",
            Self::Started => "started",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}

/// Totals reported by a committed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Feature hierarchies persisted.
    pub imported: u64,
    /// Feature hierarchies rejected.
    pub failed: u64,
    /// Feature hierarchies cancelled before processing.
    pub cancelled: u64,
    /// Foreign keys filled in by reference resolution.
    pub references_resolved: u64,
    /// References whose target was never imported.
    pub dangling_references: Vec<DanglingReference>,
}

/// Session orchestrator.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use strata_core::{Feature, NoopImportLogger};
/// use strata_data::{ImportOptions, Importer, SqliteAdapter};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut importer = Importer::new(Arc::new(NoopImportLogger));
/// importer.start_session(&SqliteAdapter::new("city.db"), ImportOptions::default())?;
/// let handle = importer.import_feature(Feature::new("Building").with_object_id("BLDG_1"))?;
/// let summary = importer.commit_session()?;
/// assert_eq!(handle.wait()?.object_id.as_deref(), Some("BLDG_1"));
/// assert_eq!(summary.imported, 1);
/// # Ok(())
/// # }
/// ```
pub struct Importer {
    logger: Arc<dyn ImportLogger>,
    registry: TableRegistry,
    state: SessionState,
    session: Option<Session>,
    summary: Option<SessionSummary>,
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Default for Importer {
    fn default() -> Self {
        Self::new(Arc::new(NoopImportLogger))
    }
}

impl Importer {
    /// Create an importer reporting to `logger`.
    pub fn new(logger: Arc<dyn ImportLogger>) -> Self {
        Self {
            logger,
            registry: TableRegistry::new(),
            state: SessionState::NotStarted,
            session: None,
            summary: None,
        }
    }

    /// Build the importer for `table` with `factory` in every session.
    #[must_use]
    pub fn with_table_importer(mut self, table: Table, factory: TableImporterFactory) -> Self {
        self.registry.register(table, factory);
        self
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a session is started and has not failed.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.control.is_running())
    }

    /// The error that stopped the current session, if any.
    pub fn failure(&self) -> Option<Arc<ImportError>> {
        self.session
            .as_ref()
            .and_then(|session| session.control.failure())
    }

    /// Summary of the committed session.
    pub const fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    /// Start a session against `adapter`.
    ///
    /// Calling this on a started session does nothing. On failure nothing is
    /// left running and the importer stays [`SessionState::NotStarted`].
    pub fn start_session(
        &mut self,
        adapter: &SqliteAdapter,
        options: ImportOptions,
    ) -> Result<(), ImportError> {
        match self.state {
            SessionState::Started => return Ok(()),
            SessionState::NotStarted => {}
            found => return Err(illegal("start session", SessionState::NotStarted, found)),
        }
        let session = Session::start(adapter, options, &self.registry, &self.logger)?;
        log::info!(
            "import session started: {} worker(s), batch size {}, {:?} mode, database {}",
            session.pool.len(),
            session.options.effective_batch_size(adapter.max_batch_size()),
            session.options.mode,
            adapter.path()
        );
        self.session = Some(session);
        self.state = SessionState::Started;
        Ok(())
    }

    /// Queue `feature` and return a handle to its outcome.
    ///
    /// Blocks while the queue is full. Once the session has failed the
    /// returned handle is already cancelled and the feature is dropped.
    pub fn import_feature(&self, feature: Feature) -> Result<ImportHandle, ImportError> {
        let session = self.started("import feature")?;
        if !session.control.is_running() {
            session.control.record_cancelled();
            return Ok(ImportHandle::cancelled());
        }
        session.pool.submit(feature)
    }

    /// Flush every worker, resolve references and end the session.
    ///
    /// Committing again returns the stored summary. Dry-run sessions cannot
    /// be committed and stay started. If a worker failed, the session is
    /// aborted instead and the triggering error is returned.
    pub fn commit_session(&mut self) -> Result<SessionSummary, ImportError> {
        match self.state {
            SessionState::Committed => {
                return self.summary.clone().ok_or(ImportError::IllegalState {
                    operation: "commit session",
                    expected: SessionState::Started,
                    found: SessionState::Committed,
                });
            }
            SessionState::Started => {}
            found => return Err(illegal("commit session", SessionState::Started, found)),
        }
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.options.mode == TransactionMode::DryRun)
        {
            return Err(ImportError::DryRunCommit);
        }
        let Some(session) = self.session.take() else {
            return Err(illegal("commit session", SessionState::Started, self.state));
        };

        match session.commit() {
            Ok(summary) => {
                log::info!(
                    "import session committed: {} imported, {} failed, {} cancelled, {} reference(s) resolved, {} dangling",
                    summary.imported,
                    summary.failed,
                    summary.cancelled,
                    summary.references_resolved,
                    summary.dangling_references.len()
                );
                self.state = SessionState::Committed;
                self.summary = Some(summary.clone());
                Ok(summary)
            }
            Err(error) => {
                self.state = SessionState::Aborted;
                Err(error)
            }
        }
    }

    /// End the session without committing buffered rows.
    ///
    /// Batches already committed in [`TransactionMode::Normal`] stay
    /// committed. Aborting twice does nothing.
    pub fn abort_session(&mut self) -> Result<(), ImportError> {
        match self.state {
            SessionState::Aborted => return Ok(()),
            SessionState::Started => {}
            found => return Err(illegal("abort session", SessionState::Started, found)),
        }
        self.state = SessionState::Aborted;
        match self.session.take() {
            Some(session) => session.abort(),
            None => Ok(()),
        }
    }

    fn started(&self, operation: &'static str) -> Result<&Session, ImportError> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Started) => Ok(session),
            (_, found) => Err(illegal(operation, SessionState::Started, found)),
        }
    }
}

impl Drop for Importer {
    fn drop(&mut self) {
        if self.state == SessionState::Started
            && let Err(error) = self.abort_session()
        {
            log::warn!("failed to abort import session on drop: {}", describe(&error));
        }
    }
}

const fn illegal(operation: &'static str, expected: SessionState, found: SessionState) -> ImportError {
    ImportError::IllegalState {
        operation,
        expected,
        found,
    }
}

/// Resources owned by a started session.
struct Session {
    control: Arc<SessionControl>,
    pool: WorkerPool,
    references: ReferenceManager,
    connection: Connection,
    options: ImportOptions,
}

impl Session {
    fn start(
        adapter: &SqliteAdapter,
        options: ImportOptions,
        registry: &TableRegistry,
        logger: &Arc<dyn ImportLogger>,
    ) -> Result<Self, ImportError> {
        let references = ReferenceManager::create(options.temp_dir.as_deref())?;
        let connection = adapter.initialise()?;
        let workers = options.worker_count();
        let helpers = (0..workers)
            .map(|worker| {
                Ok(ImportHelper::new(
                    worker,
                    adapter.connect()?,
                    registry.instantiate(),
                    references.cache(),
                    Arc::clone(logger),
                    &options,
                    adapter.max_batch_size(),
                ))
            })
            .collect::<Result<Vec<_>, ImportError>>()?;
        let control = SessionControl::new();
        let pool = WorkerPool::spawn(
            helpers,
            &control,
            options.queue_capacity(workers),
            options.fail_fast,
        )?;
        Ok(Self {
            control,
            pool,
            references,
            connection,
            options,
        })
    }

    fn commit(self) -> Result<SessionSummary, ImportError> {
        let Self {
            control,
            pool,
            references,
            mut connection,
            options,
        } = self;
        control.wait_idle();

        if let Some(failure) = control.failure() {
            log::error!("import session failed, aborting: {}", describe(&*failure));
            report_close_errors(pool.finish(false));
            discard(references);
            return Err(ImportError::Aborted { source: failure });
        }

        if let Some(error) = pool.finish(true).into_iter().find_map(Result::err) {
            log::error!("failed to flush import workers: {}", describe(&*error));
            discard(references);
            return Err(ImportError::Aborted { source: error });
        }

        let report = references.resolve(&mut connection, options.fail_fast)?;
        for dangling in &report.dangling {
            log::debug!("unresolved reference: {dangling}");
        }
        let counts = control.counts();
        Ok(SessionSummary {
            imported: counts.imported,
            failed: counts.failed,
            cancelled: counts.cancelled,
            references_resolved: report.resolved,
            dangling_references: report.dangling,
        })
    }

    fn abort(self) -> Result<(), ImportError> {
        let Self {
            control,
            pool,
            references,
            ..
        } = self;
        control.wait_idle();
        if let Some(failure) = control.failure() {
            log::error!("aborting failed import session: {}", describe(&*failure));
        }
        report_close_errors(pool.finish(false));
        references.discard()?;
        log::info!("import session aborted");
        Ok(())
    }
}

fn report_close_errors(results: Vec<Result<(), Arc<ImportError>>>) {
    for error in results.into_iter().filter_map(Result::err) {
        log::warn!("import worker did not close cleanly: {}", describe(&*error));
    }
}

fn discard(references: ReferenceManager) {
    if let Err(error) = references.discard() {
        log::warn!("failed to discard reference cache: {}", describe(&error));
    }
}
