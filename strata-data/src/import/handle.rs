//! Completion handles returned by `Importer::import_feature`.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use strata_core::FeatureDescriptor;
use thiserror::Error;

use super::ImportError;

/// Why a handle did not yield a descriptor.
#[derive(Debug, Clone, Error)]
pub enum HandleError {
    /// The session stopped before the feature was processed.
    #[error("feature import was cancelled")]
    Cancelled,
    /// Importing the feature failed.
    #[error("feature import failed: {0}")]
    Failed(Arc<ImportError>),
    /// The worker disappeared without reporting a result.
    #[error("import worker exited without reporting a result")]
    Disconnected,
}

pub(crate) type Outcome = Result<FeatureDescriptor, HandleError>;

/// Resolves to the [`FeatureDescriptor`] of a submitted feature.
///
/// The handle is returned before the feature is processed. Dropping it does
/// not cancel the import.
#[derive(Debug)]
pub struct ImportHandle {
    receiver: Option<Receiver<Outcome>>,
}

impl ImportHandle {
    pub(crate) fn pending() -> (Sender<Outcome>, Self) {
        let (sender, receiver) = channel::bounded(1);
        (
            sender,
            Self {
                receiver: Some(receiver),
            },
        )
    }

    pub(crate) const fn cancelled() -> Self {
        Self { receiver: None }
    }

    /// Whether the handle was cancelled at submission time.
    pub const fn is_cancelled(&self) -> bool {
        self.receiver.is_none()
    }

    /// Block until the feature has been processed.
    ///
    /// `Ok` means the feature was validated and staged into its worker's
    /// batch, not that the batch committed. A later batch failure is
    /// reported through the [`ImportLogger`](strata_core::ImportLogger) as
    /// [`CommitStatus::Failed`](strata_core::CommitStatus::Failed) and
    /// through the session result.
    pub fn wait(self) -> Result<FeatureDescriptor, HandleError> {
        match self.receiver {
            Some(receiver) => receiver.recv().unwrap_or(Err(HandleError::Disconnected)),
            None => Err(HandleError::Cancelled),
        }
    }
}
