//! Catalog processing errors.

use fanout_core::CatalogError;
use fanout_workqueue::{WorkItemId, WorkQueueError};

/// Error produced by a single reader or writer attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
  /// The queue handed a processor the wrong kind of item. This is a wiring
  /// bug, not a runtime condition.
  #[error("wrong work item type for [{item_id}]: expected {expected}, got {actual}")]
  WrongItemType {
    item_id: WorkItemId,
    expected: &'static str,
    actual: &'static str,
  },

  /// The catalog (or the data store behind it) failed.
  #[error("error {operation} [{item_id}] catalog, key id [{identifier}] cache version [{cache_version}]: {source}")]
  DownstreamSystem {
    operation: &'static str,
    item_id: WorkItemId,
    identifier: String,
    cache_version: String,
    #[source]
    source: CatalogError,
  },
}

impl ProcessError {
  pub fn is_wrong_item_type(&self) -> bool {
    matches!(self, ProcessError::WrongItemType { .. })
  }
}

/// Error returned by [`crate::AsyncCatalogClient`] calls.
#[derive(Debug, thiserror::Error)]
pub enum AsyncClientError {
  #[error("failed to queue catalog work: {0}")]
  Queue(#[from] WorkQueueError),
}
