//! Error types for the array plugin.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the array state machine.
#[derive(Debug, Error)]
pub enum ArrayError {
  /// The task template or its array job descriptor is missing or malformed.
  /// Never retried.
  #[error("bad task specification: {message}")]
  BadTaskSpecification { message: String },

  /// A catalog, data store or backend call failed. Retried on the next poll
  /// without advancing the phase.
  #[error("downstream system error: {message}: {source}")]
  DownstreamSystem {
    message: String,
    #[source]
    source: BoxError,
  },

  /// Programmer error.
  #[error("internal error: {message}")]
  Internal { message: String },
}

impl ArrayError {
  pub fn bad_spec(message: impl Into<String>) -> Self {
    ArrayError::BadTaskSpecification {
      message: message.into(),
    }
  }

  pub fn downstream(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
    ArrayError::DownstreamSystem {
      message: message.into(),
      source: source.into(),
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, ArrayError::DownstreamSystem { .. })
  }

  pub fn is_permanent(&self) -> bool {
    matches!(self, ArrayError::BadTaskSpecification { .. })
  }
}

impl From<StoreError> for ArrayError {
  fn from(e: StoreError) -> Self {
    ArrayError::Internal {
      message: e.to_string(),
    }
  }
}

/// Errors from the [`crate::JobStore`].
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("job store lock poisoned: {message}")]
  LockPoisoned { message: String },

  #[error("job '{job_name}' not found")]
  JobNotFound { job_name: String },

  #[error("job '{job_name}' has {len} sub-jobs, no index {index}")]
  SubJobOutOfRange {
    job_name: String,
    index: usize,
    len: usize,
  },
}

/// Errors from a compute [`crate::Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
  /// The backend could not be reached.
  #[error("backend unavailable: {0}")]
  Unavailable(String),

  /// The backend has no record of the job.
  #[error("backend job '{0}' not found")]
  JobNotFound(String),

  /// The backend refused the request.
  #[error("backend rejected request: {0}")]
  Rejected(String),
}
