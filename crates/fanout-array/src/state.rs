//! Persisted state of one array task.
//!
//! `State` is the only thing carried between polls. It is an immutable value:
//! every transition consumes it and returns the next one.

use fanout_core::{BitSet, CompactArray};
use serde::{Deserialize, Serialize};

use crate::status::ArrayStatus;
use crate::tracker::CacheTracking;

/// Lifecycle of an array task. Ordered; a task never moves to an earlier
/// phase.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArrayPhase {
  #[default]
  NotStarted,
  /// Catalog lookups are queued and not yet finished.
  SubmittedToCatalogReader,
  /// Sizing is final and the index mapping file is written.
  MappingFileCreated,
  JobSubmitted,
  CheckingSubTaskExecutions,
  WriteToDiscovery,
  /// Cache whatever succeeded, then fail the task.
  WriteToDiscoveryThenFail,
  JobsFinished,
  PermanentFailure,
}

impl ArrayPhase {
  pub fn is_terminal(self) -> bool {
    matches!(self, ArrayPhase::JobsFinished | ArrayPhase::PermanentFailure)
  }
}

impl std::fmt::Display for ArrayPhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Debug::fmt(self, f)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
  pub current_phase: ArrayPhase,
  /// Bumped while the phase stays the same but sub-jobs make progress.
  pub phase_version: u32,
  pub reason: String,
  pub original_array_size: u64,
  pub execution_array_size: u64,
  pub original_min_successes: u64,
  /// Original indices that still need their result written to the catalog.
  pub indexes_to_cache: BitSet,
  pub array_status: ArrayStatus,
  /// Attempts per compacted index.
  pub retry_attempts: CompactArray,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub external_job_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub job_definition: Option<String>,
}

impl State {
  pub fn new() -> Self {
    Self::default()
  }

  /// Move to `phase` at `version`. An attempt to move backwards is ignored.
  pub fn with_phase(self, phase: ArrayPhase, version: u32) -> Self {
    if phase < self.current_phase {
      return self;
    }

    Self {
      current_phase: phase,
      phase_version: version,
      ..self
    }
  }

  pub fn with_reason(self, reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
      ..self
    }
  }

  /// Record the requested fan-out and success threshold.
  pub fn with_request(self, original_array_size: u64, original_min_successes: u64) -> Self {
    Self {
      original_array_size,
      original_min_successes,
      ..self
    }
  }

  /// Record the outcome of catalog sizing.
  pub fn with_tracking(self, tracking: &CacheTracking) -> Self {
    let execution_array_size = tracking.execution_array_size;
    let len = execution_array_size as usize;
    Self {
      execution_array_size,
      indexes_to_cache: tracking.indexes_to_cache.clone(),
      array_status: ArrayStatus::new(len),
      retry_attempts: CompactArray::new(len, u8::MAX.into()),
      ..self
    }
  }

  pub fn with_job(self, external_job_id: impl Into<String>, job_definition: impl Into<String>) -> Self {
    Self {
      external_job_id: Some(external_job_id.into()),
      job_definition: Some(job_definition.into()),
      ..self
    }
  }

  pub fn with_array_status(self, array_status: ArrayStatus, retry_attempts: CompactArray) -> Self {
    Self {
      array_status,
      retry_attempts,
      ..self
    }
  }

  /// Successes still required from the submitted sub-jobs. Cache hits count
  /// toward the original threshold.
  pub fn adjusted_min_successes(&self) -> u64 {
    let hits = self
      .original_array_size
      .saturating_sub(self.execution_array_size);
    self.original_min_successes.saturating_sub(hits)
  }
}
