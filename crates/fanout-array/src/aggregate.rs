//! Turns raw sub-job phases into the array's phase.
//!
//! Success is declared once nothing is pending and the threshold is met, so
//! every sub-job that succeeds gets cached. Failure is declared as soon as the
//! threshold can no longer be reached.

use std::collections::BTreeMap;

use fanout_core::{CompactArray, Phase};
use tracing::{debug, info};

use crate::state::ArrayPhase;
use crate::status::{ArraySummary, ArrayStatus};
use crate::store::JobStatus;

/// Decide the array phase from a summary of (normalised) sub-job phases.
///
/// `Success` counts toward the threshold, `PermanentFailure` is final, and
/// everything else (including `RetryableFailure`) is still pending.
pub fn summary_to_phase(min_successes: u64, summary: &ArraySummary) -> ArrayPhase {
  let total = summary.total();
  let successes = summary.count(Phase::Success);
  let failures = summary.count(Phase::PermanentFailure);
  let pending = total - successes - failures;

  if pending == 0 && successes >= min_successes {
    info!(pending, successes, failures, min_successes, "array_succeeded");
    return ArrayPhase::WriteToDiscovery;
  }

  if pending + successes < min_successes {
    info!(
      pending,
      successes,
      failures,
      min_successes,
      "array_cannot_reach_min_successes"
    );
    return ArrayPhase::WriteToDiscoveryThenFail;
  }

  debug!(pending, successes, failures, min_successes, "array_still_running");
  ArrayPhase::CheckingSubTaskExecutions
}

/// Collects per-index failure messages.
#[derive(Debug, Default)]
pub struct ErrorCollector {
  messages: BTreeMap<usize, String>,
}

impl ErrorCollector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn collect(&mut self, index: usize, message: impl Into<String>) {
    self.messages.insert(index, message.into());
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }

  /// `[index]: message` lines in index order, cut to at most `limit` bytes.
  pub fn summary(&self, limit: usize) -> String {
    let mut out = String::new();
    for (index, message) in &self.messages {
      let line = format!("[{}]: {}\n", index, message);
      if out.len() + line.len() > limit {
        if out.is_empty() {
          let mut end = limit.min(line.len());
          while !line.is_char_boundary(end) {
            end -= 1;
          }
          out.push_str(&line[..end]);
        }
        break;
      }
      out.push_str(&line);
    }
    out
  }
}

/// Result of aggregating one poll's sub-job statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
  pub phase: ArrayPhase,
  pub version: u32,
  pub status: ArrayStatus,
  pub retry_attempts: CompactArray,
  /// Failure messages, empty when nothing failed.
  pub reason: String,
}

/// Policy inputs for [`aggregate`].
#[derive(Debug, Clone, Copy)]
pub struct AggregatePolicy {
  /// Successes required from the sub-jobs (cache hits already subtracted).
  pub min_successes: u64,
  pub max_attempts: u32,
  pub max_error_len: usize,
}

/// Normalise a sub-job's phase: a retryable failure with attempts left stays
/// retryable, otherwise it is permanent.
fn effective_phase(status: &JobStatus, max_attempts: u32) -> Phase {
  match status.phase {
    Phase::RetryableFailure if status.attempts < max_attempts => Phase::RetryableFailure,
    phase if phase.is_failure() => Phase::PermanentFailure,
    phase => phase,
  }
}

/// Aggregate sub-job statuses, positionally aligned with compacted indices.
pub fn aggregate(sub_jobs: &[JobStatus], policy: AggregatePolicy) -> Aggregate {
  let mut status = ArrayStatus::new(sub_jobs.len());
  let mut retry_attempts = CompactArray::new(sub_jobs.len(), u8::MAX.into());
  let mut errors = ErrorCollector::new();

  for (index, sub_job) in sub_jobs.iter().enumerate() {
    let phase = effective_phase(sub_job, policy.max_attempts);
    if phase.is_failure() && !sub_job.message.is_empty() {
      errors.collect(index, sub_job.message.clone());
    }

    status.detailed.set(index, phase.ordinal().into());
    status.summary.inc(phase);
    retry_attempts.set(index, u64::from(sub_job.attempts.min(u8::MAX.into())));
  }

  let phase = summary_to_phase(policy.min_successes, &status.summary);
  let version = if phase == ArrayPhase::CheckingSubTaskExecutions {
    status.summary.version()
  } else {
    0
  };

  Aggregate {
    phase,
    version,
    status,
    retry_attempts,
    reason: errors.summary(policy.max_error_len),
  }
}
