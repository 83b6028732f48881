use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and retry policy for a work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
  /// Number of items processed in parallel.
  pub workers: usize,
  /// Times a `NotDone` item is re-processed before it is marked `Failed`.
  pub max_retries: u32,
  /// Pause before a `NotDone` item is re-processed.
  pub retry_delay_ms: u64,
  /// Items still not done this long after being queued are marked `Failed`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub item_deadline_ms: Option<u64>,
}

impl Default for WorkQueueConfig {
  fn default() -> Self {
    Self {
      workers: 10,
      max_retries: 5,
      retry_delay_ms: 100,
      item_deadline_ms: None,
    }
  }
}

impl WorkQueueConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn item_deadline(&self) -> Option<Duration> {
    self.item_deadline_ms.map(Duration::from_millis)
  }
}
