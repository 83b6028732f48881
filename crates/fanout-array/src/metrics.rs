use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters for array tasks. Created once and shared.
#[derive(Debug, Default)]
pub struct ArrayMetrics {
  catalog_hits: AtomicU64,
  catalog_misses: AtomicU64,
  catalog_lookup_failures: AtomicU64,
  catalog_write_failures: AtomicU64,
  sub_tasks_succeeded: AtomicU64,
  sub_tasks_failed: AtomicU64,
  jobs_launched: AtomicU64,
}

/// Point-in-time copy of [`ArrayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
  pub catalog_hits: u64,
  pub catalog_misses: u64,
  pub catalog_lookup_failures: u64,
  pub catalog_write_failures: u64,
  pub sub_tasks_succeeded: u64,
  pub sub_tasks_failed: u64,
  pub jobs_launched: u64,
}

impl ArrayMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn record_lookups(&self, hits: u64, misses: u64, failures: u64) {
    self.catalog_hits.fetch_add(hits, Ordering::Relaxed);
    self.catalog_misses.fetch_add(misses, Ordering::Relaxed);
    self.catalog_lookup_failures.fetch_add(failures, Ordering::Relaxed);
  }

  pub(crate) fn record_write_failures(&self, count: u64) {
    self.catalog_write_failures.fetch_add(count, Ordering::Relaxed);
  }

  pub(crate) fn record_sub_tasks(&self, succeeded: u64, failed: u64) {
    self.sub_tasks_succeeded.fetch_add(succeeded, Ordering::Relaxed);
    self.sub_tasks_failed.fetch_add(failed, Ordering::Relaxed);
  }

  pub(crate) fn record_launch(&self) {
    self.jobs_launched.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      catalog_hits: self.catalog_hits.load(Ordering::Relaxed),
      catalog_misses: self.catalog_misses.load(Ordering::Relaxed),
      catalog_lookup_failures: self.catalog_lookup_failures.load(Ordering::Relaxed),
      catalog_write_failures: self.catalog_write_failures.load(Ordering::Relaxed),
      sub_tasks_succeeded: self.sub_tasks_succeeded.load(Ordering::Relaxed),
      sub_tasks_failed: self.sub_tasks_failed.load(Ordering::Relaxed),
      jobs_launched: self.jobs_launched.load(Ordering::Relaxed),
    }
  }
}
