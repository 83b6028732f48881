//! Fanout Work Queue
//!
//! An indexed queue of typed work items processed by a bounded pool of
//! workers. Callers enqueue an item under a [`WorkItemId`] and later look its
//! status up by the same id; they never wait on the queue.
//!
//! - Items are handed to a [`Processor`]. A `NotDone` result (or an error) is
//!   retried after a delay until `max_retries` or the item deadline is
//!   exhausted, at which point the item becomes `Failed`.
//! - The queue itself never fails: processing errors are recorded on the
//!   item and surfaced through [`WorkItemInfo::error`].
//! - An id is processed by at most one worker at a time.

mod processor;
mod queue;

pub use processor::{Processor, WorkStatus};
pub use queue::{WorkItemId, WorkItemInfo, WorkQueue};

/// Errors returned to callers of the queue.
#[derive(Debug, thiserror::Error)]
pub enum WorkQueueError {
  /// An item with this id is queued and has not reached a terminal status.
  #[error("work item '{0}' is already queued")]
  AlreadyQueued(WorkItemId),

  /// `start` was called twice.
  #[error("work queue '{0}' is already started")]
  AlreadyStarted(String),

  /// The dispatcher has shut down and no longer accepts work.
  #[error("work queue '{0}' is stopped")]
  Stopped(String),
}
