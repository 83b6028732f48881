use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fanout_config::WorkQueueConfig;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WorkQueueError;
use crate::processor::{Processor, WorkStatus};

/// Identity of a work item, unique within one queue.
pub type WorkItemId = String;

/// Snapshot of a queued item.
pub struct WorkItemInfo<T, E> {
  pub id: WorkItemId,
  pub item: Arc<T>,
  pub status: WorkStatus,
  /// Error from the most recent attempt, if it failed.
  pub error: Option<Arc<E>>,
  /// Attempts made so far.
  pub attempts: u32,
}

impl<T, E> Clone for WorkItemInfo<T, E> {
  fn clone(&self) -> Self {
    Self {
      id: self.id.clone(),
      item: self.item.clone(),
      status: self.status,
      error: self.error.clone(),
      attempts: self.attempts,
    }
  }
}

impl<T, E: std::fmt::Display> std::fmt::Debug for WorkItemInfo<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkItemInfo")
      .field("id", &self.id)
      .field("status", &self.status)
      .field("error", &self.error.as_ref().map(|e| e.to_string()))
      .field("attempts", &self.attempts)
      .finish()
  }
}

struct Entry<T, E> {
  item: Arc<T>,
  status: WorkStatus,
  error: Option<Arc<E>>,
  attempts: u32,
  enqueued_at: Instant,
}

type Index<P> = HashMap<WorkItemId, Entry<<P as Processor>::Item, <P as Processor>::Error>>;

struct Inner<P: Processor> {
  name: String,
  processor: P,
  config: WorkQueueConfig,
  index: Mutex<Index<P>>,
  sender: mpsc::UnboundedSender<WorkItemId>,
  receiver: Mutex<Option<mpsc::UnboundedReceiver<WorkItemId>>>,
}

/// Bounded, indexed work queue.
///
/// Cloning is cheap; clones share the same index and workers.
pub struct WorkQueue<P: Processor> {
  inner: Arc<Inner<P>>,
}

impl<P: Processor> Clone for WorkQueue<P> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<P: Processor> WorkQueue<P> {
  /// Create a queue. Items may be enqueued before [`WorkQueue::start`];
  /// they are processed once the dispatcher runs.
  pub fn new(name: impl Into<String>, processor: P, config: WorkQueueConfig) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    Self {
      inner: Arc::new(Inner {
        name: name.into(),
        processor,
        config,
        index: Mutex::new(HashMap::new()),
        sender,
        receiver: Mutex::new(Some(receiver)),
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Spawn the dispatcher. It runs until `cancel` fires.
  pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, WorkQueueError> {
    let receiver = self
      .inner
      .receiver
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take()
      .ok_or_else(|| WorkQueueError::AlreadyStarted(self.inner.name.clone()))?;

    let inner = self.inner.clone();
    Ok(tokio::spawn(dispatch(inner, receiver, cancel)))
  }

  /// Queue `item` under `id`.
  ///
  /// Re-queueing an id whose previous instance is terminal replaces it;
  /// re-queueing one that is still in flight is an error.
  pub fn enqueue(&self, id: impl Into<WorkItemId>, item: P::Item) -> Result<WorkItemId, WorkQueueError> {
    let id = id.into();

    {
      let mut index = self.inner.index.lock().unwrap_or_else(|e| e.into_inner());
      if let Some(existing) = index.get(&id)
        && !existing.status.is_terminal()
      {
        return Err(WorkQueueError::AlreadyQueued(id));
      }

      index.insert(
        id.clone(),
        Entry {
          item: Arc::new(item),
          status: WorkStatus::NotDone,
          error: None,
          attempts: 0,
          enqueued_at: Instant::now(),
        },
      );
    }

    self
      .inner
      .sender
      .send(id.clone())
      .map_err(|_| WorkQueueError::Stopped(self.inner.name.clone()))?;

    debug!(queue = %self.inner.name, item_id = %id, "work_item_enqueued");
    Ok(id)
  }

  /// Look up an item by id.
  pub fn get(&self, id: &str) -> Option<WorkItemInfo<P::Item, P::Error>> {
    let index = self.inner.index.lock().unwrap_or_else(|e| e.into_inner());
    index.get(id).map(|entry| WorkItemInfo {
      id: id.to_string(),
      item: entry.item.clone(),
      status: entry.status,
      error: entry.error.clone(),
      attempts: entry.attempts,
    })
  }

  /// Status of an item, if it is known.
  pub fn status(&self, id: &str) -> Option<WorkStatus> {
    let index = self.inner.index.lock().unwrap_or_else(|e| e.into_inner());
    index.get(id).map(|entry| entry.status)
  }

  /// Forget an item, returning its last status.
  ///
  /// An item still in flight is dropped too: the result of its current
  /// attempt is discarded and it is not retried.
  pub fn remove(&self, id: &str) -> Option<WorkStatus> {
    let mut index = self.inner.index.lock().unwrap_or_else(|e| e.into_inner());
    let entry = index.remove(id)?;
    if !entry.status.is_terminal() {
      debug!(queue = %self.inner.name, item_id = %id, attempts = entry.attempts, "work_item_dropped");
    }
    Some(entry.status)
  }

  pub fn len(&self) -> usize {
    self.inner.index.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

async fn dispatch<P: Processor>(
  inner: Arc<Inner<P>>,
  mut receiver: mpsc::UnboundedReceiver<WorkItemId>,
  cancel: CancellationToken,
) {
  let workers = Arc::new(Semaphore::new(inner.config.workers.max(1)));

  info!(queue = %inner.name, workers = inner.config.workers, "work_queue_started");

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!(queue = %inner.name, "work_queue_stopped");
        break;
      }
      next = receiver.recv() => {
        let Some(id) = next else {
          break;
        };

        let Ok(permit) = workers.clone().acquire_owned().await else {
          break;
        };

        let inner = inner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
          let retry = process_one(&inner, &id).await;
          drop(permit);

          if retry {
            let delay = inner.config.retry_delay();
            tokio::select! {
              _ = cancel.cancelled() => {}
              _ = tokio::time::sleep(delay) => {
                let _ = inner.sender.send(id);
              }
            }
          }
        });
      }
    }
  }
}

/// Run one attempt. Returns whether the item should be retried.
async fn process_one<P: Processor>(inner: &Inner<P>, id: &str) -> bool {
  let item = {
    let mut index = inner.index.lock().unwrap_or_else(|e| e.into_inner());
    let Some(entry) = index.get_mut(id) else {
      return false;
    };
    if entry.status.is_terminal() {
      return false;
    }
    if let Some(deadline) = inner.config.item_deadline()
      && entry.enqueued_at.elapsed() >= deadline
    {
      warn!(queue = %inner.name, item_id = %id, attempts = entry.attempts, "work_item_deadline_exceeded");
      entry.status = WorkStatus::Failed;
      return false;
    }
    entry.item.clone()
  };

  let result = inner.processor.process(&item).await;

  let mut index = inner.index.lock().unwrap_or_else(|e| e.into_inner());
  let Some(entry) = index.get_mut(id) else {
    return false;
  };
  // The entry may have been replaced while we were processing a stale item.
  if !Arc::ptr_eq(&entry.item, &item) {
    return false;
  }

  entry.attempts += 1;
  match result {
    Ok(status) => {
      entry.status = status;
      entry.error = None;
    }
    Err(e) => {
      warn!(queue = %inner.name, item_id = %id, attempt = entry.attempts, error = %e, "work_item_failed");
      entry.status = WorkStatus::NotDone;
      entry.error = Some(Arc::new(e));
    }
  }

  if entry.status.is_terminal() {
    debug!(queue = %inner.name, item_id = %id, status = ?entry.status, "work_item_finished");
    return false;
  }

  if entry.attempts > inner.config.max_retries {
    warn!(queue = %inner.name, item_id = %id, attempts = entry.attempts, "work_item_retries_exhausted");
    entry.status = WorkStatus::Failed;
    return false;
  }

  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use async_trait::async_trait;

  #[derive(Debug, thiserror::Error)]
  #[error("boom: {0}")]
  struct Boom(String);

  /// Fails `failures` times per item before succeeding.
  struct Flaky {
    failures: usize,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Processor for Flaky {
    type Item = String;
    type Error = Boom;

    async fn process(&self, item: &String) -> Result<WorkStatus, Boom> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      if call < self.failures {
        Err(Boom(item.clone()))
      } else {
        Ok(WorkStatus::Done)
      }
    }
  }

  /// Tracks the highest number of concurrent `process` calls.
  struct Slow {
    running: AtomicUsize,
    peak: AtomicUsize,
  }

  #[async_trait]
  impl Processor for Slow {
    type Item = u32;
    type Error = Boom;

    async fn process(&self, _item: &u32) -> Result<WorkStatus, Boom> {
      let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      self.running.fetch_sub(1, Ordering::SeqCst);
      Ok(WorkStatus::Done)
    }
  }

  fn fast_config(workers: usize, max_retries: u32) -> WorkQueueConfig {
    WorkQueueConfig {
      workers,
      max_retries,
      retry_delay_ms: 1,
      item_deadline_ms: None,
    }
  }

  async fn wait_terminal<P: Processor>(queue: &WorkQueue<P>, id: &str) -> WorkStatus {
    for _ in 0..500 {
      if let Some(status) = queue.status(id)
        && status.is_terminal()
      {
        return status;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("item {} never reached a terminal status", id);
  }

  #[tokio::test]
  async fn test_item_done() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
      },
      fast_config(2, 3),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "payload".to_string()).unwrap();
    assert_eq!(wait_terminal(&queue, "a").await, WorkStatus::Done);

    let info = queue.get("a").unwrap();
    assert_eq!(info.attempts, 1);
    assert!(info.error.is_none());
    assert_eq!(*info.item, "payload");
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_not_done_is_retried() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 2,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 5),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    assert_eq!(wait_terminal(&queue, "a").await, WorkStatus::Done);
    assert_eq!(queue.get("a").unwrap().attempts, 3);
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_retries_exhausted_marks_failed() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 2),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    assert_eq!(wait_terminal(&queue, "a").await, WorkStatus::Failed);

    let info = queue.get("a").unwrap();
    assert_eq!(info.attempts, 3);
    assert_eq!(info.error.unwrap().to_string(), "boom: x");
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_error_keeps_item_not_done_before_retry() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
      },
      WorkQueueConfig {
        workers: 1,
        max_retries: 100,
        retry_delay_ms: 60_000,
        item_deadline_ms: None,
      },
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    for _ in 0..200 {
      if queue.get("a").is_some_and(|info| info.attempts == 1) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let info = queue.get("a").unwrap();
    assert_eq!(info.status, WorkStatus::NotDone);
    assert!(info.error.is_some());
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_duplicate_in_flight_rejected() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 0),
    );

    // Not started, so the first instance stays NotDone.
    queue.enqueue("a", "x".to_string()).unwrap();
    let err = queue.enqueue("a", "y".to_string()).unwrap_err();
    assert!(matches!(err, WorkQueueError::AlreadyQueued(id) if id == "a"));
    assert_eq!(queue.len(), 1);
  }

  #[tokio::test]
  async fn test_terminal_item_can_be_replaced() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 0),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "first".to_string()).unwrap();
    wait_terminal(&queue, "a").await;

    queue.enqueue("a", "second".to_string()).unwrap();
    assert_eq!(wait_terminal(&queue, "a").await, WorkStatus::Done);
    assert_eq!(*queue.get("a").unwrap().item, "second");
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_remove_forgets_item() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 0),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    wait_terminal(&queue, "a").await;

    assert_eq!(queue.remove("a"), Some(WorkStatus::Done));
    assert!(queue.is_empty());
    assert!(queue.get("a").is_none());
    assert_eq!(queue.remove("a"), None);
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_removed_in_flight_item_is_not_retried() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
      },
      WorkQueueConfig {
        workers: 1,
        max_retries: 100,
        retry_delay_ms: 10,
        item_deadline_ms: None,
      },
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    for _ in 0..200 {
      if queue.get("a").is_some_and(|info| info.attempts >= 1) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(queue.remove("a"), Some(WorkStatus::NotDone));
    let calls = queue.inner.processor.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.inner.processor.calls.load(Ordering::SeqCst) <= calls + 1);
    assert!(queue.is_empty());
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_worker_pool_is_bounded() {
    let processor = Slow {
      running: AtomicUsize::new(0),
      peak: AtomicUsize::new(0),
    };
    let queue = WorkQueue::new("test", processor, fast_config(2, 0));
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    for i in 0..8 {
      queue.enqueue(format!("item-{}", i), i).unwrap();
    }
    for i in 0..8 {
      assert_eq!(wait_terminal(&queue, &format!("item-{}", i)).await, WorkStatus::Done);
    }

    assert!(queue.inner.processor.peak.load(Ordering::SeqCst) <= 2);
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_deadline_marks_failed() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
      },
      WorkQueueConfig {
        workers: 1,
        max_retries: u32::MAX,
        retry_delay_ms: 5,
        item_deadline_ms: Some(30),
      },
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();

    queue.enqueue("a", "x".to_string()).unwrap();
    assert_eq!(wait_terminal(&queue, "a").await, WorkStatus::Failed);
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_start_twice() {
    let queue = WorkQueue::new(
      "test",
      Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
      },
      fast_config(1, 0),
    );
    let cancel = CancellationToken::new();
    queue.start(cancel.clone()).unwrap();
    assert!(matches!(
      queue.start(cancel.clone()),
      Err(WorkQueueError::AlreadyStarted(_))
    ));
    cancel.cancel();
  }
}
