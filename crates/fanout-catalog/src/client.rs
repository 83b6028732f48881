use std::sync::Arc;

use fanout_config::Config;
use fanout_core::{BitSet, CatalogClient, CatalogKey, CatalogMetadata, OutputReader, OutputWriter};
use fanout_workqueue::{Processor, WorkItemId, WorkItemInfo, WorkQueue, WorkQueueError, WorkStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AsyncClientError;
use crate::item::{CatalogWorkItem, ReadOutcome, ReaderWorkItem, WriterWorkItem};
use crate::reader::ReaderProcessor;
use crate::writer::WriterProcessor;

/// Whether every item behind a future has reached a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
  NotReady,
  Ready,
}

/// One lookup. `item_id` must be stable across polls for the same index.
#[derive(Debug)]
pub struct DownloadRequest {
  pub item_id: WorkItemId,
  pub key: CatalogKey,
  pub target: OutputWriter,
}

/// One write-back. `item_id` must be stable across polls for the same index.
#[derive(Debug)]
pub struct UploadRequest {
  pub item_id: WorkItemId,
  pub key: CatalogKey,
  pub data: OutputReader,
  pub metadata: CatalogMetadata,
}

/// Per-request lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
  Pending,
  Hit,
  Miss,
  Failed,
}

/// Snapshot of a batch of lookups, positionally aligned with the requests.
#[derive(Debug, Clone)]
pub struct DownloadFuture {
  outcomes: Vec<DownloadOutcome>,
  errors: Vec<(WorkItemId, String)>,
}

impl DownloadFuture {
  pub fn status(&self) -> ResponseStatus {
    if self.outcomes.contains(&DownloadOutcome::Pending) {
      ResponseStatus::NotReady
    } else {
      ResponseStatus::Ready
    }
  }

  pub fn outcomes(&self) -> &[DownloadOutcome] {
    &self.outcomes
  }

  /// Positions whose lookup hit. Failed lookups are treated as misses.
  pub fn cached_results(&self) -> BitSet {
    let mut hits = BitSet::new(self.outcomes.len());
    for (position, outcome) in self.outcomes.iter().enumerate() {
      if *outcome == DownloadOutcome::Hit {
        hits.set(position);
      }
    }
    hits
  }

  pub fn failed_count(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|o| **o == DownloadOutcome::Failed)
      .count()
  }

  /// Latest error per item, including items still being retried.
  pub fn errors(&self) -> &[(WorkItemId, String)] {
    &self.errors
  }
}

/// Snapshot of a batch of write-backs.
#[derive(Debug, Clone)]
pub struct UploadFuture {
  pending: usize,
  done: usize,
  failed: Vec<WorkItemId>,
  errors: Vec<(WorkItemId, String)>,
}

impl UploadFuture {
  pub fn status(&self) -> ResponseStatus {
    if self.pending > 0 {
      ResponseStatus::NotReady
    } else {
      ResponseStatus::Ready
    }
  }

  pub fn done_count(&self) -> usize {
    self.done
  }

  /// Items that exhausted their retries.
  pub fn failed(&self) -> &[WorkItemId] {
    &self.failed
  }

  /// Latest error per item, including items still being retried.
  pub fn errors(&self) -> &[(WorkItemId, String)] {
    &self.errors
  }
}

/// Catalog access that never blocks a poll.
///
/// Lookups and writes are queued on dedicated work queues. Each call returns a
/// snapshot of the items behind it; calling again with the same item ids on a
/// later poll re-attaches to the queued items instead of duplicating them.
#[derive(Clone)]
pub struct AsyncCatalogClient {
  reader: WorkQueue<ReaderProcessor>,
  writer: WorkQueue<WriterProcessor>,
}

impl AsyncCatalogClient {
  pub fn new(client: Arc<dyn CatalogClient>, config: &Config) -> Self {
    Self {
      reader: WorkQueue::new(
        "catalog-reader",
        ReaderProcessor::new(client.clone()),
        config.reader_queue.clone(),
      ),
      writer: WorkQueue::new(
        "catalog-writer",
        WriterProcessor::new(client),
        config.writer_queue.clone(),
      ),
    }
  }

  /// Start both queues.
  pub fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, AsyncClientError> {
    let handles = vec![
      self.reader.start(cancel.clone())?,
      self.writer.start(cancel)?,
    ];
    info!("catalog_client_started");
    Ok(handles)
  }

  /// Queue any lookups not already known and report on all of them.
  pub fn download(&self, requests: Vec<DownloadRequest>) -> Result<DownloadFuture, AsyncClientError> {
    let mut outcomes = Vec::with_capacity(requests.len());
    let mut errors = Vec::new();

    for request in requests {
      let id = request.item_id.clone();
      let info = attach(&self.reader, &id, || {
        CatalogWorkItem::Reader(ReaderWorkItem::new(
          request.item_id,
          request.key,
          request.target,
        ))
      })?;

      if let Some(e) = &info.error {
        errors.push((id.clone(), e.to_string()));
      }

      let outcome = match info.status {
        WorkStatus::NotDone => DownloadOutcome::Pending,
        WorkStatus::Failed => DownloadOutcome::Failed,
        WorkStatus::Done => match info.item.as_reader().and_then(|r| r.outcome()) {
          Some(ReadOutcome::Hit) => DownloadOutcome::Hit,
          _ => DownloadOutcome::Miss,
        },
      };
      outcomes.push(outcome);
    }

    Ok(DownloadFuture { outcomes, errors })
  }

  /// Queue any write-backs not already known and report on all of them.
  pub fn upload(&self, requests: Vec<UploadRequest>) -> Result<UploadFuture, AsyncClientError> {
    let mut future = UploadFuture {
      pending: 0,
      done: 0,
      failed: Vec::new(),
      errors: Vec::new(),
    };

    for request in requests {
      let id = request.item_id.clone();
      let info = attach(&self.writer, &id, || {
        CatalogWorkItem::Writer(WriterWorkItem::new(
          request.item_id,
          request.key,
          request.data,
          request.metadata,
        ))
      })?;

      if let Some(e) = &info.error {
        future.errors.push((id.clone(), e.to_string()));
      }

      match info.status {
        WorkStatus::NotDone => future.pending += 1,
        WorkStatus::Done => future.done += 1,
        WorkStatus::Failed => future.failed.push(id),
      }
    }

    Ok(future)
  }

  /// Drop the lookups and write-backs queued under `ids`, finished or not.
  /// Returns how many items were dropped.
  pub fn release<I, S>(&self, ids: I) -> usize
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut released = 0;
    for id in ids {
      let id = id.as_ref();
      released += usize::from(self.reader.remove(id).is_some());
      released += usize::from(self.writer.remove(id).is_some());
    }
    debug!(released, "catalog_items_released");
    released
  }

  /// Items currently tracked by the reader and writer queues.
  pub fn queued(&self) -> (usize, usize) {
    (self.reader.len(), self.writer.len())
  }
}

/// Return the queued item under `id`, enqueueing `make()` first if the queue
/// has never seen it.
fn attach<P>(
  queue: &WorkQueue<P>,
  id: &str,
  make: impl FnOnce() -> P::Item,
) -> Result<WorkItemInfo<P::Item, P::Error>, AsyncClientError>
where
  P: Processor,
{
  if let Some(info) = queue.get(id) {
    return Ok(info);
  }

  match queue.enqueue(id, make()) {
    Ok(_) => debug!(queue = %queue.name(), item_id = %id, "catalog_item_enqueued"),
    // Another poller got there first.
    Err(WorkQueueError::AlreadyQueued(_)) => {}
    Err(e) => return Err(e.into()),
  }

  queue
    .get(id)
    .ok_or_else(|| WorkQueueError::Stopped(queue.name().to_string()).into())
}
