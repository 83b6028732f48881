use std::sync::OnceLock;

use fanout_core::{CatalogKey, CatalogMetadata, OutputReader, OutputWriter};
use fanout_workqueue::WorkItemId;

/// Result of a completed catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
  /// The key was cached and its outputs were copied to the target.
  Hit,
  Miss,
}

/// Look a key up and, on a hit, copy the cached outputs into `target`.
#[derive(Debug)]
pub struct ReaderWorkItem {
  pub id: WorkItemId,
  pub key: CatalogKey,
  pub target: OutputWriter,
  outcome: OnceLock<ReadOutcome>,
}

impl ReaderWorkItem {
  pub fn new(id: impl Into<WorkItemId>, key: CatalogKey, target: OutputWriter) -> Self {
    Self {
      id: id.into(),
      key,
      target,
      outcome: OnceLock::new(),
    }
  }

  /// Set once the item is `Done`.
  pub fn outcome(&self) -> Option<ReadOutcome> {
    self.outcome.get().copied()
  }

  pub(crate) fn record(&self, outcome: ReadOutcome) {
    let _ = self.outcome.set(outcome);
  }
}

/// Record the outputs readable through `data` under `key`.
#[derive(Debug)]
pub struct WriterWorkItem {
  pub id: WorkItemId,
  pub key: CatalogKey,
  pub data: OutputReader,
  pub metadata: CatalogMetadata,
}

impl WriterWorkItem {
  pub fn new(
    id: impl Into<WorkItemId>,
    key: CatalogKey,
    data: OutputReader,
    metadata: CatalogMetadata,
  ) -> Self {
    Self {
      id: id.into(),
      key,
      data,
      metadata,
    }
  }
}

/// Items carried by the catalog queues.
#[derive(Debug)]
pub enum CatalogWorkItem {
  Reader(ReaderWorkItem),
  Writer(WriterWorkItem),
}

impl CatalogWorkItem {
  pub fn id(&self) -> &str {
    match self {
      CatalogWorkItem::Reader(item) => &item.id,
      CatalogWorkItem::Writer(item) => &item.id,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      CatalogWorkItem::Reader(_) => "reader",
      CatalogWorkItem::Writer(_) => "writer",
    }
  }

  pub fn as_reader(&self) -> Option<&ReaderWorkItem> {
    match self {
      CatalogWorkItem::Reader(item) => Some(item),
      CatalogWorkItem::Writer(_) => None,
    }
  }
}
