//! Data store boundary.
//!
//! Per-index inputs and outputs live at `prefix/<decimal index>`. The plugin
//! only ever builds references with [`DataStore::get_path`] and moves opaque
//! bytes around; decoding them is somebody else's problem.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Error type for data store operations.
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
  /// Nothing is stored at the reference.
  #[error("no data at '{0}'")]
  NotFound(DataReference),

  /// A path segment was empty or otherwise unusable.
  #[error("invalid path: {0}")]
  InvalidPath(String),

  /// The backing store failed.
  #[error("data store failure: {0}")]
  Backend(String),
}

/// Location of a blob in a data store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataReference(String);

impl DataReference {
  pub fn new(reference: impl Into<String>) -> Self {
    Self(reference.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for DataReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for DataReference {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

/// Content-addressable blob storage.
#[async_trait]
pub trait DataStore: Send + Sync {
  /// Build the reference for `suffix` under `prefix`.
  fn get_path(&self, prefix: &DataReference, suffix: &str) -> Result<DataReference, DataStoreError> {
    if suffix.is_empty() {
      return Err(DataStoreError::InvalidPath(format!(
        "empty suffix under '{}'",
        prefix
      )));
    }

    let base = prefix.as_str().trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    Ok(DataReference::new(format!("{}/{}", base, suffix)))
  }

  /// Read the blob at `reference`.
  async fn read_raw(&self, reference: &DataReference) -> Result<Bytes, DataStoreError>;

  /// Write (or overwrite) the blob at `reference`.
  async fn write_raw(&self, reference: &DataReference, data: Bytes) -> Result<(), DataStoreError>;

  /// Whether a blob exists at `reference`.
  async fn exists(&self, reference: &DataReference) -> Result<bool, DataStoreError>;
}

/// In-memory data store.
///
/// Suitable for tests and single-process simulation.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
  blobs: RwLock<HashMap<DataReference, Bytes>>,
}

impl InMemoryDataStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of blobs currently stored.
  pub fn len(&self) -> usize {
    self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
  async fn read_raw(&self, reference: &DataReference) -> Result<Bytes, DataStoreError> {
    let blobs = self
      .blobs
      .read()
      .map_err(|e| DataStoreError::Backend(format!("lock poisoned: {}", e)))?;
    blobs
      .get(reference)
      .cloned()
      .ok_or_else(|| DataStoreError::NotFound(reference.clone()))
  }

  async fn write_raw(&self, reference: &DataReference, data: Bytes) -> Result<(), DataStoreError> {
    let mut blobs = self
      .blobs
      .write()
      .map_err(|e| DataStoreError::Backend(format!("lock poisoned: {}", e)))?;
    blobs.insert(reference.clone(), data);
    Ok(())
  }

  async fn exists(&self, reference: &DataReference) -> Result<bool, DataStoreError> {
    let blobs = self
      .blobs
      .read()
      .map_err(|e| DataStoreError::Backend(format!("lock poisoned: {}", e)))?;
    Ok(blobs.contains_key(reference))
  }
}

/// Read handle for one output location.
#[derive(Clone)]
pub struct OutputReader {
  store: Arc<dyn DataStore>,
  path: DataReference,
}

impl OutputReader {
  pub fn new(store: Arc<dyn DataStore>, path: DataReference) -> Self {
    Self { store, path }
  }

  pub fn path(&self) -> &DataReference {
    &self.path
  }

  pub async fn read(&self) -> Result<Bytes, DataStoreError> {
    self.store.read_raw(&self.path).await
  }

  pub async fn exists(&self) -> Result<bool, DataStoreError> {
    self.store.exists(&self.path).await
  }
}

impl fmt::Debug for OutputReader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutputReader")
      .field("path", &self.path)
      .finish()
  }
}

/// Write handle for one output location.
#[derive(Clone)]
pub struct OutputWriter {
  store: Arc<dyn DataStore>,
  path: DataReference,
}

impl OutputWriter {
  pub fn new(store: Arc<dyn DataStore>, path: DataReference) -> Self {
    Self { store, path }
  }

  pub fn path(&self) -> &DataReference {
    &self.path
  }

  pub async fn put(&self, data: Bytes) -> Result<(), DataStoreError> {
    self.store.write_raw(&self.path, data).await
  }

  /// A reader over the same location.
  pub fn reader(&self) -> OutputReader {
    OutputReader::new(self.store.clone(), self.path.clone())
  }
}

impl fmt::Debug for OutputWriter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutputWriter")
      .field("path", &self.path)
      .finish()
  }
}
