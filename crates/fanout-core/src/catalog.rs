//! Catalog (discovery cache) boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::data::{DataReference, DataStoreError, OutputReader};

/// Identifies a cacheable unit of work.
///
/// Two keys are equal iff every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogKey {
  /// Identifier of the task that produced the result.
  pub identifier: String,
  /// User-controlled version; bumping it invalidates old entries.
  pub cache_version: String,
  /// Location of the exact inputs the result was computed from.
  pub input_reference: DataReference,
}

impl CatalogKey {
  pub fn new(
    identifier: impl Into<String>,
    cache_version: impl Into<String>,
    input_reference: DataReference,
  ) -> Self {
    Self {
      identifier: identifier.into(),
      cache_version: cache_version.into(),
      input_reference,
    }
  }
}

/// Provenance recorded next to a cached result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
  /// Execution that produced the result.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_execution: Option<String>,
  /// Free-form labels.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
}

impl CatalogMetadata {
  pub fn from_execution(execution: impl Into<String>) -> Self {
    Self {
      source_execution: Some(execution.into()),
      labels: BTreeMap::new(),
    }
  }
}

/// A catalog hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOutput {
  pub metadata: CatalogMetadata,
  pub data: Bytes,
}

/// Error type for catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
  /// The catalog service could not be reached or refused the request.
  #[error("catalog unavailable: {0}")]
  Unavailable(String),

  /// The outputs to be cached could not be read.
  #[error("failed to read outputs: {0}")]
  Outputs(#[from] DataStoreError),
}

/// Client for the catalog service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
  /// Look up a previously recorded result. `Ok(None)` is a miss.
  async fn get(&self, key: &CatalogKey) -> Result<Option<CachedOutput>, CatalogError>;

  /// Record the outputs readable through `data` under `key`.
  ///
  /// Writing the same key twice must be harmless.
  async fn put(
    &self,
    key: &CatalogKey,
    data: &OutputReader,
    metadata: &CatalogMetadata,
  ) -> Result<(), CatalogError>;
}
