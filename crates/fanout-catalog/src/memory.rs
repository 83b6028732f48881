use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use fanout_core::{CachedOutput, CatalogClient, CatalogError, CatalogKey, CatalogMetadata, OutputReader};
use tracing::debug;

/// Catalog kept in process memory. Used by the simulator and by tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
  entries: RwLock<HashMap<CatalogKey, CachedOutput>>,
}

impl InMemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed an entry directly.
  pub fn insert(&self, key: CatalogKey, output: CachedOutput) {
    self
      .entries
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key, output);
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
  async fn get(&self, key: &CatalogKey) -> Result<Option<CachedOutput>, CatalogError> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(key).cloned())
  }

  async fn put(
    &self,
    key: &CatalogKey,
    data: &OutputReader,
    metadata: &CatalogMetadata,
  ) -> Result<(), CatalogError> {
    let bytes = data.read().await?;
    debug!(
      identifier = %key.identifier,
      input = %key.input_reference,
      size = bytes.len(),
      "catalog_entry_stored"
    );
    self.insert(
      key.clone(),
      CachedOutput {
        metadata: metadata.clone(),
        data: bytes,
      },
    );
    Ok(())
  }
}
