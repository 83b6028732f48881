use std::sync::Arc;

use async_trait::async_trait;
use fanout_core::{
  CachedOutput, CatalogClient, CatalogError, CatalogKey, CatalogMetadata, OutputReader, RateLimiter,
};

/// Wraps a [`CatalogClient`] so every call first takes a token from a shared
/// limiter.
pub struct RateLimitedCatalog {
  inner: Arc<dyn CatalogClient>,
  limiter: Arc<RateLimiter>,
}

impl RateLimitedCatalog {
  pub fn new(inner: Arc<dyn CatalogClient>, limiter: Arc<RateLimiter>) -> Self {
    Self { inner, limiter }
  }
}

#[async_trait]
impl CatalogClient for RateLimitedCatalog {
  async fn get(&self, key: &CatalogKey) -> Result<Option<CachedOutput>, CatalogError> {
    self.limiter.acquire().await;
    self.inner.get(key).await
  }

  async fn put(
    &self,
    key: &CatalogKey,
    data: &OutputReader,
    metadata: &CatalogMetadata,
  ) -> Result<(), CatalogError> {
    self.limiter.acquire().await;
    self.inner.put(key, data, metadata).await
  }
}
