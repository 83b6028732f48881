use std::sync::Arc;

use async_trait::async_trait;
use fanout_core::CatalogClient;
use fanout_workqueue::{Processor, WorkStatus};
use tracing::error;

use crate::error::ProcessError;
use crate::item::CatalogWorkItem;

/// Writes finished results to the catalog for `Writer` items.
pub struct WriterProcessor {
  client: Arc<dyn CatalogClient>,
}

impl WriterProcessor {
  pub fn new(client: Arc<dyn CatalogClient>) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Processor for WriterProcessor {
  type Item = CatalogWorkItem;
  type Error = ProcessError;

  async fn process(&self, item: &CatalogWorkItem) -> Result<WorkStatus, ProcessError> {
    let CatalogWorkItem::Writer(wi) = item else {
      return Err(ProcessError::WrongItemType {
        item_id: item.id().to_string(),
        expected: "writer",
        actual: item.kind(),
      });
    };

    if let Err(e) = self.client.put(&wi.key, &wi.data, &wi.metadata).await {
      error!(item_id = %wi.id, error = %e, "catalog_put_failed");
      return Err(ProcessError::DownstreamSystem {
        operation: "writing",
        item_id: wi.id.clone(),
        identifier: wi.key.identifier.clone(),
        cache_version: wi.key.cache_version.clone(),
        source: e,
      });
    }

    Ok(WorkStatus::Done)
  }
}
