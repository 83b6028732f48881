use std::sync::Arc;

use async_trait::async_trait;
use fanout_core::{CatalogClient, CatalogError};
use fanout_workqueue::{Processor, WorkStatus};
use tracing::{debug, error};

use crate::error::ProcessError;
use crate::item::{CatalogWorkItem, ReadOutcome};

/// Performs catalog lookups for `Reader` items.
pub struct ReaderProcessor {
  client: Arc<dyn CatalogClient>,
}

impl ReaderProcessor {
  pub fn new(client: Arc<dyn CatalogClient>) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Processor for ReaderProcessor {
  type Item = CatalogWorkItem;
  type Error = ProcessError;

  async fn process(&self, item: &CatalogWorkItem) -> Result<WorkStatus, ProcessError> {
    let CatalogWorkItem::Reader(wi) = item else {
      return Err(ProcessError::WrongItemType {
        item_id: item.id().to_string(),
        expected: "reader",
        actual: item.kind(),
      });
    };

    let downstream = |source: CatalogError| ProcessError::DownstreamSystem {
      operation: "reading",
      item_id: wi.id.clone(),
      identifier: wi.key.identifier.clone(),
      cache_version: wi.key.cache_version.clone(),
      source,
    };

    let cached = self.client.get(&wi.key).await.map_err(|e| {
      error!(item_id = %wi.id, error = %e, "catalog_get_failed");
      downstream(e)
    })?;

    match cached {
      Some(output) => {
        wi.target
          .put(output.data)
          .await
          .map_err(|e| downstream(CatalogError::Outputs(e)))?;
        debug!(item_id = %wi.id, target = %wi.target.path(), "catalog_hit");
        wi.record(ReadOutcome::Hit);
      }
      None => {
        debug!(item_id = %wi.id, "catalog_miss");
        wi.record(ReadOutcome::Miss);
      }
    }

    Ok(WorkStatus::Done)
  }
}
