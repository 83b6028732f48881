use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{DataReference, DataStore};
use crate::task::TaskReader;

/// Object that owns the execution in the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
  pub kind: String,
  pub name: String,
}

/// Identity and labelling of one task execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionMetadata {
  /// Unique, engine-generated name for this execution attempt.
  pub generated_name: String,
  pub namespace: String,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
  #[serde(default)]
  pub annotations: BTreeMap<String, String>,
  #[serde(default)]
  pub owner_reference: OwnerReference,
}

/// Everything the engine hands the plugin on each poll.
#[derive(Clone)]
pub struct TaskExecutionContext {
  pub task_reader: Arc<dyn TaskReader>,
  pub data_store: Arc<dyn DataStore>,
  /// Prefix under which per-index inputs live (`<prefix>/<index>`).
  pub input_prefix: DataReference,
  /// Prefix under which per-index outputs live (`<prefix>/<index>`).
  pub output_prefix: DataReference,
  pub metadata: TaskExecutionMetadata,
}

impl TaskExecutionContext {
  pub fn generated_name(&self) -> &str {
    &self.metadata.generated_name
  }
}

impl fmt::Debug for TaskExecutionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskExecutionContext")
      .field("input_prefix", &self.input_prefix)
      .field("output_prefix", &self.output_prefix)
      .field("metadata", &self.metadata)
      .finish_non_exhaustive()
  }
}
