//! Task template and the array job descriptor embedded in it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error returned by a [`TaskReader`].
#[derive(Debug, thiserror::Error)]
#[error("failed to read task template: {0}")]
pub struct TaskReadError(pub String);

/// Task-level metadata relevant to caching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
  /// Whether results may be looked up in and written to the catalog.
  #[serde(default)]
  pub discoverable: bool,
  /// Cache version used in every [`crate::CatalogKey`] for this task.
  #[serde(default)]
  pub discovery_version: String,
}

/// The parts of a task template the array plugin reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
  /// Fully qualified task identifier.
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<TaskMetadata>,
  /// Plugin-specific payload; for array tasks an [`ArrayJob`].
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub custom: Option<serde_json::Value>,
}

impl TaskTemplate {
  pub fn is_discoverable(&self) -> bool {
    self.metadata.as_ref().is_some_and(|m| m.discoverable)
  }

  pub fn discovery_version(&self) -> &str {
    self
      .metadata
      .as_ref()
      .map(|m| m.discovery_version.as_str())
      .unwrap_or("")
  }
}

/// Array job descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayJob {
  /// Requested fan-out.
  pub size: u64,
  /// Maximum sub-executions the backend should run at once (0 = unbounded).
  #[serde(default)]
  pub parallelism: u64,
  /// Absolute number of sub-executions that must succeed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_successes: Option<u64>,
  /// Fraction of sub-executions that must succeed, used when
  /// `min_successes` is unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_success_ratio: Option<f64>,
}

impl ArrayJob {
  /// Decode the descriptor from a template's custom payload.
  pub fn from_custom(custom: &serde_json::Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(custom.clone())
  }

  /// Minimum number of original indices that must succeed.
  pub fn min_successes(&self) -> u64 {
    match (self.min_successes, self.min_success_ratio) {
      (Some(min), _) => min,
      (None, Some(ratio)) => (self.size as f64 * ratio.clamp(0.0, 1.0)).ceil() as u64,
      (None, None) => self.size,
    }
  }
}

/// Source of the task template for one execution.
#[async_trait]
pub trait TaskReader: Send + Sync {
  async fn read(&self) -> Result<Option<TaskTemplate>, TaskReadError>;
}

/// A reader that always returns the same template.
#[derive(Debug, Clone, Default)]
pub struct StaticTaskReader {
  template: Option<TaskTemplate>,
}

impl StaticTaskReader {
  pub fn new(template: TaskTemplate) -> Self {
    Self {
      template: Some(template),
    }
  }

  /// A reader with no template, as seen when the engine lost it.
  pub fn empty() -> Self {
    Self { template: None }
  }
}

#[async_trait]
impl TaskReader for StaticTaskReader {
  async fn read(&self) -> Result<Option<TaskTemplate>, TaskReadError> {
    Ok(self.template.clone())
  }
}
