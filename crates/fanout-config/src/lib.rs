//! Fanout Config
//!
//! Serializable configuration for the array task plugin. A [`Config`] is
//! built once per process (usually from a JSON file) and handed to every
//! component that needs it.
//!
//! Every field has a default, so a partial file only overrides what it names:
//!
//! ```json
//! {
//!   "writer_queue": { "workers": 4, "max_retries": 10 },
//!   "backend_rate_limit": { "qps": 5, "burst": 10 }
//! }
//! ```

mod queue;
mod rate_limit;

pub use queue::WorkQueueConfig;
pub use rate_limit::RateLimitConfig;

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The config file could not be read.
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  /// The config file is not valid JSON for [`Config`].
  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),

  /// A value parsed but makes no sense.
  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Top-level plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Queue that performs catalog lookups.
  pub reader_queue: WorkQueueConfig,
  /// Queue that performs catalog write-back.
  pub writer_queue: WorkQueueConfig,
  /// Token bucket guarding calls to the compute backend.
  pub backend_rate_limit: RateLimitConfig,
  /// Token bucket guarding calls to the catalog service.
  pub catalog_rate_limit: RateLimitConfig,
  /// Attempts a backend is expected to make per sub-job before its
  /// retryable failures count against the array.
  pub max_sub_task_attempts: u32,
  /// Cap on the aggregated failure reason reported to the engine.
  pub max_error_string_length: usize,
  /// Environment variable the backend sets to the dense sub-execution index.
  pub index_env_var: String,
  /// Largest array a task may request.
  pub max_array_size: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      reader_queue: WorkQueueConfig::default(),
      writer_queue: WorkQueueConfig::default(),
      backend_rate_limit: RateLimitConfig::default(),
      catalog_rate_limit: RateLimitConfig::default(),
      max_sub_task_attempts: 1,
      max_error_string_length: 2048,
      index_env_var: "BATCH_JOB_ARRAY_INDEX".to_string(),
      max_array_size: 10_000,
    }
  }
}

impl Config {
  /// Parse a config from a JSON string and validate it.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load a config from a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json(&content)
  }

  /// Reject values that would stall the plugin.
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, queue) in [("reader_queue", &self.reader_queue), ("writer_queue", &self.writer_queue)] {
      if queue.workers == 0 {
        return Err(ConfigError::Invalid(format!("{name}.workers must be at least 1")));
      }
    }

    for (name, limit) in [
      ("backend_rate_limit", &self.backend_rate_limit),
      ("catalog_rate_limit", &self.catalog_rate_limit),
    ] {
      if limit.qps <= 0.0 || limit.burst == 0 {
        return Err(ConfigError::Invalid(format!(
          "{name} needs a positive qps and burst"
        )));
      }
    }

    if self.max_sub_task_attempts == 0 {
      return Err(ConfigError::Invalid(
        "max_sub_task_attempts must be at least 1".to_string(),
      ));
    }

    if self.max_array_size == 0 {
      return Err(ConfigError::Invalid(
        "max_array_size must be at least 1".to_string(),
      ));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_object_uses_defaults() {
    let config = Config::from_json("{}").unwrap();
    assert_eq!(config, Config::default());
  }

  #[test]
  fn test_partial_override() {
    let config = Config::from_json(
      r#"{
        "writer_queue": { "workers": 3 },
        "max_error_string_length": 16
      }"#,
    )
    .unwrap();

    assert_eq!(config.writer_queue.workers, 3);
    assert_eq!(config.writer_queue.max_retries, WorkQueueConfig::default().max_retries);
    assert_eq!(config.reader_queue, WorkQueueConfig::default());
    assert_eq!(config.max_error_string_length, 16);
  }

  #[test]
  fn test_zero_workers_rejected() {
    let err = Config::from_json(r#"{ "reader_queue": { "workers": 0 } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
  }

  #[test]
  fn test_zero_qps_rejected() {
    let err = Config::from_json(r#"{ "catalog_rate_limit": { "qps": 0 } }"#).unwrap_err();
    assert!(err.to_string().contains("catalog_rate_limit"));
  }

  #[test]
  fn test_zero_max_array_size_rejected() {
    let err = Config::from_json(r#"{ "max_array_size": 0 }"#).unwrap_err();
    assert!(err.to_string().contains("max_array_size"));
  }

  #[test]
  fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fanout.json");
    std::fs::write(&path, r#"{ "index_env_var": "AWS_BATCH_JOB_ARRAY_INDEX" }"#).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.index_env_var, "AWS_BATCH_JOB_ARRAY_INDEX");
  }

  #[test]
  fn test_missing_file() {
    let err = Config::from_file("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }
}
