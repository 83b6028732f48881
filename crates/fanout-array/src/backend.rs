//! Boundary to the compute backend that runs sub-executions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fanout_core::DataReference;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::store::JobStatus;

/// Everything a backend needs to launch one array job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
  /// Generated name of the execution; unique per attempt.
  pub job_name: String,
  pub namespace: String,
  /// Number of sub-executions, indexed densely from zero.
  pub size: u64,
  /// Maximum concurrent sub-executions, 0 for unbounded.
  pub parallelism: u64,
  /// Environment variable through which each sub-execution learns its index.
  pub index_env_var: String,
  /// JSON array mapping dense index to original index.
  pub mapping_file: DataReference,
  pub input_prefix: DataReference,
  pub output_prefix: DataReference,
  pub labels: BTreeMap<String, String>,
  pub annotations: BTreeMap<String, String>,
}

/// Handle to a launched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedJob {
  pub job_id: String,
  /// Backend-specific job definition, carried opaquely.
  pub job_definition: String,
}

/// Current view of a job on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
  pub status: JobStatus,
  /// One entry per sub-execution, by dense index.
  pub sub_jobs: Vec<JobStatus>,
}

#[async_trait]
pub trait Backend: Send + Sync {
  async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedJob, BackendError>;

  async fn describe(&self, job_id: &str) -> Result<JobDescription, BackendError>;

  /// Stop every sub-execution of the job. Terminating a finished job is not
  /// an error.
  async fn terminate(&self, job_id: &str, reason: &str) -> Result<(), BackendError>;
}
