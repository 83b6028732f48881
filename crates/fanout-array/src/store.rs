//! In-memory table of submitted jobs, keyed by the execution's generated
//! name.

use std::collections::HashMap;
use std::sync::RwLock;

use fanout_core::Phase;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Status of a job or sub-job as last seen on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
  pub phase: Phase,
  #[serde(default)]
  pub message: String,
  /// Attempts the backend has made so far.
  #[serde(default)]
  pub attempts: u32,
}

/// A submitted job and its sub-jobs, ordered by compacted index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
  /// Backend job id.
  pub id: String,
  pub status: JobStatus,
  pub sub_jobs: Vec<Job>,
}

impl Job {
  /// A freshly submitted job with `size` sub-jobs, all `Queued`.
  pub fn new(id: impl Into<String>, size: usize) -> Self {
    let id = id.into();
    let queued = JobStatus {
      phase: Phase::Queued,
      ..JobStatus::default()
    };
    let sub_jobs = (0..size)
      .map(|index| Job {
        id: format!("{}:{}", id, index),
        status: queued.clone(),
        sub_jobs: Vec::new(),
      })
      .collect();

    Self {
      id,
      status: queued,
      sub_jobs,
    }
  }

  pub fn sub_job_statuses(&self) -> Vec<JobStatus> {
    self.sub_jobs.iter().map(|job| job.status.clone()).collect()
  }
}

/// Concurrency-safe job table.
///
/// Entries are only removed when the owner of an execution asks for it.
#[derive(Debug, Default)]
pub struct JobStore {
  jobs: RwLock<HashMap<String, Job>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
  StoreError::LockPoisoned {
    message: e.to_string(),
  }
}

impl JobStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, name: &str) -> Result<Option<Job>, StoreError> {
    let jobs = self.jobs.read().map_err(poisoned)?;
    Ok(jobs.get(name).cloned())
  }

  /// Return the job stored under `name`, inserting `template` if there is
  /// none.
  pub fn get_or_create(&self, name: &str, template: Job) -> Result<Job, StoreError> {
    let mut jobs = self.jobs.write().map_err(poisoned)?;
    let job = jobs.entry(name.to_string()).or_insert_with(|| {
      debug!(job_name = %name, job_id = %template.id, "job_registered");
      template
    });
    Ok(job.clone())
  }

  pub fn update_job_status(&self, name: &str, status: JobStatus) -> Result<(), StoreError> {
    let mut jobs = self.jobs.write().map_err(poisoned)?;
    let job = jobs.get_mut(name).ok_or_else(|| StoreError::JobNotFound {
      job_name: name.to_string(),
    })?;
    job.status = status;
    Ok(())
  }

  pub fn update_sub_job_status(
    &self,
    name: &str,
    index: usize,
    status: JobStatus,
  ) -> Result<(), StoreError> {
    let mut jobs = self.jobs.write().map_err(poisoned)?;
    let job = jobs.get_mut(name).ok_or_else(|| StoreError::JobNotFound {
      job_name: name.to_string(),
    })?;

    let len = job.sub_jobs.len();
    let sub_job = job
      .sub_jobs
      .get_mut(index)
      .ok_or_else(|| StoreError::SubJobOutOfRange {
        job_name: name.to_string(),
        index,
        len,
      })?;
    sub_job.status = status;
    Ok(())
  }

  /// Apply a full backend description in one step and return the result.
  ///
  /// Sub-job statuses are applied positionally; extra entries are ignored.
  pub fn refresh(
    &self,
    name: &str,
    status: JobStatus,
    sub_jobs: Vec<JobStatus>,
  ) -> Result<Job, StoreError> {
    let mut jobs = self.jobs.write().map_err(poisoned)?;
    let job = jobs.get_mut(name).ok_or_else(|| StoreError::JobNotFound {
      job_name: name.to_string(),
    })?;

    job.status = status;
    for (sub_job, status) in job.sub_jobs.iter_mut().zip(sub_jobs) {
      sub_job.status = status;
    }
    Ok(job.clone())
  }

  pub fn remove(&self, name: &str) -> Result<Option<Job>, StoreError> {
    let mut jobs = self.jobs.write().map_err(poisoned)?;
    Ok(jobs.remove(name))
  }

  pub fn len(&self) -> usize {
    self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
