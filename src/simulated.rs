//! A backend that runs nothing.
//!
//! Each sub-job walks `Queued -> Running -> Success` over successive
//! `describe` calls, staggered by index. Sub-jobs whose original index is in
//! the failure set end in `PermanentFailure` instead. Succeeded sub-jobs write
//! a small output blob, the way a real sub-execution would.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use fanout_array::{Backend, BackendError, JobDescription, JobStatus, LaunchRequest, LaunchedJob};
use fanout_core::{DataReference, DataStore, Phase};
use tracing::{debug, info};

struct SimulatedJob {
  output_prefix: DataReference,
  /// Original index per dense index.
  index_lookup: Vec<u64>,
  polls: u64,
  terminated: bool,
}

pub struct SimulatedBackend {
  data: Arc<dyn DataStore>,
  failing: BTreeSet<u64>,
  jobs: Mutex<HashMap<String, SimulatedJob>>,
}

impl SimulatedBackend {
  pub fn new(data: Arc<dyn DataStore>, failing: impl IntoIterator<Item = u64>) -> Self {
    Self {
      data,
      failing: failing.into_iter().collect(),
      jobs: Mutex::new(HashMap::new()),
    }
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<String, SimulatedJob>>, BackendError> {
    self
      .jobs
      .lock()
      .map_err(|e| BackendError::Unavailable(format!("job table poisoned: {}", e)))
  }

  fn sub_job_status(&self, job: &SimulatedJob, dense: usize, original: u64) -> JobStatus {
    // Later indices start later so progress is visible across polls.
    let started = job.polls.saturating_sub(dense as u64 % 3);
    let phase = match started {
      0 | 1 => Phase::Queued,
      2 => Phase::Running,
      _ if self.failing.contains(&original) => Phase::PermanentFailure,
      _ => Phase::Success,
    };

    if job.terminated && !phase.is_terminal() {
      return JobStatus {
        phase: Phase::PermanentFailure,
        message: "terminated".to_string(),
        attempts: 1,
      };
    }

    JobStatus {
      phase,
      message: if phase.is_failure() {
        format!("index {} exited with code 1", original)
      } else {
        String::new()
      },
      attempts: u32::from(phase != Phase::Queued),
    }
  }
}

#[async_trait]
impl Backend for SimulatedBackend {
  async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedJob, BackendError> {
    let mapping = self
      .data
      .read_raw(&request.mapping_file)
      .await
      .map_err(|e| BackendError::Rejected(format!("unreadable mapping file: {}", e)))?;
    let index_lookup: Vec<u64> = serde_json::from_slice(&mapping)
      .map_err(|e| BackendError::Rejected(format!("invalid mapping file: {}", e)))?;

    if index_lookup.len() as u64 != request.size {
      return Err(BackendError::Rejected(format!(
        "mapping file has {} entries for an array of {}",
        index_lookup.len(),
        request.size
      )));
    }

    let mut jobs = self.lock()?;
    let job_id = format!("sim-{}", jobs.len() + 1);
    jobs.insert(
      job_id.clone(),
      SimulatedJob {
        output_prefix: request.output_prefix.clone(),
        index_lookup,
        polls: 0,
        terminated: false,
      },
    );

    info!(job_id = %job_id, size = request.size, "simulated_job_launched");
    Ok(LaunchedJob {
      job_id,
      job_definition: format!("simulated:{}", request.job_name),
    })
  }

  async fn describe(&self, job_id: &str) -> Result<JobDescription, BackendError> {
    let (sub_jobs, outputs) = {
      let mut jobs = self.lock()?;
      let job = jobs
        .get_mut(job_id)
        .ok_or_else(|| BackendError::JobNotFound(job_id.to_string()))?;
      job.polls += 1;

      let mut outputs = Vec::new();
      let sub_jobs: Vec<JobStatus> = job
        .index_lookup
        .iter()
        .enumerate()
        .map(|(dense, original)| {
          let status = self.sub_job_status(job, dense, *original);
          if status.phase == Phase::Success {
            outputs.push(*original);
          }
          status
        })
        .collect();

      let outputs: Vec<(DataReference, u64)> = outputs
        .into_iter()
        .map(|original| {
          self
            .data
            .get_path(&job.output_prefix, &original.to_string())
            .map(|path| (path, original))
        })
        .collect::<Result<_, _>>()
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;
      (sub_jobs, outputs)
    };

    for (path, original) in outputs {
      self
        .data
        .write_raw(&path, Bytes::from(format!("{{\"index\":{}}}", original)))
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;
    }

    let phase = if sub_jobs.iter().all(|s| s.phase.is_terminal()) {
      Phase::Success
    } else {
      Phase::Running
    };
    debug!(job_id = %job_id, sub_jobs = sub_jobs.len(), "simulated_job_described");

    Ok(JobDescription {
      status: JobStatus {
        phase,
        ..JobStatus::default()
      },
      sub_jobs,
    })
  }

  async fn terminate(&self, job_id: &str, reason: &str) -> Result<(), BackendError> {
    let mut jobs = self.lock()?;
    if let Some(job) = jobs.get_mut(job_id) {
      job.terminated = true;
      info!(job_id = %job_id, reason = %reason, "simulated_job_terminated");
    }
    Ok(())
  }
}
