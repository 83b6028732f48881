//! The array task state machine.
//!
//! Each call advances a [`State`] by at most one phase and never waits on
//! the catalog queues: unfinished work shows up as a phase that does not
//! advance, and the next poll looks again.

use std::sync::Arc;

use bytes::Bytes;
use fanout_catalog::{AsyncCatalogClient, DownloadRequest, ResponseStatus, UploadRequest};
use fanout_config::Config;
use fanout_core::{
  ArrayJob, CatalogKey, CatalogMetadata, DataReference, OutputReader, OutputWriter, Phase,
  RateLimiter, TaskExecutionContext, TaskTemplate,
};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{AggregatePolicy, aggregate};
use crate::backend::{Backend, LaunchRequest};
use crate::error::ArrayError;
use crate::metrics::ArrayMetrics;
use crate::state::{ArrayPhase, State};
use crate::store::{Job, JobStore};
use crate::tracker::CacheTracking;

/// Name of the index mapping file under the output prefix.
pub const MAPPING_FILE_NAME: &str = "index_lookup.json";

/// Read the task template and decode its array job descriptor. Arrays larger
/// than `max_size` are rejected.
pub async fn read_array_job(
  tctx: &TaskExecutionContext,
  max_size: u64,
) -> Result<(TaskTemplate, ArrayJob), ArrayError> {
  let template = tctx
    .task_reader
    .read()
    .await
    .map_err(|e| ArrayError::downstream("failed to read task template", e))?
    .ok_or_else(|| ArrayError::bad_spec("required value not set, task template is missing"))?;

  let custom = template
    .custom
    .as_ref()
    .ok_or_else(|| ArrayError::bad_spec("could not extract custom array job"))?;

  let job = ArrayJob::from_custom(custom)
    .map_err(|e| ArrayError::bad_spec(format!("could not decode array job: {}", e)))?;

  if job.size > max_size {
    return Err(ArrayError::bad_spec(format!(
      "array size {} exceeds the maximum of {}",
      job.size, max_size
    )));
  }

  if job.min_successes() > job.size {
    return Err(ArrayError::bad_spec(format!(
      "min successes {} exceeds array size {}",
      job.min_successes(),
      job.size
    )));
  }

  Ok((template, job))
}

fn array_len(size: u64) -> Result<usize, ArrayError> {
  usize::try_from(size).map_err(|_| ArrayError::Internal {
    message: format!("array size {} does not fit in memory", size),
  })
}

/// Drives array tasks through their phases.
///
/// One instance serves every array task in the process; everything specific
/// to a task lives in its [`State`].
pub struct ArrayStateMachine {
  config: Arc<Config>,
  catalog: AsyncCatalogClient,
  backend: Arc<dyn Backend>,
  backend_limiter: Arc<RateLimiter>,
  store: Arc<JobStore>,
  metrics: Arc<ArrayMetrics>,
}

impl ArrayStateMachine {
  pub fn new(
    config: Arc<Config>,
    catalog: AsyncCatalogClient,
    backend: Arc<dyn Backend>,
    store: Arc<JobStore>,
    metrics: Arc<ArrayMetrics>,
  ) -> Self {
    let backend_limiter = Arc::new(RateLimiter::from_config(
      "backend",
      &config.backend_rate_limit,
    ));
    Self {
      config,
      catalog,
      backend,
      backend_limiter,
      store,
      metrics,
    }
  }

  pub fn store(&self) -> &Arc<JobStore> {
    &self.store
  }

  pub fn metrics(&self) -> &Arc<ArrayMetrics> {
    &self.metrics
  }

  pub fn catalog(&self) -> &AsyncCatalogClient {
    &self.catalog
  }

  /// Drop the task's job store entry and its catalog queue items.
  pub fn release(&self, tctx: &TaskExecutionContext, state: &State) -> Result<(), ArrayError> {
    self.store.remove(tctx.generated_name())?;
    let released = self.catalog.release(
      (0..state.original_array_size).map(|index| Self::item_id(tctx, index)),
    );
    debug!(released, "task_released");
    Ok(())
  }

  pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
    &self.backend
  }

  pub(crate) fn backend_limiter(&self) -> &RateLimiter {
    &self.backend_limiter
  }

  /// Run the step for the state's current phase.
  pub async fn advance(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<State, ArrayError> {
    match state.current_phase {
      ArrayPhase::NotStarted | ArrayPhase::SubmittedToCatalogReader => {
        self.determine_discoverability(tctx, state).await
      }
      ArrayPhase::MappingFileCreated => self.launch(tctx, state).await,
      ArrayPhase::JobSubmitted | ArrayPhase::CheckingSubTaskExecutions => {
        self.check_sub_tasks_state(tctx, state).await
      }
      ArrayPhase::WriteToDiscovery | ArrayPhase::WriteToDiscoveryThenFail => {
        self.write_to_discovery(tctx, state).await
      }
      ArrayPhase::JobsFinished | ArrayPhase::PermanentFailure => Ok(state),
    }
  }

  /// Size the execution.
  ///
  /// For discoverable tasks this queues one catalog lookup per original
  /// index and waits (across polls) for all of them. Lookups that fail count
  /// as misses. The resulting index mapping is written next to the outputs.
  #[instrument(
    name = "determine_discoverability",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name())
  )]
  pub async fn determine_discoverability(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<State, ArrayError> {
    let (template, job) = read_array_job(tctx, self.config.max_array_size).await?;
    let size = array_len(job.size)?;
    let state = state.with_request(job.size, job.min_successes());

    let tracking = if template.is_discoverable() {
      let requests = self.download_requests(tctx, &template, size)?;
      let future = self
        .catalog
        .download(requests)
        .map_err(|e| ArrayError::downstream("failed to queue catalog lookups", e))?;

      if future.status() == ResponseStatus::NotReady {
        debug!(size, "catalog_lookups_pending");
        return Ok(state.with_phase(ArrayPhase::SubmittedToCatalogReader, 0));
      }

      let hits = future.cached_results();
      let failures = future.failed_count();
      let hit_count = hits.popcount();
      if failures > 0 {
        warn!(failures, "catalog_lookups_failed");
      }
      self.metrics.record_lookups(
        hit_count as u64,
        (size - hit_count - failures) as u64,
        failures as u64,
      );

      CacheTracking::from_hits(size, &hits)
    } else {
      info!(size, "task_not_discoverable");
      CacheTracking::no_hits(size)
    };

    info!(
      original_array_size = size,
      execution_array_size = tracking.execution_array_size,
      "array_sized"
    );

    let state = state.with_tracking(&tracking);
    if tracking.all_cached() {
      return Ok(state.with_phase(ArrayPhase::WriteToDiscovery, 0));
    }

    self.write_mapping_file(tctx, &tracking.index_lookup).await?;
    Ok(state.with_phase(ArrayPhase::MappingFileCreated, 0))
  }

  /// Submit the compacted array to the backend and register it in the job
  /// store.
  #[instrument(
    name = "launch",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name(), size = state.execution_array_size)
  )]
  pub async fn launch(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<State, ArrayError> {
    let (_, job) = read_array_job(tctx, self.config.max_array_size).await?;
    let name = tctx.generated_name();

    let request = LaunchRequest {
      job_name: name.to_string(),
      namespace: tctx.metadata.namespace.clone(),
      size: state.execution_array_size,
      parallelism: job.parallelism,
      index_env_var: self.config.index_env_var.clone(),
      mapping_file: self.mapping_file_path(tctx)?,
      input_prefix: tctx.input_prefix.clone(),
      output_prefix: tctx.output_prefix.clone(),
      labels: tctx.metadata.labels.clone(),
      annotations: tctx.metadata.annotations.clone(),
    };

    self.backend_limiter.acquire().await;
    let launched = self
      .backend
      .launch(&request)
      .await
      .map_err(|e| ArrayError::downstream("failed to launch array job", e))?;
    self.metrics.record_launch();

    self.store.get_or_create(
      name,
      Job::new(&launched.job_id, array_len(state.execution_array_size)?),
    )?;

    info!(job_id = %launched.job_id, "array_job_launched");
    Ok(
      state
        .with_job(launched.job_id, launched.job_definition)
        .with_phase(ArrayPhase::JobSubmitted, 0),
    )
  }

  /// Refresh sub-job phases from the backend and aggregate them.
  ///
  /// If the job store has no entry (the process restarted), the job is
  /// re-registered from the persisted job id and the state is returned
  /// unchanged; the next poll refreshes it.
  #[instrument(
    name = "check_sub_tasks_state",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name(), job_id = ?state.external_job_id)
  )]
  pub async fn check_sub_tasks_state(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<State, ArrayError> {
    if state.execution_array_size == 0 {
      return Ok(state.with_phase(ArrayPhase::WriteToDiscovery, 0));
    }

    let name = tctx.generated_name();
    let job_id = state.external_job_id.clone().ok_or_else(|| ArrayError::Internal {
      message: format!("no external job id in phase {}", state.current_phase),
    })?;

    if self.store.get(name)?.is_none() {
      warn!("job_missing_from_store");
      self.store.get_or_create(
        name,
        Job::new(&job_id, array_len(state.execution_array_size)?),
      )?;
      return Ok(state);
    }

    self.backend_limiter.acquire().await;
    let description = self
      .backend
      .describe(&job_id)
      .await
      .map_err(|e| ArrayError::downstream(format!("failed to describe job [{}]", job_id), e))?;
    let job = self
      .store
      .refresh(name, description.status, description.sub_jobs)?;

    let result = aggregate(
      &job.sub_job_statuses(),
      AggregatePolicy {
        min_successes: state.adjusted_min_successes(),
        max_attempts: self.config.max_sub_task_attempts,
        max_error_len: self.config.max_error_string_length,
      },
    );

    if result.phase != ArrayPhase::CheckingSubTaskExecutions {
      let summary = &result.status.summary;
      self.metrics.record_sub_tasks(
        summary.count(Phase::Success),
        summary.count(Phase::PermanentFailure),
      );
    }

    debug!(
      phase = %result.phase,
      version = result.version,
      "sub_tasks_aggregated"
    );

    let state = state.with_array_status(result.status, result.retry_attempts);
    let state = if result.reason.is_empty() {
      state
    } else {
      state.with_reason(result.reason)
    };
    Ok(state.with_phase(result.phase, result.version))
  }

  /// Write the results of succeeded sub-jobs back to the catalog.
  ///
  /// Writes are best effort: once every write is terminal the task moves on
  /// even if some failed. While writes are still being retried, their latest
  /// error is returned as a retryable error.
  #[instrument(
    name = "write_to_discovery",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name(), phase = %state.current_phase)
  )]
  pub async fn write_to_discovery(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<State, ArrayError> {
    let next = if state.current_phase == ArrayPhase::WriteToDiscoveryThenFail {
      ArrayPhase::PermanentFailure
    } else {
      ArrayPhase::JobsFinished
    };

    let (template, _) = read_array_job(tctx, self.config.max_array_size).await?;
    if !template.is_discoverable() {
      return Ok(state.with_phase(next, 0));
    }

    let requests = self.upload_requests(tctx, &template, &state)?;
    if requests.is_empty() {
      debug!("nothing_to_cache");
      return Ok(state.with_phase(next, 0));
    }

    let future = self
      .catalog
      .upload(requests)
      .map_err(|e| ArrayError::downstream("failed to queue catalog writes", e))?;

    if future.status() == ResponseStatus::NotReady {
      if let Some((item_id, error)) = future.errors().first() {
        return Err(ArrayError::downstream(
          format!("catalog write [{}] is being retried", item_id),
          error.clone(),
        ));
      }
      return Ok(state);
    }

    if !future.failed().is_empty() {
      warn!(failed = ?future.failed(), "catalog_writes_failed");
      self.metrics.record_write_failures(future.failed().len() as u64);
    }
    info!(written = future.done_count(), "catalog_write_back_finished");

    Ok(state.with_phase(next, 0))
  }

  fn index_path(
    &self,
    tctx: &TaskExecutionContext,
    prefix: &DataReference,
    index: usize,
  ) -> Result<DataReference, ArrayError> {
    tctx
      .data_store
      .get_path(prefix, &index.to_string())
      .map_err(|e| ArrayError::Internal {
        message: format!("failed to build path for index {}: {}", index, e),
      })
  }

  fn catalog_key(
    &self,
    tctx: &TaskExecutionContext,
    template: &TaskTemplate,
    index: usize,
  ) -> Result<CatalogKey, ArrayError> {
    Ok(CatalogKey::new(
      template.id.clone(),
      template.discovery_version(),
      self.index_path(tctx, &tctx.input_prefix, index)?,
    ))
  }

  fn item_id(tctx: &TaskExecutionContext, index: impl std::fmt::Display) -> String {
    format!("{}-{}", tctx.generated_name(), index)
  }

  fn download_requests(
    &self,
    tctx: &TaskExecutionContext,
    template: &TaskTemplate,
    size: usize,
  ) -> Result<Vec<DownloadRequest>, ArrayError> {
    (0..size)
      .map(|index| -> Result<DownloadRequest, ArrayError> {
        Ok(DownloadRequest {
          item_id: Self::item_id(tctx, index),
          key: self.catalog_key(tctx, template, index)?,
          target: OutputWriter::new(
            tctx.data_store.clone(),
            self.index_path(tctx, &tctx.output_prefix, index)?,
          ),
        })
      })
      .collect()
  }

  /// One write per original index that ran and whose sub-job succeeded.
  fn upload_requests(
    &self,
    tctx: &TaskExecutionContext,
    template: &TaskTemplate,
    state: &State,
  ) -> Result<Vec<UploadRequest>, ArrayError> {
    let metadata = CatalogMetadata::from_execution(tctx.generated_name());

    state
      .indexes_to_cache
      .iter_set()
      .enumerate()
      .filter(|(compacted, _)| state.array_status.phase_at(*compacted).is_success())
      .map(|(_, original)| -> Result<UploadRequest, ArrayError> {
        Ok(UploadRequest {
          item_id: Self::item_id(tctx, original),
          key: self.catalog_key(tctx, template, original)?,
          data: OutputReader::new(
            tctx.data_store.clone(),
            self.index_path(tctx, &tctx.output_prefix, original)?,
          ),
          metadata: metadata.clone(),
        })
      })
      .collect()
  }

  fn mapping_file_path(&self, tctx: &TaskExecutionContext) -> Result<DataReference, ArrayError> {
    tctx
      .data_store
      .get_path(&tctx.output_prefix, MAPPING_FILE_NAME)
      .map_err(|e| ArrayError::Internal {
        message: format!("failed to build mapping file path: {}", e),
      })
  }

  async fn write_mapping_file(
    &self,
    tctx: &TaskExecutionContext,
    index_lookup: &[u64],
  ) -> Result<(), ArrayError> {
    let path = self.mapping_file_path(tctx)?;
    let body = serde_json::to_vec(index_lookup).map_err(|e| ArrayError::Internal {
      message: format!("failed to encode index lookup: {}", e),
    })?;

    tctx
      .data_store
      .write_raw(&path, Bytes::from(body))
      .await
      .map_err(|e| ArrayError::downstream("failed to write mapping file", e))?;

    debug!(path = %path, entries = index_lookup.len(), "mapping_file_written");
    Ok(())
  }
}
