//! End-to-end tests for the array state machine against in-memory
//! collaborators and a scripted backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fanout_array::{
  ArrayMetrics, ArrayPhase, ArrayPlugin, ArrayStateMachine, Backend, BackendError,
  JobDescription, JobStatus, JobStore, LaunchRequest, LaunchedJob, MAPPING_FILE_NAME, State,
  Transition,
};
use fanout_catalog::{AsyncCatalogClient, InMemoryCatalog};
use fanout_config::{Config, RateLimitConfig, WorkQueueConfig};
use fanout_core::{
  CachedOutput, CatalogClient, CatalogError, CatalogKey, CatalogMetadata, DataReference,
  DataStore, InMemoryDataStore, OutputReader, Phase, StaticTaskReader, TaskExecutionContext,
  TaskExecutionMetadata, TaskMetadata, TaskReader, TaskTemplate,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TASK_ID: &str = "proj/dom/square";
const INPUTS: &str = "mem://inputs";
const OUTPUTS: &str = "mem://outputs";

/// Backend whose sub-job phases are set by the test.
#[derive(Default)]
struct ScriptedBackend {
  launches: Mutex<Vec<LaunchRequest>>,
  sub_jobs: Mutex<Vec<JobStatus>>,
  terminated: Mutex<Vec<String>>,
  describe_fails: AtomicBool,
  describes: AtomicUsize,
}

impl ScriptedBackend {
  fn set(&self, phases: &[Phase]) {
    let statuses = phases
      .iter()
      .map(|phase| JobStatus {
        phase: *phase,
        attempts: u32::from(*phase != Phase::Queued),
        message: if phase.is_failure() {
          "exit code 1".to_string()
        } else {
          String::new()
        },
      })
      .collect();
    *self.sub_jobs.lock().unwrap() = statuses;
  }

  fn launches(&self) -> Vec<LaunchRequest> {
    self.launches.lock().unwrap().clone()
  }
}

#[async_trait]
impl Backend for ScriptedBackend {
  async fn launch(&self, request: &LaunchRequest) -> Result<LaunchedJob, BackendError> {
    let mut launches = self.launches.lock().unwrap();
    launches.push(request.clone());
    Ok(LaunchedJob {
      job_id: format!("job-{}", launches.len()),
      job_definition: "def:1".to_string(),
    })
  }

  async fn describe(&self, _job_id: &str) -> Result<JobDescription, BackendError> {
    self.describes.fetch_add(1, Ordering::SeqCst);
    if self.describe_fails.load(Ordering::SeqCst) {
      return Err(BackendError::Unavailable("throttled".into()));
    }
    Ok(JobDescription {
      status: JobStatus {
        phase: Phase::Running,
        ..JobStatus::default()
      },
      sub_jobs: self.sub_jobs.lock().unwrap().clone(),
    })
  }

  async fn terminate(&self, job_id: &str, _reason: &str) -> Result<(), BackendError> {
    self.terminated.lock().unwrap().push(job_id.to_string());
    Ok(())
  }
}

/// In-memory catalog whose writes can be made to fail.
#[derive(Default)]
struct TestCatalog {
  inner: InMemoryCatalog,
  fail_puts: AtomicBool,
}

#[async_trait]
impl CatalogClient for TestCatalog {
  async fn get(&self, key: &CatalogKey) -> Result<Option<CachedOutput>, CatalogError> {
    self.inner.get(key).await
  }

  async fn put(
    &self,
    key: &CatalogKey,
    data: &OutputReader,
    metadata: &CatalogMetadata,
  ) -> Result<(), CatalogError> {
    if self.fail_puts.load(Ordering::SeqCst) {
      return Err(CatalogError::Unavailable("write quota exceeded".into()));
    }
    self.inner.put(key, data, metadata).await
  }
}

struct Harness {
  plugin: ArrayPlugin,
  backend: Arc<ScriptedBackend>,
  catalog: Arc<TestCatalog>,
  store: Arc<JobStore>,
  data: Arc<dyn DataStore>,
  metrics: Arc<ArrayMetrics>,
  cancel: CancellationToken,
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

fn fast_queue() -> WorkQueueConfig {
  WorkQueueConfig {
    workers: 4,
    max_retries: 2,
    retry_delay_ms: 1,
    item_deadline_ms: None,
  }
}

fn test_config() -> Config {
  let unlimited = RateLimitConfig {
    qps: 10_000.0,
    burst: 10_000,
  };
  Config {
    reader_queue: fast_queue(),
    writer_queue: fast_queue(),
    backend_rate_limit: unlimited.clone(),
    catalog_rate_limit: unlimited,
    ..Config::default()
  }
}

fn harness_with(config: Config) -> Harness {
  let config = Arc::new(config);
  let backend = Arc::new(ScriptedBackend::default());
  let catalog = Arc::new(TestCatalog::default());
  let store = Arc::new(JobStore::new());
  let metrics = Arc::new(ArrayMetrics::new());
  let cancel = CancellationToken::new();

  let client = AsyncCatalogClient::new(catalog.clone(), &config);
  client.start(cancel.clone()).unwrap();

  let machine = ArrayStateMachine::new(
    config,
    client,
    backend.clone(),
    store.clone(),
    metrics.clone(),
  );

  Harness {
    plugin: ArrayPlugin::new(machine),
    backend,
    catalog,
    store,
    data: Arc::new(InMemoryDataStore::new()),
    metrics,
    cancel,
  }
}

fn harness() -> Harness {
  harness_with(test_config())
}

fn template(size: u64, min_successes: u64, discoverable: bool) -> TaskTemplate {
  TaskTemplate {
    id: TASK_ID.to_string(),
    metadata: Some(TaskMetadata {
      discoverable,
      discovery_version: "1".to_string(),
    }),
    custom: Some(json!({ "size": size, "min_successes": min_successes })),
  }
}

fn context_with(h: &Harness, reader: Arc<dyn TaskReader>) -> TaskExecutionContext {
  TaskExecutionContext {
    task_reader: reader,
    data_store: h.data.clone(),
    input_prefix: DataReference::new(INPUTS),
    output_prefix: DataReference::new(OUTPUTS),
    metadata: TaskExecutionMetadata {
      generated_name: "exec-1".to_string(),
      namespace: "flyte".to_string(),
      ..TaskExecutionMetadata::default()
    },
  }
}

fn context(h: &Harness, template: TaskTemplate) -> TaskExecutionContext {
  context_with(h, Arc::new(StaticTaskReader::new(template)))
}

fn key(index: usize) -> CatalogKey {
  CatalogKey::new(TASK_ID, "1", DataReference::new(format!("{}/{}", INPUTS, index)))
}

fn seed_hits(h: &Harness, indices: &[usize]) {
  for index in indices {
    h.catalog.inner.insert(
      key(*index),
      CachedOutput {
        metadata: CatalogMetadata::from_execution("earlier"),
        data: Bytes::from(format!("cached-{}", index)),
      },
    );
  }
}

/// Stand in for sub-executions writing their outputs.
async fn write_outputs(h: &Harness, indices: impl IntoIterator<Item = u64>) {
  for index in indices {
    h.data
      .write_raw(
        &DataReference::new(format!("{}/{}", OUTPUTS, index)),
        Bytes::from(format!("result-{}", index)),
      )
      .await
      .unwrap();
  }
}

async fn step(h: &Harness, tctx: &TaskExecutionContext, state: State) -> Transition {
  let transition = h.plugin.handle(tctx, state.clone()).await.unwrap();
  assert!(
    transition.state.current_phase >= state.current_phase,
    "phase regressed from {} to {}",
    state.current_phase,
    transition.state.current_phase
  );
  transition
}

/// Poll until the phase reaches `until` (or later).
async fn drive(h: &Harness, tctx: &TaskExecutionContext, state: State, until: ArrayPhase) -> State {
  let mut state = state;
  for _ in 0..1000 {
    state = step(h, tctx, state).await.state;
    if state.current_phase >= until {
      return state;
    }
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
  panic!("stuck in {} waiting for {}", state.current_phase, until);
}

#[tokio::test]
async fn test_partial_cache_hits_reach_write_to_discovery() {
  let h = harness();
  let tctx = context(&h, template(10, 5, true));
  seed_hits(&h, &[0, 2, 4, 6, 8]);

  let state = drive(&h, &tctx, State::new(), ArrayPhase::MappingFileCreated).await;
  assert_eq!(state.current_phase, ArrayPhase::MappingFileCreated);
  assert_eq!(state.original_array_size, 10);
  assert_eq!(state.execution_array_size, 5);
  assert_eq!(state.indexes_to_cache.popcount(), 5);

  let mapping = h
    .data
    .read_raw(&DataReference::new(format!("{}/{}", OUTPUTS, MAPPING_FILE_NAME)))
    .await
    .unwrap();
  let lookup: Vec<u64> = serde_json::from_slice(&mapping).unwrap();
  assert_eq!(lookup, vec![1, 3, 5, 7, 9]);

  // Hits were copied into place.
  let cached = h
    .data
    .read_raw(&DataReference::new(format!("{}/4", OUTPUTS)))
    .await
    .unwrap();
  assert_eq!(cached, Bytes::from_static(b"cached-4"));

  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::JobSubmitted);
  let launches = h.backend.launches();
  assert_eq!(launches.len(), 1);
  assert_eq!(launches[0].size, 5);
  assert_eq!(launches[0].index_env_var, "BATCH_JOB_ARRAY_INDEX");

  // Cache hits alone meet the threshold, but running sub-jobs are waited on.
  assert_eq!(state.adjusted_min_successes(), 0);
  h.backend.set(&[Phase::Running; 5]);
  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::CheckingSubTaskExecutions);

  h.backend.set(&[Phase::Success; 5]);
  write_outputs(&h, lookup.clone()).await;

  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscovery);

  let state = drive(&h, &tctx, state, ArrayPhase::JobsFinished).await;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);
  assert_eq!(h.catalog.inner.len(), 10);

  let metrics = h.metrics.snapshot();
  assert_eq!(metrics.catalog_hits, 5);
  assert_eq!(metrics.catalog_misses, 5);
  assert_eq!(metrics.jobs_launched, 1);
  assert_eq!(metrics.sub_tasks_succeeded, 5);
  assert!(h.backend.terminated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_threshold_met_still_caches_late_successes() {
  let h = harness();
  let tctx = context(&h, template(3, 2, true));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Success, Phase::Success, Phase::Running]);
  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::CheckingSubTaskExecutions);

  h.backend.set(&[Phase::Success; 3]);
  write_outputs(&h, [0, 1, 2]).await;
  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscovery);

  let state = drive(&h, &tctx, state, ArrayPhase::JobsFinished).await;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);
  assert_eq!(h.catalog.inner.len(), 3);
}

#[tokio::test]
async fn test_finalize_releases_catalog_items() {
  let h = harness();
  let tctx = context(&h, template(4, 4, true));
  seed_hits(&h, &[1]);

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Success; 3]);
  write_outputs(&h, [0, 2, 3]).await;
  let state = drive(&h, &tctx, state, ArrayPhase::JobsFinished).await;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);

  let catalog = h.plugin.machine().catalog();
  assert_eq!(catalog.queued(), (4, 3));

  h.plugin.finalize(&tctx, &state).unwrap();
  assert_eq!(catalog.queued(), (0, 0));
  assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_one_running_one_succeeded_keeps_checking() {
  let h = harness();
  let tctx = context(&h, template(2, 2, false));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  assert_eq!(state.execution_array_size, 2);

  h.backend.set(&[Phase::Running, Phase::Success]);
  let transition = step(&h, &tctx, state).await;

  assert_eq!(
    transition.state.current_phase,
    ArrayPhase::CheckingSubTaskExecutions
  );
  assert_eq!(transition.info.phase, Phase::Running);
  assert_eq!(
    transition.state.phase_version,
    u32::from(Phase::Running.ordinal()) + u32::from(Phase::Success.ordinal())
  );
  assert_eq!(transition.state.array_status.phase_at(0), Phase::Running);
  assert_eq!(transition.state.array_status.phase_at(1), Phase::Success);

  // Once both succeed the array moves on.
  h.backend.set(&[Phase::Success, Phase::Success]);
  let transition = step(&h, &tctx, transition.state).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::WriteToDiscovery);
}

#[tokio::test]
async fn test_failing_catalog_write_holds_job_until_resolved() {
  let mut config = test_config();
  config.writer_queue = WorkQueueConfig {
    workers: 2,
    max_retries: 1000,
    retry_delay_ms: 5,
    item_deadline_ms: None,
  };
  let h = harness_with(config);
  let tctx = context(&h, template(2, 2, true));
  h.catalog.fail_puts.store(true, Ordering::SeqCst);

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Success, Phase::Success]);
  write_outputs(&h, [0, 1]).await;

  let mut state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscovery);

  // While writes keep failing the task stays put and reports why.
  let mut saw_retry_reason = false;
  for _ in 0..50 {
    let transition = step(&h, &tctx, state).await;
    assert_eq!(transition.state.current_phase, ArrayPhase::WriteToDiscovery);
    if transition.info.reason.contains("write quota exceeded") {
      saw_retry_reason = true;
    }
    state = transition.state;
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
  assert!(saw_retry_reason);
  assert!(h.catalog.inner.is_empty());

  h.catalog.fail_puts.store(false, Ordering::SeqCst);
  let state = drive(&h, &tctx, state, ArrayPhase::JobsFinished).await;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);
  assert_eq!(h.catalog.inner.len(), 2);
}

#[tokio::test]
async fn test_exhausted_catalog_write_is_best_effort() {
  let h = harness();
  let tctx = context(&h, template(1, 1, true));
  h.catalog.fail_puts.store(true, Ordering::SeqCst);

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Success]);
  write_outputs(&h, [0]).await;

  let state = drive(&h, &tctx, state, ArrayPhase::JobsFinished).await;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);
  assert_eq!(h.metrics.snapshot().catalog_write_failures, 1);
}

#[tokio::test]
async fn test_all_cached_skips_launch() {
  let h = harness();
  let tctx = context(&h, template(3, 3, true));
  seed_hits(&h, &[0, 1, 2]);

  let state = drive(&h, &tctx, State::new(), ArrayPhase::MappingFileCreated).await;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscovery);
  assert_eq!(state.execution_array_size, 0);

  let transition = step(&h, &tctx, state).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::JobsFinished);
  assert_eq!(transition.info.phase, Phase::Success);
  assert!(h.backend.launches().is_empty());
}

#[tokio::test]
async fn test_impossible_threshold_writes_then_fails() {
  let h = harness();
  let tctx = context(&h, template(3, 3, true));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Success, Phase::PermanentFailure, Phase::Running]);
  write_outputs(&h, [0]).await;

  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscoveryThenFail);
  assert_eq!(state.reason, "[1]: exit code 1\n");

  let state = drive(&h, &tctx, state, ArrayPhase::PermanentFailure).await;
  assert_eq!(state.current_phase, ArrayPhase::PermanentFailure);
  assert_eq!(h.catalog.inner.len(), 1);

  let transition = step(&h, &tctx, state).await;
  assert_eq!(transition.info.phase, Phase::PermanentFailure);
  assert!(transition.info.reason.contains("exit code 1"));
}

#[tokio::test]
async fn test_partial_failure_within_threshold_succeeds() {
  let h = harness();
  let tctx = context(
    &h,
    TaskTemplate {
      custom: Some(json!({ "size": 4, "min_success_ratio": 0.5 })),
      ..template(0, 0, false)
    },
  );

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  assert_eq!(state.original_min_successes, 2);

  h.backend.set(&[
    Phase::Success,
    Phase::PermanentFailure,
    Phase::Success,
    Phase::RetryableFailure,
  ]);
  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::WriteToDiscovery);

  let state = step(&h, &tctx, state).await.state;
  assert_eq!(state.current_phase, ArrayPhase::JobsFinished);
}

#[tokio::test]
async fn test_missing_template_is_permanent_failure() {
  let h = harness();
  let tctx = context_with(&h, Arc::new(StaticTaskReader::empty()));

  let transition = step(&h, &tctx, State::new()).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::PermanentFailure);
  assert_eq!(transition.info.phase, Phase::PermanentFailure);
  assert!(transition.info.reason.contains("bad task specification"));
}

#[tokio::test]
async fn test_min_successes_above_size_is_rejected() {
  let h = harness();
  let tctx = context(&h, template(2, 3, false));

  let transition = step(&h, &tctx, State::new()).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::PermanentFailure);
  assert!(transition.info.reason.contains("exceeds array size"));
}

#[tokio::test]
async fn test_oversized_array_is_rejected() {
  let h = harness();
  let tctx = context(&h, template(u64::MAX, 1, true));

  let transition = step(&h, &tctx, State::new()).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::PermanentFailure);
  assert!(transition.info.reason.contains("exceeds the maximum"));
  assert_eq!(h.plugin.machine().catalog().queued(), (0, 0));

  let mut config = test_config();
  config.max_array_size = 3;
  let h = harness_with(config);
  let tctx = context(&h, template(4, 4, false));
  let transition = step(&h, &tctx, State::new()).await;
  assert_eq!(transition.state.current_phase, ArrayPhase::PermanentFailure);
}

#[tokio::test]
async fn test_backend_error_is_retried_silently() {
  let h = harness();
  let tctx = context(&h, template(2, 2, false));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.describe_fails.store(true, Ordering::SeqCst);

  let transition = step(&h, &tctx, state.clone()).await;
  assert_eq!(transition.state, state);
  assert_eq!(transition.info.phase, Phase::Queued);
  assert!(transition.info.reason.contains("throttled"));

  h.backend.describe_fails.store(false, Ordering::SeqCst);
  h.backend.set(&[Phase::Running, Phase::Running]);
  let transition = step(&h, &tctx, transition.state).await;
  assert_eq!(
    transition.state.current_phase,
    ArrayPhase::CheckingSubTaskExecutions
  );
}

#[tokio::test]
async fn test_restart_reregisters_job() {
  let h = harness();
  let tctx = context(&h, template(3, 3, false));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.plugin.finalize(&tctx, &state).unwrap();
  assert!(h.store.is_empty());

  let describes = h.backend.describes.load(Ordering::SeqCst);
  let transition = step(&h, &tctx, state.clone()).await;
  assert_eq!(transition.state, state);
  assert_eq!(h.backend.describes.load(Ordering::SeqCst), describes);

  let job = h.store.get("exec-1").unwrap().unwrap();
  assert_eq!(Some(job.id.as_str()), state.external_job_id.as_deref());
  assert_eq!(job.sub_jobs.len(), 3);
}

#[tokio::test]
async fn test_reloaded_state_behaves_identically() {
  let h = harness();
  let tctx = context(&h, template(4, 3, false));

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.backend.set(&[Phase::Running, Phase::Success, Phase::Queued, Phase::PermanentFailure]);
  let state = step(&h, &tctx, state).await.state;

  let reloaded: State = serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
  assert_eq!(reloaded, state);

  h.backend.set(&[Phase::Success, Phase::Success, Phase::Running, Phase::PermanentFailure]);
  let from_memory = step(&h, &tctx, state).await;
  let from_disk = step(&h, &tctx, reloaded).await;
  assert_eq!(from_memory, from_disk);
}

#[tokio::test]
async fn test_abort_terminates_launched_job() {
  let h = harness();
  let tctx = context(&h, template(2, 2, false));

  h.plugin.abort(&tctx, &State::new()).await;
  assert!(h.backend.terminated.lock().unwrap().is_empty());

  let state = drive(&h, &tctx, State::new(), ArrayPhase::JobSubmitted).await;
  h.plugin.abort(&tctx, &state).await;
  assert_eq!(*h.backend.terminated.lock().unwrap(), vec!["job-1".to_string()]);
}
