use fanout_core::{Phase, TaskExecutionContext};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::ArrayError;
use crate::machine::ArrayStateMachine;
use crate::state::{ArrayPhase, State};

/// Phase reported to the engine for the task as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
  pub phase: Phase,
  pub version: u32,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub reason: String,
}

impl PhaseInfo {
  /// Map an array state onto the engine's phase vocabulary.
  pub fn from_state(state: &State) -> Self {
    let phase = match state.current_phase {
      ArrayPhase::NotStarted
      | ArrayPhase::SubmittedToCatalogReader
      | ArrayPhase::MappingFileCreated => Phase::Initializing,
      ArrayPhase::JobSubmitted => Phase::Queued,
      ArrayPhase::CheckingSubTaskExecutions
      | ArrayPhase::WriteToDiscovery
      | ArrayPhase::WriteToDiscoveryThenFail => Phase::Running,
      ArrayPhase::JobsFinished => Phase::Success,
      ArrayPhase::PermanentFailure => Phase::PermanentFailure,
    };

    Self {
      phase,
      version: state.phase_version,
      reason: state.reason.clone(),
    }
  }
}

/// Result of one poll: the state to persist and the phase to report.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
  pub state: State,
  pub info: PhaseInfo,
}

impl Transition {
  fn from_state(state: State) -> Self {
    let info = PhaseInfo::from_state(&state);
    Self { state, info }
  }
}

/// Engine-facing entry point for array tasks.
pub struct ArrayPlugin {
  machine: ArrayStateMachine,
}

impl ArrayPlugin {
  pub fn new(machine: ArrayStateMachine) -> Self {
    Self { machine }
  }

  pub fn machine(&self) -> &ArrayStateMachine {
    &self.machine
  }

  /// Advance the task by one step.
  ///
  /// A bad task specification fails the task. Downstream errors leave the
  /// state untouched and are reported as the reason on the unchanged phase,
  /// so the next poll retries. Only internal errors are returned.
  #[instrument(
    name = "array_handle",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name(), phase = %state.current_phase)
  )]
  pub async fn handle(
    &self,
    tctx: &TaskExecutionContext,
    state: State,
  ) -> Result<Transition, ArrayError> {
    match self.machine.advance(tctx, state.clone()).await {
      Ok(next) => {
        if next.current_phase != state.current_phase {
          info!(from = %state.current_phase, to = %next.current_phase, "array_phase_changed");
        }
        Ok(Transition::from_state(next))
      }
      Err(e) if e.is_permanent() => {
        error!(error = %e, "array_task_failed");
        let next = state
          .with_reason(e.to_string())
          .with_phase(ArrayPhase::PermanentFailure, 0);
        Ok(Transition::from_state(next))
      }
      Err(e) if e.is_retryable() => {
        warn!(error = %e, "array_task_retrying");
        let mut info = PhaseInfo::from_state(&state);
        info.reason = e.to_string();
        Ok(Transition { state, info })
      }
      Err(e) => {
        error!(error = %e, "array_task_internal_error");
        Err(e)
      }
    }
  }

  /// Best effort: ask the backend to stop the job, if one was launched.
  #[instrument(
    name = "array_abort",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name())
  )]
  pub async fn abort(&self, tctx: &TaskExecutionContext, state: &State) {
    let Some(job_id) = state.external_job_id.as_deref() else {
      return;
    };
    if state.current_phase.is_terminal() {
      return;
    }

    self.machine.backend_limiter().acquire().await;
    match self.machine.backend().terminate(job_id, "aborted").await {
      Ok(()) => info!(job_id = %job_id, "array_job_terminated"),
      Err(e) => warn!(job_id = %job_id, error = %e, "array_job_terminate_failed"),
    }
  }

  /// Release per-task bookkeeping once the engine is done with the task.
  #[instrument(
    name = "array_finalize",
    skip(self, tctx, state),
    fields(job_name = %tctx.generated_name())
  )]
  pub fn finalize(&self, tctx: &TaskExecutionContext, state: &State) -> Result<(), ArrayError> {
    self.machine.release(tctx, state)
  }
}
