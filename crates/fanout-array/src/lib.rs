//! Fanout Array
//!
//! Drives array (fan-out) tasks: one logical task expanded into N
//! independent sub-executions.
//!
//! ## Flow
//!
//! 1. **Sizing**: for discoverable tasks every original index is looked up in
//!    the catalog. Hits are skipped; the remaining indices are submitted as a
//!    smaller, densely indexed array, and an index mapping file tells each
//!    sub-execution which original index it owns.
//! 2. **Launch**: the compacted array is submitted to the [`Backend`] and
//!    registered in the [`JobStore`].
//! 3. **Monitoring**: each poll refreshes sub-job phases and aggregates them
//!    against the success threshold (cache hits count toward it).
//! 4. **Write-back**: succeeded results are written to the catalog.
//!
//! The machine never blocks on catalog work. Everything carried between
//! polls lives in [`State`], which is serialisable and replaced (not
//! mutated) on every step.

mod aggregate;
mod backend;
mod error;
mod machine;
mod metrics;
mod plugin;
mod state;
mod status;
mod store;
mod tracker;

pub use aggregate::{Aggregate, AggregatePolicy, ErrorCollector, aggregate, summary_to_phase};
pub use backend::{Backend, JobDescription, LaunchRequest, LaunchedJob};
pub use error::{ArrayError, BackendError, StoreError};
pub use machine::{ArrayStateMachine, MAPPING_FILE_NAME, read_array_job};
pub use metrics::{ArrayMetrics, MetricsSnapshot};
pub use plugin::{ArrayPlugin, PhaseInfo, Transition};
pub use state::{ArrayPhase, State};
pub use status::{ArrayStatus, ArraySummary};
pub use store::{Job, JobStatus, JobStore};
pub use tracker::{CacheTracking, index_lookup, original_index};
