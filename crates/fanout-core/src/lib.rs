//! Fanout Core
//!
//! Boundary types shared by the array task plugin and its collaborators.
//! Nothing in this crate drives execution; it describes what the plugin
//! consumes:
//!
//! - [`Phase`]: the phase vocabulary for a single (sub-)execution
//! - [`CatalogClient`]: "has this exact input been computed before" lookups
//!   and result write-back, keyed by [`CatalogKey`]
//! - [`DataStore`]: path construction plus raw reads and writes for per-index
//!   input and output locations
//! - [`TaskExecutionContext`]: the task template reader, I/O prefixes and
//!   execution metadata handed to the plugin on every poll
//! - [`RateLimiter`]: qps and burst limit used at every external boundary
//! - [`BitSet`] and [`CompactArray`]: fixed-size bit vectors for per-index
//!   bookkeeping

mod bitarray;
mod catalog;
mod context;
mod data;
mod limiter;
mod phase;
mod task;

pub use bitarray::{BitSet, CompactArray};
pub use catalog::{CachedOutput, CatalogClient, CatalogError, CatalogKey, CatalogMetadata};
pub use context::{OwnerReference, TaskExecutionContext, TaskExecutionMetadata};
pub use data::{
  DataReference, DataStore, DataStoreError, InMemoryDataStore, OutputReader, OutputWriter,
};
pub use limiter::RateLimiter;
pub use phase::Phase;
pub use task::{
  ArrayJob, StaticTaskReader, TaskMetadata, TaskReadError, TaskReader, TaskTemplate,
};
