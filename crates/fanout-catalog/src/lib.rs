//! Fanout Catalog
//!
//! Catalog reads and writes run on work queues so the array state machine
//! never blocks a poll on the catalog service.
//!
//! - [`CatalogWorkItem`] is the closed set of items the catalog queues carry:
//!   a `Reader` looks a key up (copying cached outputs into place on a hit),
//!   a `Writer` records a finished result.
//! - [`ReaderProcessor`] and [`WriterProcessor`] perform one attempt each.
//! - [`AsyncCatalogClient`] owns both queues and exposes `download`/`upload`
//!   calls that return a snapshot future, re-attaching to already queued
//!   items when called again on a later poll.

mod client;
mod error;
mod item;
mod limited;
mod memory;
mod reader;
mod writer;

pub use client::{
  AsyncCatalogClient, DownloadFuture, DownloadOutcome, DownloadRequest, ResponseStatus,
  UploadFuture, UploadRequest,
};
pub use error::{AsyncClientError, ProcessError};
pub use item::{CatalogWorkItem, ReadOutcome, ReaderWorkItem, WriterWorkItem};
pub use limited::RateLimitedCatalog;
pub use memory::InMemoryCatalog;
pub use reader::ReaderProcessor;
pub use writer::WriterProcessor;
