//! # todosync-sync
//!
//! Fingerprint-gated three-way reconciliation between a remote object store,
//! a git repository and a local working directory.
//!
//! Call [`engine::reconcile`] with explicit adapters, or build a
//! [`pipeline::Pipeline`] from [`todosync_core::Settings`] and call
//! [`pipeline::Pipeline::run_cycle`] for a classified [`pipeline::CycleOutcome`].

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod remote;
pub mod replica;
pub mod snapshot;

pub use engine::{observe, reconcile};
pub use error::{Severity, SyncError};
pub use pipeline::{CycleOutcome, Pipeline};
pub use remote::{RemoteObject, RemoteStore};
pub use replica::Replica;
pub use snapshot::{GitLog, SnapshotLog};
