//! todosync core library: domain types, settings persistence, errors.
//!
//! - [`types`]: file names, fingerprints, change sets and cycle reports
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / validate [`Settings`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Author, Settings};
pub use error::ConfigError;
pub use types::{
    ChangeSet, CycleReport, Direction, FileName, Fingerprint, PassReport, SnapshotId, TrackedFile,
};
