//! Shared cycle entrypoint used by the CLI and the daemon.

use todosync_core::{CycleReport, Settings, TrackedFile};

use crate::engine;
use crate::error::{Severity, SyncError};
use crate::remote::RemoteStore;
use crate::replica::Replica;
use crate::snapshot::GitLog;

/// Classified result of one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The cycle was aborted; the next tick retries from scratch.
    Retryable(SyncError),
    /// The setup is broken; further cycles cannot succeed.
    Fatal(SyncError),
}

impl CycleOutcome {
    pub fn from_result(result: Result<CycleReport, SyncError>) -> Self {
        match result {
            Ok(report) => CycleOutcome::Completed(report),
            Err(err) => match err.severity() {
                Severity::Retryable => CycleOutcome::Retryable(err),
                Severity::Fatal => CycleOutcome::Fatal(err),
            },
        }
    }

    pub fn into_result(self) -> Result<CycleReport, SyncError> {
        match self {
            CycleOutcome::Completed(report) => Ok(report),
            CycleOutcome::Retryable(err) | CycleOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Settings plus a remote store: everything a cycle needs.
pub struct Pipeline {
    settings: Settings,
    remote: Box<dyn RemoteStore + Send + Sync>,
}

impl Pipeline {
    pub fn new(settings: Settings, remote: Box<dyn RemoteStore + Send + Sync>) -> Self {
        Self { settings, remote }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one reconciliation cycle against the configured replicas.
    pub fn run_cycle(&self) -> CycleOutcome {
        let outcome = CycleOutcome::from_result(self.try_cycle());
        match &outcome {
            CycleOutcome::Completed(report) => tracing::info!(
                "cycle completed: {} file(s) propagated, {} snapshot(s)",
                report.changed(),
                report.snapshots()
            ),
            CycleOutcome::Retryable(err) => tracing::warn!("cycle aborted, will retry: {err}"),
            CycleOutcome::Fatal(err) => tracing::error!("cycle failed: {err}"),
        }
        outcome
    }

    /// Fingerprint every tracked file in all three replicas.
    pub fn observe(&self) -> Result<Vec<TrackedFile>, SyncError> {
        observe(&self.settings, Some(self.remote.as_ref()))
    }

    fn try_cycle(&self) -> Result<CycleReport, SyncError> {
        let s = &self.settings;
        let repository = Replica::open("repository", &s.repository)?;
        let local = Replica::open("local", &s.local_dir)?;
        let log = GitLog::new(&s.repository, s.author.clone());
        engine::reconcile(
            self.remote.as_ref(),
            &log,
            &repository,
            &local,
            &s.tracked_files,
        )
    }
}

/// Fingerprint every tracked file; the remote column is skipped when `remote` is `None`.
pub fn observe(
    settings: &Settings,
    remote: Option<&dyn RemoteStore>,
) -> Result<Vec<TrackedFile>, SyncError> {
    let repository = Replica::open("repository", &settings.repository)?;
    let local = Replica::open("local", &settings.local_dir)?;
    engine::observe(remote, &repository, &local, &settings.tracked_files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use todosync_core::{ConfigError, FileName};

    use super::*;

    #[test]
    fn outcome_classifies_by_severity() {
        let fatal = CycleOutcome::from_result(Err(SyncError::Config(ConfigError::HomeNotFound)));
        assert!(matches!(fatal, CycleOutcome::Fatal(_)));

        let retry = CycleOutcome::from_result(Err(SyncError::RemoteObjectMissing {
            name: FileName::from("todo.txt"),
        }));
        assert!(matches!(retry, CycleOutcome::Retryable(_)));
        assert!(retry.into_result().is_err());
    }

    #[test]
    fn observe_local_only_reports_both_local_replicas() {
        let repo = TempDir::new().expect("repo");
        let local = TempDir::new().expect("local");
        fs::write(repo.path().join("todo.txt"), "A\n").expect("write");
        fs::write(local.path().join("todo.txt"), "A2\n").expect("write");

        let settings = Settings::new(repo.path().to_path_buf(), local.path().to_path_buf());
        let files = observe(&settings, None).expect("observe");

        assert_eq!(files.len(), 2);
        let done = files.iter().find(|f| f.name.as_str() == "done.txt").unwrap();
        assert!(done.repository.is_absent() && done.local.is_absent());
        let todo = files.iter().find(|f| f.name.as_str() == "todo.txt").unwrap();
        assert!(!todo.is_converged());
    }

    #[test]
    fn observe_missing_local_dir_is_an_io_error() {
        let repo = TempDir::new().expect("repo");
        let settings = Settings::new(repo.path().to_path_buf(), repo.path().join("missing"));
        let err = observe(&settings, None).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }
}
