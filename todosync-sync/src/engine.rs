//! Reconciliation engine.
//!
//! ## `reconcile`: one cycle, two passes, always in this order
//!
//! 1. Remote → repository → local: pull every remote object whose fingerprint
//!    differs from the repository copy, commit once, fan out to local.
//! 2. Local → repository → remote: pull every local copy whose fingerprint
//!    differs from the repository copy, commit once, fan out to remote.
//!
//! Neither pass writes into the repository until every changed copy is in
//! hand. A failed repository write or commit restores the pass's files from
//! the last snapshot, so the repository copy is always a committed copy.
//!
//! The repository copy is the reference both passes compare against. Pass 1
//! never fans out over a local copy that differs from the repository copy it
//! started from, and pass 2 sees what pass 1 wrote, so when both sides edited
//! the same file in one cycle the local edit is the one that survives.

use chrono::Utc;

use todosync_core::{
    ChangeSet, CycleReport, Direction, FileName, Fingerprint, PassReport, SnapshotId, TrackedFile,
};

use crate::error::SyncError;
use crate::remote::RemoteStore;
use crate::replica::Replica;
use crate::snapshot::SnapshotLog;

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

/// Run one full reconciliation cycle.
///
/// Any adapter error aborts the cycle at once. A commit made earlier in the
/// same cycle is kept; the next cycle picks up whatever is still unpropagated
/// by comparing fingerprints again.
pub fn reconcile(
    remote: &dyn RemoteStore,
    log: &dyn SnapshotLog,
    repository: &Replica,
    local: &Replica,
    tracked: &[FileName],
) -> Result<CycleReport, SyncError> {
    let started_at = Utc::now();

    let from_remote = pull_remote(remote, log, repository, local, tracked)?;
    let from_local = push_local(remote, log, repository, local, tracked)?;

    Ok(CycleReport {
        started_at,
        finished_at: Utc::now(),
        passes: vec![from_remote, from_local],
    })
}

/// Pass 1: remote → repository → local.
fn pull_remote(
    remote: &dyn RemoteStore,
    log: &dyn SnapshotLog,
    repository: &Replica,
    local: &Replica,
    tracked: &[FileName],
) -> Result<PassReport, SyncError> {
    let mut report = PassReport::new(Direction::FromRemote);
    let mut staged = Vec::new();

    for object in remote.list_by_name(tracked)? {
        if !tracked.contains(&object.name) {
            tracing::warn!("ignoring untracked remote object {} ({})", object.name, object.id);
            continue;
        }

        let remote_fp = remote.fingerprint_of(&object)?;
        let repo_fp = repository.fingerprint(&object.name)?;
        if remote_fp == repo_fp {
            tracing::debug!("skip, no remote update: {} {}", object.name, object.id);
            continue;
        }
        let local_fp = local.fingerprint(&object.name)?;

        tracing::info!(
            "changed remote file: {} ({} -> {})",
            object.name,
            repo_fp,
            remote_fp
        );
        let bytes = remote.download(&object)?;
        if local_fp != repo_fp {
            report.kept_local.push(object.name.clone());
        }
        report.changed.insert(object.name.clone());
        staged.push((object.name, bytes));
    }

    if staged.is_empty() {
        return Ok(report);
    }

    report.snapshot = record(log, repository, &report.changed, &staged, Direction::FromRemote)?;
    for name in &report.changed {
        if report.kept_local.contains(name) {
            // The local pass pushes this edit over the remote one.
            tracing::info!("local copy of {} has its own edit, not overwriting", name);
            continue;
        }
        repository.copy_to(name, local)?;
    }
    Ok(report)
}

/// Pass 2: local → repository → remote.
fn push_local(
    remote: &dyn RemoteStore,
    log: &dyn SnapshotLog,
    repository: &Replica,
    local: &Replica,
    tracked: &[FileName],
) -> Result<PassReport, SyncError> {
    let mut report = PassReport::new(Direction::FromLocal);
    let mut staged = Vec::new();

    for name in tracked {
        let local_fp = local.fingerprint(name)?;
        let repo_fp = repository.fingerprint(name)?;
        if local_fp == repo_fp {
            tracing::debug!("skip, no local update: {}", name);
            continue;
        }

        if local_fp.is_absent() {
            // Deletions are never propagated; re-seed the working copy instead.
            tracing::warn!("local copy of {} is missing, restoring from repository", name);
            repository.copy_to(name, local)?;
            report.restored.push(name.clone());
            continue;
        }

        tracing::info!("changed local file: {} ({} -> {})", name, repo_fp, local_fp);
        let bytes = local.read_existing(name)?;
        report.changed.insert(name.clone());
        staged.push((name.clone(), bytes));
    }

    if staged.is_empty() {
        return Ok(report);
    }

    report.snapshot = record(log, repository, &report.changed, &staged, Direction::FromLocal)?;
    for name in &report.changed {
        let object = remote.find_by_name(name)?;
        let bytes = repository.read_existing(name)?;
        remote.upload(&object, &bytes)?;
        tracing::info!("uploaded {} ({})", name, object.id);
    }
    Ok(report)
}

/// Write `staged` into the repository and commit it as one snapshot.
///
/// On a write or commit failure every file in `changes` is restored from the
/// last snapshot before the error is returned.
fn record(
    log: &dyn SnapshotLog,
    repository: &Replica,
    changes: &ChangeSet,
    staged: &[(FileName, Vec<u8>)],
    direction: Direction,
) -> Result<Option<SnapshotId>, SyncError> {
    let result = staged
        .iter()
        .try_for_each(|(name, bytes)| repository.write(name, bytes))
        .and_then(|()| log.commit(changes, direction.commit_message()));

    if let Err(err) = &result {
        tracing::warn!(
            "'{}' snapshot failed, restoring repository copies: {}",
            direction.commit_message(),
            err
        );
        if let Err(restore_err) = log.restore(changes) {
            tracing::error!("could not restore repository copies: {}", restore_err);
        }
    }
    result
}

// ---------------------------------------------------------------------------
// observe
// ---------------------------------------------------------------------------

/// Fingerprint every tracked file in each replica without changing anything.
///
/// The remote column is left empty when `remote` is `None`; a tracked name
/// with no remote object is reported as absent.
pub fn observe(
    remote: Option<&dyn RemoteStore>,
    repository: &Replica,
    local: &Replica,
    tracked: &[FileName],
) -> Result<Vec<TrackedFile>, SyncError> {
    let listed = match remote {
        Some(store) => Some(store.list_by_name(tracked)?),
        None => None,
    };

    let mut files = Vec::with_capacity(tracked.len());
    for name in tracked {
        let remote_fp = match (remote, &listed) {
            (Some(store), Some(objects)) => match objects.iter().find(|o| &o.name == name) {
                Some(object) => Some(store.fingerprint_of(object)?),
                None => Some(Fingerprint::Absent),
            },
            _ => None,
        };
        files.push(TrackedFile {
            name: name.clone(),
            remote: remote_fp,
            repository: repository.fingerprint(name)?,
            local: local.fingerprint(name)?,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records commit calls instead of touching git.
    #[derive(Default)]
    struct RecordingLog {
        calls: RefCell<Vec<(Vec<String>, String)>>,
        restored: RefCell<Vec<String>>,
        refuse_commits: bool,
    }

    impl SnapshotLog for RecordingLog {
        fn commit(
            &self,
            changes: &ChangeSet,
            message: &str,
        ) -> Result<Option<SnapshotId>, SyncError> {
            if changes.is_empty() {
                return Ok(None);
            }
            if self.refuse_commits {
                return Err(SyncError::Git {
                    op: "write index",
                    source: git2::Error::from_str("the index is locked"),
                });
            }
            let names = changes.iter().map(|n| n.0.clone()).collect();
            let mut calls = self.calls.borrow_mut();
            calls.push((names, message.to_string()));
            Ok(Some(SnapshotId(format!("snap-{}", calls.len()))))
        }

        fn restore(&self, names: &ChangeSet) -> Result<(), SyncError> {
            self.restored
                .borrow_mut()
                .extend(names.iter().map(|n| n.0.clone()));
            Ok(())
        }
    }

    /// A remote store that must never be reached.
    struct Unreachable;

    impl RemoteStore for Unreachable {
        fn list_by_name(
            &self,
            names: &[FileName],
        ) -> Result<Vec<crate::remote::RemoteObject>, SyncError> {
            Err(SyncError::NoRemoteObjects {
                names: names.to_vec(),
            })
        }
        fn fingerprint_of(
            &self,
            _object: &crate::remote::RemoteObject,
        ) -> Result<Fingerprint, SyncError> {
            unreachable!("fingerprint_of")
        }
        fn download(&self, _object: &crate::remote::RemoteObject) -> Result<Vec<u8>, SyncError> {
            unreachable!("download")
        }
        fn upload(
            &self,
            _object: &crate::remote::RemoteObject,
            _bytes: &[u8],
        ) -> Result<(), SyncError> {
            unreachable!("upload")
        }
    }

    fn replicas() -> (TempDir, TempDir, Replica, Replica) {
        let repo_dir = TempDir::new().unwrap();
        let local_dir = TempDir::new().unwrap();
        let repository = Replica::open("repository", repo_dir.path()).unwrap();
        let local = Replica::open("local", local_dir.path()).unwrap();
        (repo_dir, local_dir, repository, local)
    }

    #[test]
    fn empty_remote_listing_aborts_before_any_write() {
        let (_r, _l, repository, local) = replicas();
        local.write(&FileName::from("todo.txt"), b"edited").unwrap();
        let log = RecordingLog::default();

        let err = reconcile(
            &Unreachable,
            &log,
            &repository,
            &local,
            &[FileName::from("todo.txt")],
        )
        .unwrap_err();

        assert!(matches!(err, SyncError::NoRemoteObjects { .. }));
        assert!(log.calls.borrow().is_empty());
        assert_eq!(repository.read(&FileName::from("todo.txt")).unwrap(), None);
    }

    #[test]
    fn push_local_restores_missing_working_copy() {
        let (_r, _l, repository, local) = replicas();
        let name = FileName::from("done.txt");
        repository.write(&name, b"B\n").unwrap();
        let log = RecordingLog::default();

        let report = push_local(&Unreachable, &log, &repository, &local, &[name.clone()]).unwrap();

        assert!(report.changed.is_empty());
        assert_eq!(report.restored, vec![name.clone()]);
        assert_eq!(report.snapshot, None);
        assert_eq!(local.read(&name).unwrap().unwrap(), b"B\n");
        assert!(log.calls.borrow().is_empty());
    }

    #[test]
    fn push_local_skips_files_absent_everywhere() {
        let (_r, _l, repository, local) = replicas();
        let log = RecordingLog::default();
        let report = push_local(
            &Unreachable,
            &log,
            &repository,
            &local,
            &[FileName::from("todo.txt")],
        )
        .unwrap();
        assert!(report.changed.is_empty());
        assert!(report.restored.is_empty());
    }

    #[test]
    fn failed_commit_asks_the_log_to_restore_the_pass() {
        let (_r, _l, repository, local) = replicas();
        let name = FileName::from("todo.txt");
        repository.write(&name, b"A").unwrap();
        local.write(&name, b"A-edit").unwrap();
        let log = RecordingLog {
            refuse_commits: true,
            ..RecordingLog::default()
        };

        let err = push_local(&Unreachable, &log, &repository, &local, &[name]).unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(*log.restored.borrow(), vec!["todo.txt".to_string()]);
    }

    #[test]
    fn observe_without_remote_leaves_column_empty() {
        let (_r, _l, repository, local) = replicas();
        let name = FileName::from("todo.txt");
        repository.write(&name, b"A").unwrap();
        local.write(&name, b"A").unwrap();

        let files = observe(None, &repository, &local, &[name]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].remote, None);
        assert!(files[0].is_converged());
    }
}
