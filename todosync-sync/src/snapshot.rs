//! Snapshot log seam and its git implementation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use git2::{Commit, ErrorCode, Repository, Signature};

use todosync_core::{Author, ChangeSet, FileName, SnapshotId};

use crate::error::{git_err, io_err, SyncError};
use crate::replica::write_atomic;

/// Append-only record of propagated changes.
pub trait SnapshotLog {
    /// Record every file in `changes` as one snapshot.
    ///
    /// Returns `Ok(None)` without touching the log when `changes` is empty.
    fn commit(&self, changes: &ChangeSet, message: &str) -> Result<Option<SnapshotId>, SyncError>;

    /// Put every file in `names` back to its content in the latest snapshot.
    ///
    /// A file the latest snapshot does not contain is removed.
    fn restore(&self, names: &ChangeSet) -> Result<(), SyncError>;
}

/// Commits into an existing git working tree with a fixed author identity.
#[derive(Debug, Clone)]
pub struct GitLog {
    root: PathBuf,
    author: Author,
}

impl GitLog {
    pub fn new(root: impl Into<PathBuf>, author: Author) -> Self {
        Self {
            root: root.into(),
            author,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository, SyncError> {
        Repository::open(&self.root).map_err(|source| SyncError::Repository {
            path: self.root.clone(),
            source,
        })
    }
}

impl SnapshotLog for GitLog {
    fn commit(&self, changes: &ChangeSet, message: &str) -> Result<Option<SnapshotId>, SyncError> {
        if changes.is_empty() {
            return Ok(None);
        }

        let repo = self.open()?;
        let mut index = repo.index().map_err(git_err("open index"))?;

        for name in changes {
            let relative = Path::new(name.as_str());
            let full = self.root.join(relative);
            if !full.is_file() {
                return Err(SyncError::MissingStagedFile { path: full });
            }
            index.add_path(relative).map_err(git_err("add"))?;
            tracing::info!("staged {}", name);
        }
        index.write().map_err(git_err("write index"))?;

        let tree_id = index.write_tree().map_err(git_err("write tree"))?;
        let tree = repo.find_tree(tree_id).map_err(git_err("find tree"))?;
        let signature = Signature::now(&self.author.name, &self.author.email)
            .map_err(git_err("signature"))?;

        let parent = head_commit(&repo)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &parents,
            )
            .map_err(git_err("commit"))?;

        tracing::info!("committed {} file(s) as {}: {}", changes.len(), oid, message);
        Ok(Some(SnapshotId(oid.to_string())))
    }

    fn restore(&self, names: &ChangeSet) -> Result<(), SyncError> {
        if names.is_empty() {
            return Ok(());
        }

        let repo = self.open()?;
        let head = head_commit(&repo)?;
        let tree = match &head {
            Some(commit) => Some(commit.tree().map_err(git_err("read HEAD tree"))?),
            None => None,
        };

        // Working tree before index.
        for name in names {
            let full = self.root.join(name.as_str());
            let entry = tree
                .as_ref()
                .and_then(|t| t.get_path(Path::new(name.as_str())).ok());
            match entry {
                Some(entry) => {
                    let blob = repo.find_blob(entry.id()).map_err(git_err("find blob"))?;
                    write_atomic(&full, blob.content())?;
                }
                None => remove_if_present(&full)?,
            }
            tracing::info!("restored {} to its committed copy", name);
        }

        let paths: Vec<&str> = names.iter().map(FileName::as_str).collect();
        repo.reset_default(head.as_ref().map(|c| c.as_object()), paths)
            .map_err(git_err("reset index"))?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// The commit `HEAD` points at, or `None` on an unborn branch.
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, SyncError> {
    match repo.head() {
        Ok(head) => head
            .peel_to_commit()
            .map(Some)
            .map_err(git_err("resolve HEAD")),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(SyncError::Git {
            op: "resolve HEAD",
            source: e,
        }),
    }
}
