//! Whole-file access to a replica directory.
//!
//! ## `write`: atomic replace
//!
//! 1. Write the bytes to a hidden temporary file beside the target.
//! 2. Persist it over the target (a rename, atomic on POSIX).
//! 3. If persisting fails the temporary file is dropped and the original kept.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use todosync_core::{FileName, Fingerprint};

use crate::error::{io_err, SyncError};
use crate::fingerprint::fingerprint_of_path;

/// A pre-existing directory holding one copy of every tracked file.
#[derive(Debug, Clone)]
pub struct Replica {
    label: &'static str,
    root: PathBuf,
}

impl Replica {
    /// Open the replica rooted at `root`; the directory must already exist.
    pub fn open(label: &'static str, root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(Self { label, root }),
            Ok(_) => Err(io_err(
                &root,
                std::io::Error::other("replica root is not a directory"),
            )),
            Err(e) => Err(io_err(&root, e)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &FileName) -> PathBuf {
        self.root.join(name.as_str())
    }

    pub fn fingerprint(&self, name: &FileName) -> Result<Fingerprint, SyncError> {
        fingerprint_of_path(&self.path(name))
    }

    /// Whole-file content, or `None` when the file does not exist.
    pub fn read(&self, name: &FileName) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Whole-file content of a file that must exist.
    pub fn read_existing(&self, name: &FileName) -> Result<Vec<u8>, SyncError> {
        let path = self.path(name);
        std::fs::read(&path).map_err(|e| io_err(&path, e))
    }

    /// Replace (or create) the file with `bytes`.
    pub fn write(&self, name: &FileName, bytes: &[u8]) -> Result<(), SyncError> {
        let path = self.path(name);
        write_atomic(&path, bytes)?;
        tracing::debug!("wrote {} copy: {}", self.label, path.display());
        Ok(())
    }

    /// Overwrite `other`'s copy of `name` with this replica's copy.
    pub fn copy_to(&self, name: &FileName, other: &Replica) -> Result<(), SyncError> {
        let bytes = self.read_existing(name)?;
        other.write(name, &bytes)?;
        tracing::info!("copied {} from {} to {}", name, self.label, other.label);
        Ok(())
    }
}

/// Replace `path` with `bytes` through a temporary file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".todosync-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| io_err(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn todo() -> FileName {
        FileName::from("todo.txt")
    }

    #[test]
    fn open_requires_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let err = Replica::open("local", tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));

        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(Replica::open("local", &file).is_err());
    }

    #[test]
    fn read_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let replica = Replica::open("local", tmp.path()).unwrap();
        assert_eq!(replica.read(&todo()).unwrap(), None);
        assert!(replica.fingerprint(&todo()).unwrap().is_absent());
        assert!(replica.read_existing(&todo()).is_err());
    }

    #[test]
    fn write_creates_then_truncates() {
        let tmp = TempDir::new().unwrap();
        let replica = Replica::open("local", tmp.path()).unwrap();

        replica.write(&todo(), b"a much longer first version\n").unwrap();
        replica.write(&todo(), b"short\n").unwrap();

        assert_eq!(fs::read(replica.path(&todo())).unwrap(), b"short\n");
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn no_temporary_file_left_after_write() {
        let tmp = TempDir::new().unwrap();
        let replica = Replica::open("local", tmp.path()).unwrap();
        replica.write(&todo(), b"data").unwrap();
        assert_eq!(entries(tmp.path()), vec!["todo.txt"]);
    }

    #[test]
    fn copy_to_overwrites_other_replica() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let repo = Replica::open("repository", a.path()).unwrap();
        let local = Replica::open("local", b.path()).unwrap();

        repo.write(&todo(), b"from repo").unwrap();
        local.write(&todo(), b"stale").unwrap();
        repo.copy_to(&todo(), &local).unwrap();

        assert_eq!(local.read(&todo()).unwrap().unwrap(), b"from repo");
        assert_eq!(
            local.fingerprint(&todo()).unwrap(),
            repo.fingerprint(&todo()).unwrap()
        );
    }

    #[test]
    fn failed_replace_keeps_target_and_leaves_no_temporary_file() {
        let tmp = TempDir::new().unwrap();
        let replica = Replica::open("repository", tmp.path()).unwrap();

        // A non-empty directory cannot be replaced by a file.
        let blocked = replica.path(&todo());
        fs::create_dir_all(&blocked).unwrap();
        fs::write(blocked.join("keep"), "original").unwrap();

        let err = replica.write(&todo(), b"new content").unwrap_err();

        assert!(matches!(err, SyncError::Io { .. }), "got: {err}");
        assert_eq!(fs::read_to_string(blocked.join("keep")).unwrap(), "original");
        assert_eq!(entries(tmp.path()), vec!["todo.txt"]);
    }
}
