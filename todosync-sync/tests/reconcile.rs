//! Reconciliation cycle behaviour across all three replicas.
//!
//! The remote replica is an in-memory store; the repository is a real git
//! working tree in a `TempDir`; the local replica is a plain `TempDir`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use git2::Repository;
use tempfile::TempDir;
use todosync_core::{Author, ChangeSet, CycleReport, Direction, FileName, Fingerprint};
use todosync_sync::{
    fingerprint::fingerprint,
    reconcile,
    remote::{RemoteId, RemoteObject, RemoteStore},
    GitLog, Replica, SnapshotLog, SyncError,
};

// ---------------------------------------------------------------------------
// In-memory remote store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
    uploads: Mutex<Vec<String>>,
    fail_uploads: Mutex<bool>,
    fail_download_of: Mutex<Option<String>>,
}

impl MemoryStore {
    fn with(files: &[(&str, &str)]) -> Self {
        let store = MemoryStore::default();
        for (name, content) in files {
            store.put(name, content);
        }
        store
    }

    fn put(&self, name: &str, content: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), content.as_bytes().to_vec());
    }

    fn content(&self, name: &str) -> String {
        let objects = self.objects.lock().unwrap();
        String::from_utf8(objects.get(name).cloned().unwrap_or_default()).unwrap()
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

impl RemoteStore for MemoryStore {
    fn list_by_name(&self, names: &[FileName]) -> Result<Vec<RemoteObject>, SyncError> {
        let objects = self.objects.lock().unwrap();
        let found: Vec<_> = objects
            .keys()
            .filter(|key| names.iter().any(|n| n.as_str() == key.as_str()))
            .map(|key| RemoteObject {
                id: RemoteId::from(format!("id-{key}")),
                name: FileName::from(key.as_str()),
            })
            .collect();
        if found.is_empty() {
            return Err(SyncError::NoRemoteObjects {
                names: names.to_vec(),
            });
        }
        Ok(found)
    }

    fn fingerprint_of(&self, object: &RemoteObject) -> Result<Fingerprint, SyncError> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(object.name.as_str())
            .map(|bytes| fingerprint(bytes))
            .ok_or_else(|| SyncError::RemoteObjectMissing {
                name: object.name.clone(),
            })
    }

    fn download(&self, object: &RemoteObject) -> Result<Vec<u8>, SyncError> {
        if self.fail_download_of.lock().unwrap().as_deref() == Some(object.name.as_str()) {
            return Err(SyncError::Remote {
                op: "download",
                target: object.name.0.clone(),
                retryable: true,
                source: "503 Service Unavailable".into(),
            });
        }
        self.downloads.lock().unwrap().push(object.name.0.clone());
        let objects = self.objects.lock().unwrap();
        objects
            .get(object.name.as_str())
            .cloned()
            .ok_or_else(|| SyncError::RemoteObjectMissing {
                name: object.name.clone(),
            })
    }

    fn upload(&self, object: &RemoteObject, bytes: &[u8]) -> Result<(), SyncError> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(SyncError::Remote {
                op: "upload",
                target: object.name.0.clone(),
                retryable: true,
                source: "connection reset".into(),
            });
        }
        self.uploads.lock().unwrap().push(object.name.0.clone());
        self.objects
            .lock()
            .unwrap()
            .insert(object.name.0.clone(), bytes.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    _repo_dir: TempDir,
    _local_dir: TempDir,
    repository: Replica,
    local: Replica,
    log: GitLog,
    tracked: Vec<FileName>,
}

impl Fixture {
    /// Repository and local directory both holding `files`, committed once.
    fn new(files: &[(&str, &str)]) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let repo_dir = TempDir::new().expect("repo dir");
        let local_dir = TempDir::new().expect("local dir");
        Repository::init(repo_dir.path()).expect("git init");

        let repository = Replica::open("repository", repo_dir.path()).expect("repository");
        let local = Replica::open("local", local_dir.path()).expect("local");
        let log = GitLog::new(repo_dir.path(), Author::default());

        let mut seed = ChangeSet::new();
        for (name, content) in files {
            let name = FileName::from(*name);
            repository.write(&name, content.as_bytes()).unwrap();
            local.write(&name, content.as_bytes()).unwrap();
            seed.insert(name);
        }
        log.commit(&seed, "seed").expect("seed commit");

        Fixture {
            _repo_dir: repo_dir,
            _local_dir: local_dir,
            repository,
            local,
            log,
            tracked: vec![FileName::from("done.txt"), FileName::from("todo.txt")],
        }
    }

    fn cycle(&self, store: &MemoryStore) -> Result<CycleReport, SyncError> {
        reconcile(store, &self.log, &self.repository, &self.local, &self.tracked)
    }

    fn repo(&self, name: &str) -> String {
        read(&self.repository.path(&FileName::from(name)))
    }

    fn local(&self, name: &str) -> String {
        read(&self.local.path(&FileName::from(name)))
    }

    fn set_local(&self, name: &str, content: &str) {
        fs::write(self.local.path(&FileName::from(name)), content).unwrap();
    }

    fn index_lock(&self) -> std::path::PathBuf {
        self.repository.root().join(".git").join("index.lock")
    }

    fn commits(&self) -> Vec<String> {
        let repo = Repository::open(self.repository.root()).unwrap();
        let mut walk = repo.revwalk().unwrap();
        walk.push_head().unwrap();
        walk.map(|oid| {
            let commit = repo.find_commit(oid.unwrap()).unwrap();
            commit.message().unwrap_or_default().to_string()
        })
        .collect()
    }

    fn head_paths(&self) -> Vec<String> {
        let repo = Repository::open(self.repository.root()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        let parent_tree = head.parent(0).ok().map(|p| p.tree().unwrap());
        let diff = repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&head.tree().unwrap()), None)
            .unwrap();
        diff.deltas()
            .filter_map(|d| d.new_file().path().map(|p| p.display().to_string()))
            .collect()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn unchanged_replicas_create_no_snapshot_and_no_remote_writes() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);

    let report = fx.cycle(&store).expect("cycle");

    assert_eq!(report.snapshots(), 0);
    assert!(report.is_noop());
    assert_eq!(store.upload_count(), 0);
    assert_eq!(store.download_count(), 0);
    assert_eq!(fx.commits().len(), 1, "only the seed commit");
}

#[test]
fn remote_edit_reaches_repository_and_local_in_one_snapshot() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A2"), ("done.txt", "B")]);

    let report = fx.cycle(&store).expect("cycle");

    let pulled = report.pass(Direction::FromRemote).unwrap();
    let names: Vec<_> = pulled.changed.iter().map(FileName::as_str).collect();
    assert_eq!(names, vec!["todo.txt"]);
    assert!(pulled.snapshot.is_some());
    assert!(report.pass(Direction::FromLocal).unwrap().changed.is_empty());

    assert_eq!(fx.repo("todo.txt"), "A2");
    assert_eq!(fx.local("todo.txt"), "A2");
    assert_eq!(fx.repo("done.txt"), "B");
    assert_eq!(store.download_count(), 1, "unchanged done.txt is never downloaded");
    assert_eq!(store.upload_count(), 0);

    assert_eq!(report.snapshots(), 1);
    assert_eq!(fx.commits()[0], "Push from mobile");
    assert_eq!(fx.head_paths(), vec!["todo.txt"]);
}

#[test]
fn local_edit_reaches_repository_and_remote_in_one_snapshot() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);
    fx.set_local("done.txt", "B\nC");

    let report = fx.cycle(&store).expect("cycle");

    assert_eq!(report.snapshots(), 1);
    assert_eq!(fx.commits()[0], "Push from local");
    assert_eq!(fx.repo("done.txt"), "B\nC");
    assert_eq!(store.content("done.txt"), "B\nC");
    assert_eq!(store.upload_count(), 1);
    assert_eq!(store.content("todo.txt"), "A");
}

#[test]
fn second_cycle_after_convergence_is_a_noop() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A2"), ("done.txt", "B")]);
    fx.set_local("done.txt", "B2");

    let first = fx.cycle(&store).expect("first cycle");
    assert_eq!(first.snapshots(), 2);
    let commits_after_first = fx.commits().len();

    let second = fx.cycle(&store).expect("second cycle");
    assert!(second.is_noop());
    assert_eq!(second.snapshots(), 0);
    assert_eq!(fx.commits().len(), commits_after_first);
}

#[test]
fn local_wins_when_both_sides_edit_the_same_file() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A-remote"), ("done.txt", "B")]);
    fx.set_local("todo.txt", "A-local");

    let report = fx.cycle(&store).expect("cycle");

    assert_eq!(report.snapshots(), 2, "one snapshot per pass");
    assert_eq!(
        report.pass(Direction::FromRemote).unwrap().kept_local,
        vec![FileName::from("todo.txt")]
    );
    assert_eq!(fx.repo("todo.txt"), "A-local");
    assert_eq!(fx.local("todo.txt"), "A-local");
    assert_eq!(store.content("todo.txt"), "A-local");

    let commits = fx.commits();
    assert_eq!(commits[0], "Push from local");
    assert_eq!(commits[1], "Push from mobile");
}

#[test]
fn passes_run_remote_first_then_local() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);

    let report = fx.cycle(&store).expect("cycle");

    let order: Vec<_> = report.passes.iter().map(|p| p.direction).collect();
    assert_eq!(order, vec![Direction::FromRemote, Direction::FromLocal]);
    assert!(report.started_at <= report.finished_at);
}

#[test]
fn missing_repository_copy_is_pulled_from_remote() {
    let fx = Fixture::new(&[("todo.txt", "A")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);

    let report = fx.cycle(&store).expect("cycle");

    let pulled = report.pass(Direction::FromRemote).unwrap();
    assert!(pulled.changed.contains(&FileName::from("done.txt")));
    assert_eq!(fx.repo("done.txt"), "B");
    assert_eq!(fx.local("done.txt"), "B");
    assert_eq!(report.snapshots(), 1);
}

#[test]
fn new_local_file_is_committed_and_uploaded() {
    let fx = Fixture::new(&[("todo.txt", "A")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "")]);
    // Remote done.txt is empty, repository has none: pass 1 pulls the empty file.
    fx.set_local("done.txt", "finished");

    let report = fx.cycle(&store).expect("cycle");

    assert_eq!(report.snapshots(), 2);
    assert_eq!(fx.repo("done.txt"), "finished");
    assert_eq!(store.content("done.txt"), "finished");
}

#[test]
fn missing_local_copy_is_restored_without_snapshot() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);
    fs::remove_file(fx.local.path(&FileName::from("todo.txt"))).unwrap();

    let report = fx.cycle(&store).expect("cycle");

    assert_eq!(report.snapshots(), 0);
    assert_eq!(
        report.pass(Direction::FromLocal).unwrap().restored,
        vec![FileName::from("todo.txt")]
    );
    assert_eq!(fx.local("todo.txt"), "A");
    assert_eq!(store.upload_count(), 0);
}

#[test]
fn empty_remote_listing_is_fatal_and_touches_nothing() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::default();
    fx.set_local("todo.txt", "edited");

    let err = fx.cycle(&store).unwrap_err();

    assert!(matches!(err, SyncError::NoRemoteObjects { .. }), "got: {err}");
    assert!(!err.is_retryable());
    assert_eq!(fx.repo("todo.txt"), "A");
    assert_eq!(fx.commits().len(), 1);
}

#[test]
fn failed_upload_keeps_commit_and_next_cycle_finishes_the_work() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);
    fx.set_local("todo.txt", "A-local");
    *store.fail_uploads.lock().unwrap() = true;

    let err = fx.cycle(&store).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(fx.commits()[0], "Push from local", "commit is not rolled back");
    assert_eq!(store.content("todo.txt"), "A");

    // Repository and local now agree, remote still holds "A": the next cycle
    // sees remote != repository and pulls it back, which is the documented
    // fingerprint-only behaviour. The local edit survives in history.
    *store.fail_uploads.lock().unwrap() = false;
    let report = fx.cycle(&store).expect("retry cycle");
    assert_eq!(report.snapshots(), 1);
    assert_eq!(fx.repo("todo.txt"), store.content("todo.txt"));
    assert_eq!(fx.local("todo.txt"), store.content("todo.txt"));
}

#[test]
fn failed_download_leaves_repository_untouched_and_retry_delivers_both_edits() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A-remote"), ("done.txt", "B-remote")]);
    // done.txt is listed first and downloads fine; todo.txt fails.
    *store.fail_download_of.lock().unwrap() = Some("todo.txt".to_string());

    let err = fx.cycle(&store).unwrap_err();

    assert!(err.is_retryable(), "got: {err}");
    assert_eq!(fx.repo("done.txt"), "B");
    assert_eq!(fx.repo("todo.txt"), "A");
    assert_eq!(fx.local("done.txt"), "B");
    assert_eq!(fx.commits().len(), 1);

    *store.fail_download_of.lock().unwrap() = None;
    let report = fx.cycle(&store).expect("retry cycle");

    assert_eq!(report.snapshots(), 1);
    assert_eq!(fx.commits()[0], "Push from mobile");
    for (name, content) in [("done.txt", "B-remote"), ("todo.txt", "A-remote")] {
        assert_eq!(fx.repo(name), content);
        assert_eq!(fx.local(name), content);
        assert_eq!(store.content(name), content);
    }
    assert_eq!(store.upload_count(), 0);
}

#[test]
fn failed_commit_restores_repository_and_retry_pushes_local_edit() {
    let fx = Fixture::new(&[("todo.txt", "A"), ("done.txt", "B")]);
    let store = MemoryStore::with(&[("todo.txt", "A"), ("done.txt", "B")]);
    fx.set_local("todo.txt", "A-local-edit");
    fs::write(fx.index_lock(), "").unwrap();

    let err = fx.cycle(&store).unwrap_err();

    assert!(matches!(err, SyncError::Git { .. }), "got: {err}");
    assert!(err.is_retryable());
    assert_eq!(fx.repo("todo.txt"), "A", "repository holds the committed copy");
    assert_eq!(fx.local("todo.txt"), "A-local-edit");
    assert_eq!(fx.commits().len(), 1);
    assert_eq!(store.upload_count(), 0);

    fs::remove_file(fx.index_lock()).unwrap();
    let report = fx.cycle(&store).expect("retry cycle");

    assert_eq!(report.snapshots(), 1);
    assert_eq!(fx.commits()[0], "Push from local");
    assert_eq!(fx.repo("todo.txt"), "A-local-edit");
    assert_eq!(fx.local("todo.txt"), "A-local-edit");
    assert_eq!(store.content("todo.txt"), "A-local-edit");
}
