//! Domain types for the todosync reconciliation cycle.
//!
//! A cycle observes each tracked file in three replicas (remote store,
//! repository, local directory), collects the names that moved into a
//! [`ChangeSet`] per direction and reports the outcome as a [`CycleReport`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Base name of a tracked file, identical in all three replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(pub String);

impl FileName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FileName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a commit in the snapshot log (hex object id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Content digest of a replica's copy of a file.
///
/// Two digests are equal only for byte-identical content. `Absent` marks a
/// copy that does not exist and never equals a digest, not even the digest
/// of empty content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fingerprint {
    Absent,
    Digest(String),
}

impl Fingerprint {
    /// Wrap a hex digest reported by an external system, normalised to lowercase.
    pub fn from_hex(hex: &str) -> Self {
        Fingerprint::Digest(hex.trim().to_ascii_lowercase())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Fingerprint::Absent)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Absent => write!(f, "absent"),
            Fingerprint::Digest(hex) => write!(f, "{hex}"),
        }
    }
}

// ---------------------------------------------------------------------------
// TrackedFile
// ---------------------------------------------------------------------------

/// One tracked file as observed in each replica during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub name: FileName,
    /// `None` when the remote replica was not consulted.
    pub remote: Option<Fingerprint>,
    pub repository: Fingerprint,
    pub local: Fingerprint,
}

impl TrackedFile {
    /// True when every consulted replica holds the same content.
    pub fn is_converged(&self) -> bool {
        let remote_matches = self
            .remote
            .as_ref()
            .map(|remote| remote == &self.repository)
            .unwrap_or(true);
        remote_matches && self.local == self.repository
    }
}

// ---------------------------------------------------------------------------
// Direction and ChangeSet
// ---------------------------------------------------------------------------

/// Which replica a pass propagates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Remote → repository → local.
    FromRemote,
    /// Local → repository → remote.
    FromLocal,
}

impl Direction {
    /// Fixed commit message recorded for this direction.
    pub fn commit_message(self) -> &'static str {
        match self {
            Direction::FromRemote => "Push from mobile",
            Direction::FromLocal => "Push from local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::FromRemote => write!(f, "remote"),
            Direction::FromLocal => write!(f, "local"),
        }
    }
}

/// Ordered, duplicate-free set of files changed in one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(Vec<FileName>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`; returns `false` if it was already recorded.
    pub fn insert(&mut self, name: FileName) -> bool {
        if self.0.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &FileName) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileName> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FileName;
    type IntoIter = std::slice::Iter<'a, FileName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<FileName> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = FileName>>(iter: I) -> Self {
        let mut set = ChangeSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one directional pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub direction: Direction,
    pub changed: ChangeSet,
    /// Commit recording `changed`; `None` when nothing changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotId>,
    /// Local copies that were missing and got re-seeded from the repository.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restored: Vec<FileName>,
    /// Pulled files whose local copy carries its own edit and was left for the local pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kept_local: Vec<FileName>,
}

impl PassReport {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            changed: ChangeSet::new(),
            snapshot: None,
            restored: Vec::new(),
            kept_local: Vec::new(),
        }
    }
}

/// Outcome of one complete reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pass reports in execution order: remote first, then local.
    pub passes: Vec<PassReport>,
}

impl CycleReport {
    /// Number of commits created during the cycle.
    pub fn snapshots(&self) -> usize {
        self.passes.iter().filter(|p| p.snapshot.is_some()).count()
    }

    /// Total number of files propagated across both passes.
    pub fn changed(&self) -> usize {
        self.passes.iter().map(|p| p.changed.len()).sum()
    }

    pub fn pass(&self, direction: Direction) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.direction == direction)
    }

    pub fn is_noop(&self) -> bool {
        self.passes
            .iter()
            .all(|p| p.changed.is_empty() && p.restored.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
