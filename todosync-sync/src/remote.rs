//! Remote object store seam.
//!
//! The store is keyed by file name. Objects must already exist remotely:
//! nothing here creates, moves or deletes them.

use std::fmt;

use todosync_core::{FileName, Fingerprint};

use crate::error::SyncError;

/// Opaque object id assigned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Store-assigned object identifier plus its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: RemoteId,
    pub name: FileName,
}

/// Whole-object access to the remote replica.
pub trait RemoteStore {
    /// Objects whose name is one of `names`, ordered by name.
    ///
    /// Implementations return [`SyncError::NoRemoteObjects`] when nothing matches.
    fn list_by_name(&self, names: &[FileName]) -> Result<Vec<RemoteObject>, SyncError>;

    /// Content fingerprint from metadata only, without downloading content.
    fn fingerprint_of(&self, object: &RemoteObject) -> Result<Fingerprint, SyncError>;

    fn download(&self, object: &RemoteObject) -> Result<Vec<u8>, SyncError>;

    /// Replace the object's content in place, keeping its name and location.
    fn upload(&self, object: &RemoteObject, bytes: &[u8]) -> Result<(), SyncError>;

    /// The object named exactly `name`.
    fn find_by_name(&self, name: &FileName) -> Result<RemoteObject, SyncError> {
        let listed = match self.list_by_name(std::slice::from_ref(name)) {
            Ok(listed) => listed,
            Err(SyncError::NoRemoteObjects { .. }) => Vec::new(),
            Err(err) => return Err(err),
        };
        listed
            .into_iter()
            .find(|object| &object.name == name)
            .ok_or_else(|| SyncError::RemoteObjectMissing { name: name.clone() })
    }
}
