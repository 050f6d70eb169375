//! Content fingerprints.
//!
//! MD5 is what the remote store reports in its object metadata, so local
//! digests must use the same function for the comparison to mean anything.

use std::io::ErrorKind;
use std::path::Path;

use todosync_core::Fingerprint;

use crate::error::{io_err, SyncError};

/// Fingerprint of an in-memory blob.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::Digest(format!("{:x}", md5::compute(bytes)))
}

/// Fingerprint of the file at `path`, or [`Fingerprint::Absent`] if it does not exist.
pub fn fingerprint_of_path(path: &Path) -> Result<Fingerprint, SyncError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(fingerprint(&bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Fingerprint::Absent),
        Err(e) => Err(io_err(path, e)),
    }
}
