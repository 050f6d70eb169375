//! Google Drive v3 as a [`RemoteStore`].
//!
//! Objects are found by exact name anywhere in the user's Drive, excluding
//! the trash. Fingerprints come from the `md5Checksum` metadata field, which
//! matches the local MD5 digests byte for byte.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use todosync_core::{FileName, Fingerprint, Settings};
use todosync_sync::remote::{RemoteId, RemoteObject, RemoteStore};
use todosync_sync::SyncError;

use crate::auth::TokenSource;
use crate::error::DriveError;

pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com";

const LIST_FIELDS: &str = "nextPageToken, files(id, name)";
const METADATA_FIELDS: &str = "md5Checksum,size,version";

/// Authorized Drive v3 client.
pub struct DriveStore {
    agent: ureq::Agent,
    tokens: TokenSource,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Drive encodes int64 fields as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    md5_checksum: Option<String>,
    size: Option<String>,
    version: Option<String>,
}

impl DriveStore {
    pub fn new(tokens: TokenSource) -> Self {
        Self::with_base_url(tokens, DRIVE_BASE_URL)
    }

    /// Point at another host serving the Drive v3 paths.
    pub fn with_base_url(tokens: TokenSource, base_url: impl Into<String>) -> Self {
        Self {
            agent: crate::http_agent(),
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Load credentials and token from the paths `settings` resolves against `home`.
    pub fn from_settings_at(settings: &Settings, home: &Path) -> Result<Self, DriveError> {
        let tokens = TokenSource::load(
            &settings.credentials_path_at(home),
            &settings.token_path_at(home),
        )?;
        Ok(Self::new(tokens))
    }

    fn files_url(&self, id: &RemoteId) -> String {
        format!("{}/drive/v3/files/{}", self.base_url, id)
    }

    fn request(&self, method: &str, url: &str) -> Result<ureq::Request, DriveError> {
        Ok(self
            .agent
            .request(method, url)
            .set("Authorization", &self.tokens.authorization()?))
    }

    fn list(&self, names: &[FileName]) -> Result<Vec<RemoteObject>, DriveError> {
        let query = name_query(names);
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request("GET", &format!("{}/drive/v3/files", self.base_url))?
                .query("q", &query)
                .query("orderBy", "name")
                .query("fields", LIST_FIELDS);
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }
            let response = request
                .call()
                .map_err(|e| DriveError::from_ureq("files.list", e))?;
            let page: FileList = read_json(response, "files.list")?;

            objects.extend(page.files.into_iter().map(|f| RemoteObject {
                id: RemoteId(f.id),
                name: FileName(f.name),
            }));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    fn metadata(&self, object: &RemoteObject) -> Result<Fingerprint, DriveError> {
        let response = self
            .request("GET", &self.files_url(&object.id))?
            .query("fields", METADATA_FIELDS)
            .call()
            .map_err(|e| DriveError::from_ureq("files.get", e))?;
        let meta: FileMetadata = read_json(response, "files.get")?;
        tracing::debug!(
            file = %object.name,
            size = meta.size.as_deref().unwrap_or("-"),
            version = meta.version.as_deref().unwrap_or("-"),
            "remote metadata"
        );
        match meta.md5_checksum {
            Some(md5) => Ok(Fingerprint::from_hex(&md5)),
            None => Err(DriveError::Response {
                op: "files.get",
                message: format!(
                    "'{}' has no md5Checksum; only binary files can be synced",
                    object.name
                ),
            }),
        }
    }

    fn fetch(&self, object: &RemoteObject) -> Result<Vec<u8>, DriveError> {
        let response = self
            .request("GET", &self.files_url(&object.id))?
            .query("alt", "media")
            .call()
            .map_err(|e| DriveError::from_ureq("files.get media", e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| DriveError::Transport {
                op: "files.get media",
                message: e.to_string(),
            })?;
        Ok(bytes)
    }

    fn replace(&self, object: &RemoteObject, bytes: &[u8]) -> Result<(), DriveError> {
        let url = format!("{}/upload/drive/v3/files/{}", self.base_url, object.id);
        self.request("PATCH", &url)?
            .query("uploadType", "media")
            .set("Content-Type", "text/plain")
            .send_bytes(bytes)
            .map_err(|e| DriveError::from_ureq("files.update", e))?;
        Ok(())
    }
}

impl RemoteStore for DriveStore {
    fn list_by_name(&self, names: &[FileName]) -> Result<Vec<RemoteObject>, SyncError> {
        let objects = self
            .list(names)
            .map_err(|e| e.into_sync("list", describe(names)))?;
        if objects.is_empty() {
            return Err(SyncError::NoRemoteObjects {
                names: names.to_vec(),
            });
        }
        tracing::debug!(count = objects.len(), "listed remote objects");
        Ok(objects)
    }

    fn fingerprint_of(&self, object: &RemoteObject) -> Result<Fingerprint, SyncError> {
        self.metadata(object)
            .map_err(|e| e.into_sync("fingerprint", object.name.as_str()))
    }

    fn download(&self, object: &RemoteObject) -> Result<Vec<u8>, SyncError> {
        let bytes = self
            .fetch(object)
            .map_err(|e| e.into_sync("download", object.name.as_str()))?;
        tracing::debug!(file = %object.name, bytes = bytes.len(), "downloaded");
        Ok(bytes)
    }

    fn upload(&self, object: &RemoteObject, bytes: &[u8]) -> Result<(), SyncError> {
        self.replace(object, bytes)
            .map_err(|e| e.into_sync("upload", object.name.as_str()))
    }
}

/// `(name = 'a' or name = 'b') and trashed = false`
pub fn name_query(names: &[FileName]) -> String {
    let clauses: Vec<String> = names
        .iter()
        .map(|name| format!("name = '{}'", escape(name.as_str())))
        .collect();
    format!("({}) and trashed = false", clauses.join(" or "))
}

/// Escape a literal for a Drive query string.
fn escape(literal: &str) -> String {
    literal.replace('\\', "\\\\").replace('\'', "\\'")
}

fn describe(names: &[FileName]) -> String {
    names
        .iter()
        .map(FileName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_json<T: serde::de::DeserializeOwned>(
    response: ureq::Response,
    op: &'static str,
) -> Result<T, DriveError> {
    let body = response
        .into_string()
        .map_err(|e| DriveError::Transport {
            op,
            message: e.to_string(),
        })?;
    serde_json::from_str(&body).map_err(|source| DriveError::Json {
        context: op.to_string(),
        source,
    })
}
