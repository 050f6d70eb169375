//! OAuth 2.0 installed-app flow against Google's endpoints.
//!
//! The client secret (`credentials.json`) is downloaded from the Google Cloud
//! console and only ever read. The token (`token.json`) is written by
//! `todosync auth` and rewritten on every refresh, always with mode 0600.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DriveError};

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Used when the client secret lists no redirect URI.
const OOB_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// OAuth client secret of a desktop or web client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<Credentials>,
    web: Option<Credentials>,
}

impl Credentials {
    /// Parse the console download; the `installed` section wins over `web`.
    pub fn parse(json: &str, context: &str) -> Result<Self, DriveError> {
        let file: CredentialsFile =
            serde_json::from_str(json).map_err(|source| DriveError::Json {
                context: context.to_string(),
                source,
            })?;
        file.installed.or(file.web).ok_or_else(|| {
            DriveError::Credentials(format!(
                "{context} has neither an 'installed' nor a 'web' client section"
            ))
        })
    }

    pub fn load(path: &Path) -> Result<Self, DriveError> {
        let json = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::parse(&json, &path.display().to_string())
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(OOB_REDIRECT)
    }

    /// URL the user opens to grant offline access to `scope`.
    pub fn authorize_url(&self, scope: &str) -> String {
        crate::http_agent()
            .get(&self.auth_uri)
            .query("access_type", "offline")
            .query("client_id", &self.client_id)
            .query("redirect_uri", self.redirect_uri())
            .query("response_type", "code")
            .query("scope", scope)
            .query("state", "state-token")
            .url()
            .to_string()
    }

    /// Trade the code pasted back by the user for a token.
    pub fn exchange_code(&self, code: &str) -> Result<Token, DriveError> {
        let response = crate::http_agent()
            .post(&self.token_uri)
            .send_form(&[
                ("code", code.trim()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("grant_type", "authorization_code"),
            ])
            .map_err(|e| DriveError::from_ureq("token exchange", e))?;
        let granted = TokenResponse::read(response, "token exchange")?;
        if granted.refresh_token.is_none() {
            return Err(DriveError::Credentials(
                "no refresh token granted; revoke the app's access and authorize again".into(),
            ));
        }
        Ok(granted.into_token(None, Utc::now()))
    }

    fn refresh(&self, token: &Token) -> Result<Token, DriveError> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            DriveError::Credentials("token has no refresh token; run `todosync auth`".into())
        })?;
        let response = crate::http_agent()
            .post(&self.token_uri)
            .send_form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| DriveError::from_ureq("token refresh", e))?;
        let granted = TokenResponse::read(response, "token refresh")?;
        Ok(granted.into_token(token.refresh_token.clone(), Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Cached access and refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl Token {
    /// True when the token is expired or expires within the refresh margin.
    /// A token without an expiry never needs refreshing.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }

    pub fn load(path: &Path) -> Result<Self, DriveError> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriveError::Credentials(format!(
                    "no token at {}; run `todosync auth` first",
                    path.display()
                )))
            }
            Err(e) => return Err(io_err(path, e)),
        };
        serde_json::from_str(&json).map_err(|source| DriveError::Json {
            context: path.display().to_string(),
            source,
        })
    }

    /// Atomically write the token: tmp sibling, `chmod 0600`, rename.
    pub fn save(&self, path: &Path) -> Result<(), DriveError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| DriveError::Json {
            context: path.display().to_string(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| io_err(&tmp_path, e))?;
        set_private(&tmp_path)?;
        std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_private(path: &Path) -> Result<(), DriveError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_private(_path: &Path) -> Result<(), DriveError> {
    Ok(())
}

/// Body of a successful token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn read(response: ureq::Response, op: &'static str) -> Result<Self, DriveError> {
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

    /// A refresh response may omit the refresh token; `previous` fills it in.
    fn into_token(self, previous: Option<String>, now: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(bearer),
            refresh_token: self.refresh_token.or(previous),
            expiry: self.expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenSource
// ---------------------------------------------------------------------------

/// Hands out a valid access token, refreshing and persisting it as needed.
pub struct TokenSource {
    credentials: Credentials,
    path: PathBuf,
    token: Mutex<Token>,
}

impl TokenSource {
    pub fn new(credentials: Credentials, token: Token, path: impl Into<PathBuf>) -> Self {
        Self {
            credentials,
            path: path.into(),
            token: Mutex::new(token),
        }
    }

    /// Load both files.
    pub fn load(credentials: &Path, token: &Path) -> Result<Self, DriveError> {
        Ok(Self::new(
            Credentials::load(credentials)?,
            Token::load(token)?,
            token,
        ))
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> Result<String, DriveError> {
        let mut token = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if token.needs_refresh(Utc::now()) {
            tracing::info!(path = %self.path.display(), "refreshing access token");
            let fresh = self.credentials.refresh(&token)?;
            fresh.save(&self.path)?;
            *token = fresh;
        }
        Ok(format!("{} {}", token.token_type, token.access_token))
    }
}
