//! Locally stored OAuth credentials and the stores that persist them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{DriveError, Result};
use crate::models::TokenResponse;

/// Google OAuth2 token endpoint.
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Full read/write Drive scope.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Readonly Drive scope.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Capability level granted to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    ReadOnly,
    ReadWrite,
}

impl Scope {
    pub fn url(self) -> &'static str {
        match self {
            Scope::ReadOnly => DRIVE_READONLY_SCOPE,
            Scope::ReadWrite => DRIVE_SCOPE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Scope::ReadOnly => "readonly",
            Scope::ReadWrite => "read-write",
        }
    }

    /// Derive the capability level from a granted scope list.
    pub fn from_granted<S: AsRef<str>>(scopes: &[S]) -> Option<Self> {
        if scopes.iter().any(|s| s.as_ref() == DRIVE_SCOPE) {
            Some(Scope::ReadWrite)
        } else if scopes.iter().any(|s| s.as_ref() == DRIVE_READONLY_SCOPE) {
            Some(Scope::ReadOnly)
        } else {
            None
        }
    }
}

/// OAuth user credentials as persisted in the credentials file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

impl Credentials {
    pub fn scope(&self) -> Option<Scope> {
        Scope::from_granted(&self.scopes)
    }

    /// Whether the access token must be renewed before use at `now`.
    ///
    /// Credentials without an expiry are treated as valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Fold a token endpoint response into these credentials.
    pub fn apply_token_response(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.access_token = response.access_token;
        self.expiry = response
            .expires_in
            .map(|secs| now + Duration::seconds(secs as i64));
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = response.scope {
            self.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
    }
}

/// Persistence for the single stored credential record.
pub trait CredentialStore: Send + Sync {
    /// Return the stored credentials, or `None` when nothing is stored.
    fn load(&self) -> Result<Option<Credentials>>;

    /// Replace the stored credentials.
    fn save(&self, credentials: &Credentials) -> Result<()>;

    /// Human-readable location, used in messages.
    fn location(&self) -> String;
}

/// Credentials stored as a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored credentials");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let credentials =
            serde_json::from_str(&content).map_err(|source| DriveError::CredentialsParseError {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(credentials))
    }

    /// Write to a temporary file beside the target, then rename it over the
    /// target. The temporary file is removed if any step fails.
    fn save(&self, credentials: &Credentials) -> Result<()> {
        let dir = self.parent_dir();
        create_private_dir(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        restrict_file_permissions(tmp.as_file())?;
        serde_json::to_writer_pretty(&mut tmp, credentials)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), "saved credentials");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(file: &fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file_permissions(_file: &fs::File) -> Result<()> {
    Ok(())
}

/// In-memory store, for tests and for callers that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
    saves: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credentials>> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.credentials.lock().unwrap_or_else(|e| e.into_inner()) = Some(credentials.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
