//! One handler per CLI verb.
//!
//! Handlers resolve references, obtain a client through the injected
//! [`Context`], issue one logical API operation and return rendered output.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::auth::{Access, AuthFlow, CredentialSource};
use crate::client::DriveClient;
use crate::config::ApiEndpoints;
use crate::credentials::{CredentialStore, Credentials, Scope};
use crate::error::{DriveError, Result};
use crate::oauth::{self, ClientSecret};
use crate::output::{self, OutputFormat, Record, UploadedFile};
use crate::url_parser::{resolve_file_id, resolve_folder_id};

/// Dependencies shared by every command handler.
pub struct Context {
    store: Box<dyn CredentialStore>,
    endpoints: ApiEndpoints,
    adc_path: Option<PathBuf>,
    http: Client,
}

impl Context {
    pub fn new(store: Box<dyn CredentialStore>) -> Self {
        Self {
            store,
            endpoints: ApiEndpoints::default(),
            adc_path: None,
            http: Client::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: ApiEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Enable the application default credentials fallback.
    pub fn with_adc_path(mut self, adc_path: Option<PathBuf>) -> Self {
        self.adc_path = adc_path;
        self
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub fn auth_flow(&self) -> AuthFlow<'_> {
        AuthFlow::new(self.store.as_ref(), self.adc_path.as_deref(), self.http.clone())
    }

    pub async fn ensure_client(&self, access: Access) -> Result<DriveClient> {
        self.auth_flow().ensure_client(access, &self.endpoints).await
    }
}

/// `ls`: list the children of a folder.
pub async fn list(
    ctx: &Context,
    folder: Option<&str>,
    format: OutputFormat,
    csv_path: Option<&Path>,
) -> Result<String> {
    let folder_id = resolve_folder_id(folder)?;
    if format == OutputFormat::Csv && csv_path.is_none() {
        return Err(DriveError::MissingOption("--csv-path"));
    }

    let client = ctx.ensure_client(Access::Read).await?;
    let files = client.list_files(&folder_id).await?;
    debug!(folder = %folder_id, count = files.len(), "listed folder");

    if files.is_empty() && format == OutputFormat::Table {
        return Ok("No files found.".to_string());
    }
    output::render(&files, format, csv_path)
}

/// `upload`: send one local file into a folder.
pub async fn upload(
    ctx: &Context,
    local_path: &Path,
    folder: Option<&str>,
    format: OutputFormat,
) -> Result<String> {
    if format == OutputFormat::Csv {
        return Err(DriveError::UnsupportedFormat {
            command: "upload",
            format: format.as_str(),
        });
    }
    if !local_path.is_file() {
        return Err(DriveError::FileNotFound(local_path.display().to_string()));
    }
    let folder_id = resolve_folder_id(folder)?;

    let client = ctx.ensure_client(Access::Write).await?;
    let created = client.upload_file(local_path, &folder_id).await?;

    output::render(&[UploadedFile(created)], format, None)
}

/// `download`: stream one file to disk.
///
/// Without `output_path`, or when it names an existing directory, the file
/// is saved under the last component of its remote name. Content is staged in a temporary file next to the destination and
/// renamed into place once complete.
pub async fn download(
    ctx: &Context,
    file: Option<&str>,
    output_path: Option<&Path>,
) -> Result<String> {
    let file = file.ok_or(DriveError::MissingOption("--file"))?;
    let file_id = resolve_file_id(file)?;

    let client = ctx.ensure_client(Access::Read).await?;
    let metadata = client.get_file(&file_id).await?;

    let destination = match output_path {
        Some(path) if path.is_dir() => path.join(local_file_name(&metadata.name, &file_id)),
        Some(path) => path.to_path_buf(),
        None => local_file_name(&metadata.name, &file_id),
    };
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let (staging, staging_path) = tempfile::NamedTempFile::new_in(&parent)?.into_parts();
    let mut staging = tokio::fs::File::from_std(staging);
    let written = client.download_to(&file_id, &mut staging).await?;
    drop(staging);
    staging_path.persist(&destination).map_err(|e| e.error)?;

    debug!(bytes = written, path = %destination.display(), "download complete");
    Ok(format!(
        "Downloaded {} to {}",
        metadata.name,
        destination.display()
    ))
}

/// Last component of a remote name, usable as a local file name.
///
/// Remote names may contain separators or `..`; only the final normal
/// component is kept, and the file ID stands in when there is none.
fn local_file_name(remote_name: &str, file_id: &str) -> PathBuf {
    match Path::new(remote_name).file_name() {
        Some(name) => PathBuf::from(name),
        None => PathBuf::from(file_id),
    }
}

/// `trash`: move one file to the trash.
pub async fn trash(ctx: &Context, file: Option<&str>) -> Result<String> {
    let file = file.ok_or(DriveError::MissingOption("--file"))?;
    let file_id = resolve_file_id(file)?;

    let client = ctx.ensure_client(Access::Write).await?;
    let item = client.trash_file(&file_id).await?;

    Ok(format!("Moved to trash: {} ({})", item.name, item.id))
}

/// `auth login`: run the browser flow and persist the result.
pub async fn login(
    ctx: &Context,
    client_secret: &Path,
    readonly: bool,
    launch_browser: bool,
) -> Result<String> {
    let secret = ClientSecret::from_file(client_secret)?;
    let scope = if readonly {
        Scope::ReadOnly
    } else {
        Scope::ReadWrite
    };

    let credentials = oauth::login(&ctx.http, &secret, scope, launch_browser).await?;
    ctx.store.save(&credentials)?;

    Ok(format!("Saved credentials to {}", ctx.store.location()))
}

/// Account details reported by `auth whoami`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account: String,
    pub display_name: String,
    pub scope: String,
    pub expiry: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub source: String,
}

impl Identity {
    fn new(user: crate::models::User, source: &CredentialSource, location: String) -> Self {
        let (scope, expiry, has_refresh_token, source) = match source {
            CredentialSource::Stored(credentials) => (
                describe_scope(credentials),
                credentials.expiry,
                credentials.has_refresh_token(),
                location,
            ),
            CredentialSource::ApplicationDefault(path) => (
                "application-default".to_string(),
                None,
                false,
                path.display().to_string(),
            ),
        };

        Self {
            account: user.email_address.unwrap_or_default(),
            display_name: user.display_name.unwrap_or_default(),
            scope,
            expiry,
            has_refresh_token,
            source,
        }
    }
}

fn describe_scope(credentials: &Credentials) -> String {
    match credentials.scope() {
        Some(scope) => scope.label().to_string(),
        None => credentials.scopes.join(","),
    }
}

impl Record for Identity {
    fn headers() -> &'static [&'static str] {
        &[
            "account",
            "displayName",
            "scope",
            "expiry",
            "hasRefreshToken",
            "source",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.account.clone(),
            self.display_name.clone(),
            self.scope.clone(),
            self.expiry.map(|e| e.to_rfc3339()).unwrap_or_default(),
            self.has_refresh_token.to_string(),
            self.source.clone(),
        ]
    }
}

/// `auth whoami`: one identity lookup against the API.
pub async fn whoami(ctx: &Context, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Csv {
        return Err(DriveError::UnsupportedFormat {
            command: "auth whoami",
            format: format.as_str(),
        });
    }

    let (auth, source) = ctx.auth_flow().authenticate(Access::Read, true).await?;
    let client = DriveClient::new(auth, ctx.endpoints.clone());
    let user = client.about_user().await?;

    let identity = Identity::new(user, &source, ctx.store.location());
    output::render(&[identity], format, None)
}

/// Outcome of one diagnostic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl CheckStatus {
    fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub check: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(check: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            check,
            status,
            detail: detail.into(),
        }
    }
}

impl Record for Check {
    fn headers() -> &'static [&'static str] {
        &["check", "status", "detail"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.check.to_string(),
            self.status.as_str().to_string(),
            self.detail.clone(),
        ]
    }
}

/// Result of `doctor`.
#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub checks: Vec<Check>,
}

impl DoctorReport {
    pub fn failures(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn render(&self) -> String {
        output::render_table(&self.checks)
    }
}

/// `doctor`: report on credentials and connectivity without changing any
/// stored state.
pub async fn doctor(ctx: &Context) -> DoctorReport {
    let mut checks = vec![
        Check::new("version", CheckStatus::Ok, env!("CARGO_PKG_VERSION")),
        Check::new("credentials-path", CheckStatus::Ok, ctx.store.location()),
    ];

    match ctx.store.load() {
        Ok(Some(credentials)) => {
            checks.push(Check::new(
                "stored-credentials",
                CheckStatus::Ok,
                format!(
                    "scope={}, refresh token: {}",
                    describe_scope(&credentials),
                    if credentials.has_refresh_token() { "yes" } else { "no" }
                ),
            ));
            checks.push(expiry_check(&credentials, Utc::now()));
        }
        Ok(None) => checks.push(Check::new(
            "stored-credentials",
            CheckStatus::Warn,
            format!(
                "not found at {} (ADC fallback may still work)",
                ctx.store.location()
            ),
        )),
        Err(e) => checks.push(Check::new(
            "stored-credentials",
            CheckStatus::Fail,
            e.to_string(),
        )),
    }

    checks.push(match &ctx.adc_path {
        Some(path) if path.is_file() => Check::new("adc", CheckStatus::Ok, path.display().to_string()),
        Some(path) => Check::new(
            "adc",
            CheckStatus::Warn,
            format!("{} does not exist", path.display()),
        ),
        None => Check::new("adc", CheckStatus::Warn, "no application default credentials"),
    });

    checks.push(connectivity_check(ctx).await);

    DoctorReport { checks }
}

fn expiry_check(credentials: &Credentials, now: DateTime<Utc>) -> Check {
    match credentials.expiry {
        None => Check::new("token-expiry", CheckStatus::Ok, "no expiry recorded"),
        Some(expiry) if !credentials.is_expired(now) => Check::new(
            "token-expiry",
            CheckStatus::Ok,
            format!("valid until {}", expiry.to_rfc3339()),
        ),
        Some(expiry) if credentials.has_refresh_token() => Check::new(
            "token-expiry",
            CheckStatus::Warn,
            format!(
                "expired at {}; will refresh on next command",
                expiry.to_rfc3339()
            ),
        ),
        Some(expiry) => Check::new(
            "token-expiry",
            CheckStatus::Fail,
            format!("expired at {} with no refresh token", expiry.to_rfc3339()),
        ),
    }
}

async fn probe_api(ctx: &Context) -> Result<usize> {
    let (client, _) = ctx.auth_flow().probe(Access::Read, &ctx.endpoints).await?;
    Ok(client.sample_files().await?.len())
}

async fn connectivity_check(ctx: &Context) -> Check {
    match probe_api(ctx).await {
        Ok(count) => Check::new(
            "api-connectivity",
            CheckStatus::Ok,
            format!("files.list succeeded ({} file(s) sampled)", count),
        ),
        Err(e) => Check::new("api-connectivity", CheckStatus::Fail, e.to_string()),
    }
}
