//! Access token acquisition for Google APIs.
//!
//! Stored OAuth user credentials are preferred. When none exist, application
//! default credentials (an authorized-user or service-account file) are used
//! without persisting anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::DriveClient;
use crate::config::ApiEndpoints;
use crate::credentials::{CredentialStore, Credentials, Scope, DRIVE_SCOPE, TOKEN_URI};
use crate::error::{DriveError, Result};
use crate::models::{AdcFile, ServiceAccountCredentials, TokenErrorResponse, TokenResponse};

/// Access level a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn scope(self) -> Scope {
        match self {
            Access::Read => Scope::ReadOnly,
            Access::Write => Scope::ReadWrite,
        }
    }
}

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,   // Issuer (service account email)
    scope: String, // OAuth scope
    aud: String,   // Audience (token endpoint)
    exp: u64,      // Expiration time
    iat: u64,      // Issued at
}

/// Everything needed to exchange a refresh token for an access token.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: String,
    pub token_uri: String,
}

impl RefreshGrant {
    /// Build a grant from stored credentials, if they carry a refresh token
    /// and a client ID.
    pub fn from_credentials(credentials: &Credentials) -> Option<Self> {
        let refresh_token = credentials.refresh_token.clone().filter(|t| !t.is_empty())?;
        let client_id = credentials.client_id.clone()?;
        Some(Self {
            client_id,
            client_secret: credentials.client_secret.clone(),
            refresh_token,
            token_uri: credentials.token_uri.clone(),
        })
    }
}

/// Exchange a refresh token for a new access token. One attempt, no retry.
pub async fn refresh_access_token(http: &Client, grant: &RefreshGrant) -> Result<TokenResponse> {
    let mut params = vec![
        ("grant_type", "refresh_token"),
        ("client_id", grant.client_id.as_str()),
        ("refresh_token", grant.refresh_token.as_str()),
    ];
    if let Some(secret) = grant.client_secret.as_deref() {
        params.push(("client_secret", secret));
    }

    debug!(token_uri = %grant.token_uri, "refreshing access token");
    let response = http.post(&grant.token_uri).form(&params).send().await?;
    token_response(response).await
}

/// Decode a token endpoint response, mapping OAuth error bodies to
/// [`DriveError::TokenRefreshError`].
pub(crate) async fn token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => format!("Status {}: {}", status, body),
        };
        return Err(DriveError::TokenRefreshError(message));
    }

    Ok(response.json().await?)
}

/// Cached access token with expiration.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<SystemTime>,
}

/// Where new access tokens come from once the cached one runs out.
#[derive(Clone)]
enum TokenSource {
    /// A fixed token with no way to renew it.
    Fixed,
    RefreshToken(RefreshGrant),
    ServiceAccount {
        credentials: Arc<ServiceAccountCredentials>,
        scope: &'static str,
    },
}

/// Authenticator for Google APIs.
#[derive(Clone)]
pub struct Authenticator {
    source: TokenSource,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl Authenticator {
    fn with_source(source: TokenSource, client: Client, cached: Option<CachedToken>) -> Self {
        Self {
            source,
            client,
            cached_token: Arc::new(RwLock::new(cached)),
        }
    }

    /// Create an authenticator around an already valid access token.
    ///
    /// When `grant` is given, the token is renewed with it on expiry.
    pub fn from_access_token(
        access_token: String,
        expires_at: Option<SystemTime>,
        grant: Option<RefreshGrant>,
        client: Client,
    ) -> Self {
        let source = grant.map_or(TokenSource::Fixed, TokenSource::RefreshToken);
        let cached = CachedToken {
            access_token,
            expires_at,
        };
        Self::with_source(source, client, Some(cached))
    }

    /// Create a new authenticator from service account credentials.
    pub fn from_service_account(
        credentials: ServiceAccountCredentials,
        scope: &'static str,
        client: Client,
    ) -> Self {
        let source = TokenSource::ServiceAccount {
            credentials: Arc::new(credentials),
            scope,
        };
        Self::with_source(source, client, None)
    }

    /// Create an authenticator from an application default credentials file.
    pub fn from_adc_file<P: AsRef<Path>>(path: P, client: Client) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DriveError::AuthenticationError(format!(
                "cannot read application default credentials {}: {}",
                path.display(),
                e
            ))
        })?;
        let adc: AdcFile =
            serde_json::from_str(&content).map_err(|source| DriveError::CredentialsParseError {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(match adc {
            AdcFile::AuthorizedUser(user) => {
                let grant = RefreshGrant {
                    client_id: user.client_id,
                    client_secret: Some(user.client_secret),
                    refresh_token: user.refresh_token,
                    token_uri: user.token_uri.unwrap_or_else(|| TOKEN_URI.to_string()),
                };
                Self::with_source(TokenSource::RefreshToken(grant), client, None)
            }
            AdcFile::ServiceAccount(sa) => Self::from_service_account(sa, DRIVE_SCOPE, client),
        })
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String> {
        // Check if we have a valid cached token
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                // Add 60 second buffer before expiration
                let buffer = Duration::from_secs(60);
                match token.expires_at {
                    None => return Ok(token.access_token.clone()),
                    Some(expires_at) if expires_at > SystemTime::now() + buffer => {
                        return Ok(token.access_token.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        // Refresh the token
        let new_token = self.fetch_token().await?;

        // Cache the new token
        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(new_token.clone());
        }

        Ok(new_token.access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        match &self.source {
            TokenSource::Fixed => Err(DriveError::CredentialsExpired),
            TokenSource::RefreshToken(grant) => {
                let response = refresh_access_token(&self.client, grant).await?;
                Ok(CachedToken {
                    expires_at: response
                        .expires_in
                        .map(|secs| SystemTime::now() + Duration::from_secs(secs)),
                    access_token: response.access_token,
                })
            }
            TokenSource::ServiceAccount { credentials, scope } => {
                self.service_account_token(credentials, scope).await
            }
        }
    }

    /// Obtain an access token using a signed JWT assertion.
    async fn service_account_token(
        &self,
        credentials: &ServiceAccountCredentials,
        scope: &str,
    ) -> Result<CachedToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DriveError::AuthenticationError(e.to_string()))?
            .as_secs();
        let token_uri = credentials.token_uri.as_deref().unwrap_or(TOKEN_URI);

        let claims = Claims {
            iss: credentials.client_email.clone(),
            scope: scope.to_string(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + 3600, // 1 hour
        };

        // Create JWT
        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())?;
        let jwt = encode(&header, &claims, &key)?;

        // Exchange JWT for access token
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];

        debug!(email = %credentials.client_email, "requesting service account token");
        let response = self.client.post(token_uri).form(&params).send().await?;
        let token = token_response(response).await?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| SystemTime::now() + Duration::from_secs(secs)),
        })
    }
}

/// Where the credentials behind an [`Authenticator`] came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    Stored(Credentials),
    ApplicationDefault(PathBuf),
}

/// Resolves credentials into an authenticated client.
///
/// State is read from the injected store; the controller itself is
/// stateless and cheap to construct per command.
pub struct AuthFlow<'a> {
    store: &'a dyn CredentialStore,
    adc_path: Option<&'a Path>,
    http: Client,
}

impl<'a> AuthFlow<'a> {
    pub fn new(store: &'a dyn CredentialStore, adc_path: Option<&'a Path>, http: Client) -> Self {
        Self {
            store,
            adc_path,
            http,
        }
    }

    /// Return a client able to perform operations at `access`.
    ///
    /// Expired stored credentials are refreshed once and persisted. Fails
    /// before any network call when nothing usable is configured or when a
    /// readonly token is asked to write.
    pub async fn ensure_client(
        &self,
        access: Access,
        endpoints: &ApiEndpoints,
    ) -> Result<DriveClient> {
        let (auth, _) = self.authenticate(access, true).await?;
        Ok(DriveClient::new(auth, endpoints.clone()))
    }

    /// Like [`AuthFlow::ensure_client`] but never writes refreshed tokens
    /// back to the store.
    pub async fn probe(
        &self,
        access: Access,
        endpoints: &ApiEndpoints,
    ) -> Result<(DriveClient, CredentialSource)> {
        let (auth, source) = self.authenticate(access, false).await?;
        Ok((DriveClient::new(auth, endpoints.clone()), source))
    }

    pub async fn authenticate(
        &self,
        access: Access,
        persist: bool,
    ) -> Result<(Authenticator, CredentialSource)> {
        match self.store.load()? {
            Some(credentials) => {
                let credentials = self.prepare_stored(credentials, access, persist).await?;
                let auth = self.stored_authenticator(&credentials);
                Ok((auth, CredentialSource::Stored(credentials)))
            }
            None => match self.adc_path {
                Some(path) => {
                    info!(path = %path.display(), "no stored credentials, using application default credentials");
                    let auth = Authenticator::from_adc_file(path, self.http.clone())?;
                    Ok((auth, CredentialSource::ApplicationDefault(path.to_path_buf())))
                }
                None => Err(DriveError::NoCredentials),
            },
        }
    }

    async fn prepare_stored(
        &self,
        mut credentials: Credentials,
        access: Access,
        persist: bool,
    ) -> Result<Credentials> {
        if access == Access::Write && credentials.scope() == Some(Scope::ReadOnly) {
            return Err(DriveError::InsufficientScope("modify files"));
        }

        if !credentials.is_expired(Utc::now()) {
            return Ok(credentials);
        }

        let grant = RefreshGrant::from_credentials(&credentials).ok_or_else(|| {
            warn!("stored credentials expired without a refresh token");
            DriveError::CredentialsExpired
        })?;

        let response = refresh_access_token(&self.http, &grant).await?;
        credentials.apply_token_response(response, Utc::now());

        if persist {
            self.store.save(&credentials)?;
        }
        debug!(scope = ?access.scope(), "refreshed stored credentials");
        Ok(credentials)
    }

    fn stored_authenticator(&self, credentials: &Credentials) -> Authenticator {
        let expires_at = credentials.expiry.map(SystemTime::from);
        Authenticator::from_access_token(
            credentials.access_token.clone(),
            expires_at,
            RefreshGrant::from_credentials(credentials),
            self.http.clone(),
        )
    }
}
