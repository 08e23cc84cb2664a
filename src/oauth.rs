//! Interactive OAuth desktop login.
//!
//! The user's browser is sent to Google's consent page with a PKCE challenge
//! and a loopback redirect URI. A one-shot listener on `127.0.0.1` receives
//! the authorization code, which is exchanged for tokens exactly once.

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::token_response;
use crate::credentials::{Credentials, Scope, TOKEN_URI};
use crate::error::{DriveError, Result};

/// Google OAuth2 authorization endpoint.
const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// How long to wait for the browser to come back with a code.
const REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client identity, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Read a client secret JSON file with an `installed` or `web` section.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DriveError::ClientSecretMissing(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let file: ClientSecretFile =
            serde_json::from_str(&content).map_err(|e| DriveError::ClientSecretInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        file.installed
            .or(file.web)
            .ok_or_else(|| DriveError::ClientSecretInvalid {
                path: path.to_path_buf(),
                reason: "expected an \"installed\" or \"web\" section".to_string(),
            })
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        Self::from_verifier(random_string(64))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Build the consent page URL.
pub fn build_authorize_url(
    secret: &ClientSecret,
    scope: Scope,
    redirect_uri: &str,
    code_challenge: &str,
    state: &str,
) -> Result<String> {
    let mut url = Url::parse(&secret.auth_uri)
        .map_err(|e| auth_error(&format!("bad auth_uri {}: {}", secret.auth_uri, e)))?;
    url.query_pairs_mut()
        .append_pair("client_id", &secret.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scope.url())
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);
    Ok(url.into())
}

/// Accept one redirect on `listener` and return the authorization code.
///
/// The `state` parameter must equal `expected_state`.
pub async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<String> {
    let (mut stream, peer) = listener.accept().await?;
    debug!(%peer, "received redirect");

    let mut buffer = vec![0u8; 8192];
    let read = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..read]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| auth_error("malformed redirect request"))?;

    let redirect_url = Url::parse(&format!("http://localhost{}", path))
        .map_err(|e| auth_error(&format!("failed to parse redirect url: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in redirect_url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        send_browser_response(&mut stream, "Authentication failed", "You can close this window.")
            .await;
        return Err(auth_error(&format!("authorization denied: {}", error)));
    }

    if state.as_deref() != Some(expected_state) {
        send_browser_response(&mut stream, "Authentication failed", "State mismatch.").await;
        return Err(auth_error("state mismatch in authorization response"));
    }

    let code = code.ok_or_else(|| auth_error("authorization code missing in redirect"))?;
    send_browser_response(
        &mut stream,
        "Authentication complete",
        "You can return to the terminal.",
    )
    .await;
    Ok(code)
}

async fn send_browser_response(stream: &mut TcpStream, title: &str, message: &str) {
    let body = format!(
        "<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>"
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("failed to answer browser: {}", e);
    }
}

/// Exchange an authorization code for credentials. Single attempt.
pub async fn exchange_code(
    http: &Client,
    secret: &ClientSecret,
    scope: Scope,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<Credentials> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", secret.client_id.as_str()),
        ("redirect_uri", redirect_uri),
        ("code_verifier", code_verifier),
    ];
    if let Some(client_secret) = secret.client_secret.as_deref() {
        params.push(("client_secret", client_secret));
    }

    let response = http.post(&secret.token_uri).form(&params).send().await?;
    let token = token_response(response).await.map_err(|e| match e {
        DriveError::TokenRefreshError(message) => {
            auth_error(&format!("code exchange rejected: {}", message))
        }
        other => other,
    })?;

    let mut credentials = Credentials {
        access_token: String::new(),
        refresh_token: None,
        token_uri: secret.token_uri.clone(),
        client_id: Some(secret.client_id.clone()),
        client_secret: secret.client_secret.clone(),
        scopes: vec![scope.url().to_string()],
        expiry: None,
    };
    credentials.apply_token_response(token, Utc::now());
    Ok(credentials)
}

/// Run the whole interactive flow and return fresh credentials.
pub async fn login(
    http: &Client,
    secret: &ClientSecret,
    scope: Scope,
    launch_browser: bool,
) -> Result<Credentials> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{}", port);

    let pkce = Pkce::generate();
    let state = random_string(32);
    let authorize_url =
        build_authorize_url(secret, scope, &redirect_uri, &pkce.challenge, &state)?;

    eprintln!("Open this URL in your browser to authorize access:\n\n  {}\n", authorize_url);
    if launch_browser {
        if let Err(e) = webbrowser::open(&authorize_url) {
            warn!("failed to open browser: {}", e);
        }
    }

    let code = tokio::time::timeout(REDIRECT_TIMEOUT, wait_for_code(&listener, &state))
        .await
        .map_err(|_| auth_error("timed out waiting for browser authorization"))??;

    let credentials =
        exchange_code(http, secret, scope, &code, &redirect_uri, &pkce.verifier).await?;
    info!(scope = scope.label(), "authorization complete");
    Ok(credentials)
}

fn auth_error(message: &str) -> DriveError {
    DriveError::AuthenticationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> ClientSecret {
        ClientSecret {
            client_id: "id.apps.googleusercontent.com".to_string(),
            client_secret: Some("shh".to_string()),
            auth_uri: AUTH_URI.to_string(),
            token_uri: TOKEN_URI.to_string(),
        }
    }

    #[test]
    fn test_pkce_challenge_known_vector() {
        // RFC 7636 appendix B
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_authorize_url_carries_scope_and_state() {
        let url = build_authorize_url(
            &secret(),
            Scope::ReadOnly,
            "http://127.0.0.1:8080",
            "challenge",
            "xyz",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs["scope"], Scope::ReadOnly.url());
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8080");
    }

    #[test]
    fn test_client_secret_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");

        fs::write(
            &path,
            r#"{"installed": {"client_id": "abc", "client_secret": "def", "redirect_uris": ["http://localhost"]}}"#,
        )
        .unwrap();
        let secret = ClientSecret::from_file(&path).unwrap();
        assert_eq!(secret.client_id, "abc");
        assert_eq!(secret.token_uri, TOKEN_URI);

        fs::write(&path, r#"{"other": {}}"#).unwrap();
        assert!(matches!(
            ClientSecret::from_file(&path),
            Err(DriveError::ClientSecretInvalid { .. })
        ));

        assert!(matches!(
            ClientSecret::from_file(dir.path().join("missing.json")),
            Err(DriveError::ClientSecretMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_code_checks_state() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /?state=good&code=4%2Fabc HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await.unwrap();
            reply
        });

        let code = wait_for_code(&listener, "good").await.unwrap();
        assert_eq!(code, "4/abc");
        assert!(browser.await.unwrap().contains("Authentication complete"));
    }

    #[tokio::test]
    async fn test_wait_for_code_rejects_wrong_state() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /?state=evil&code=abc HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let err = wait_for_code(&listener, "good").await.unwrap_err();
        assert!(matches!(err, DriveError::AuthenticationError(_)));
    }
}
