//! Tests for credential resolution and token refresh.

use chrono::{Duration, Utc};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use gdrive_cli::credentials::{DRIVE_READONLY_SCOPE, DRIVE_SCOPE};
use gdrive_cli::{
    Access, ApiEndpoints, AuthFlow, CredentialStore, Credentials, DriveError, ErrorKind,
    MemoryCredentialStore,
};

fn stored(server: &ServerGuard, scope: &str, expires_in_minutes: i64) -> Credentials {
    Credentials {
        access_token: "old-token".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        token_uri: format!("{}/token", server.url()),
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        scopes: vec![scope.to_string()],
        expiry: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
    }
}

async fn files_mock(server: &mut ServerGuard, token: &str) -> mockito::Mock {
    server
        .mock("GET", "/files")
        .match_query(Matcher::Any)
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_header("content-type", "application/json")
        .with_body(json!({"files": []}).to_string())
        .create_async()
        .await
}

mod stored_credentials {
    use super::*;

    #[tokio::test]
    async fn test_valid_token_is_used_without_refresh() {
        let mut server = Server::new_async().await;
        let store = MemoryCredentialStore::with_credentials(stored(&server, DRIVE_SCOPE, 30));
        let token = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;
        files_mock(&mut server, "old-token").await;

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        let client = flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .unwrap();
        client.list_files("root").await.unwrap();

        token.assert_async().await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_and_saved() {
        let mut server = Server::new_async().await;
        let store = MemoryCredentialStore::with_credentials(stored(&server, DRIVE_SCOPE, -5));
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "new-token", "expires_in": 3600}).to_string())
            .expect(1)
            .create_async()
            .await;
        files_mock(&mut server, "new-token").await;

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        let client = flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .unwrap();
        client.list_files("root").await.unwrap();
        client.list_files("root").await.unwrap();

        token.assert_async().await;
        assert_eq!(store.save_count(), 1);

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.access_token, "new-token");
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!saved.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let store = MemoryCredentialStore::with_credentials(stored(&server, DRIVE_SCOPE, -5));
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"error": "invalid_grant", "error_description": "Token has been revoked."})
                    .to_string(),
            )
            .create_async()
            .await;

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        let err = flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DriveError::TokenRefreshError(_)));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("invalid_grant"));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let server = Server::new_async().await;
        let mut credentials = stored(&server, DRIVE_SCOPE, -5);
        credentials.refresh_token = None;
        let store = MemoryCredentialStore::with_credentials(credentials);

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        let err = flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DriveError::CredentialsExpired));
    }

    #[tokio::test]
    async fn test_probe_never_persists() {
        let mut server = Server::new_async().await;
        let store = MemoryCredentialStore::with_credentials(stored(&server, DRIVE_SCOPE, -5));
        server
            .mock("POST", "/token")
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "new-token", "expires_in": 3600}).to_string())
            .create_async()
            .await;

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        flow.probe(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .unwrap();

        assert_eq!(store.save_count(), 0);
        assert_eq!(store.load().unwrap().unwrap().access_token, "old-token");
    }
}

mod scopes {
    use super::*;

    #[tokio::test]
    async fn test_readonly_token_cannot_write() {
        let mut server = Server::new_async().await;
        let store =
            MemoryCredentialStore::with_credentials(stored(&server, DRIVE_READONLY_SCOPE, -5));
        let token = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        let err = flow
            .ensure_client(Access::Write, &ApiEndpoints::with_base(&server.url()))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DriveError::InsufficientScope(_)));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_readonly_token_can_read() {
        let server = Server::new_async().await;
        let store =
            MemoryCredentialStore::with_credentials(stored(&server, DRIVE_READONLY_SCOPE, 30));

        let flow = AuthFlow::new(&store, None, reqwest::Client::new());
        assert!(flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .is_ok());
    }
}

mod application_default {
    use super::*;

    #[tokio::test]
    async fn test_no_credentials_anywhere() {
        let store = MemoryCredentialStore::new();
        let flow = AuthFlow::new(&store, None, reqwest::Client::new());

        let err = flow
            .ensure_client(Access::Read, &ApiEndpoints::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DriveError::NoCredentials));
        assert_eq!(err.kind().exit_code(), 3);
    }

    #[tokio::test]
    async fn test_authorized_user_file_is_used() {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let adc = dir.path().join("application_default_credentials.json");
        std::fs::write(
            &adc,
            json!({
                "type": "authorized_user",
                "client_id": "adc-client",
                "client_secret": "adc-secret",
                "refresh_token": "adc-refresh",
                "token_uri": format!("{}/token", server.url())
            })
            .to_string(),
        )
        .unwrap();

        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "adc-refresh".into()))
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "adc-token", "expires_in": 3600}).to_string())
            .expect(1)
            .create_async()
            .await;
        files_mock(&mut server, "adc-token").await;

        let store = MemoryCredentialStore::new();
        let flow = AuthFlow::new(&store, Some(adc.as_path()), reqwest::Client::new());
        let client = flow
            .ensure_client(Access::Read, &ApiEndpoints::with_base(&server.url()))
            .await
            .unwrap();
        client.list_files("root").await.unwrap();

        token.assert_async().await;
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_stored_credentials_win_over_adc() {
        let server = Server::new_async().await;
        let store = MemoryCredentialStore::with_credentials(stored(&server, DRIVE_SCOPE, 30));
        let missing = std::path::Path::new("/nonexistent/adc.json");

        let flow = AuthFlow::new(&store, Some(missing), reqwest::Client::new());
        let (_, source) = flow.authenticate(Access::Read, true).await.unwrap();

        assert!(matches!(
            source,
            gdrive_cli::auth::CredentialSource::Stored(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_adc_file() {
        let dir = tempfile::tempdir().unwrap();
        let adc = dir.path().join("adc.json");
        std::fs::write(&adc, r#"{"type": "external_account"}"#).unwrap();

        let store = MemoryCredentialStore::new();
        let flow = AuthFlow::new(&store, Some(adc.as_path()), reqwest::Client::new());
        let err = flow
            .ensure_client(Access::Read, &ApiEndpoints::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DriveError::CredentialsParseError { .. }));
    }
}
