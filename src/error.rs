//! Error types for the gdrive_cli crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when interacting with Google Drive.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Invalid URL or ID: {0}")]
    InvalidUrlOrId(String),

    #[error("Expected a {expected} link or ID, but a {found} link was provided: {input}")]
    WrongReferenceKind {
        expected: &'static str,
        found: &'static str,
        input: String,
    },

    #[error("Local file not found: {0}")]
    FileNotFound(String),

    #[error("Missing required option: {0}")]
    MissingOption(&'static str),

    #[error("Output format '{format}' is not supported by `{command}`")]
    UnsupportedFormat {
        command: &'static str,
        format: &'static str,
    },

    #[error("No credentials found. Run `gdrive auth login --client-secret <path>` first.")]
    NoCredentials,

    #[error("Stored credentials have expired and cannot be refreshed. Run `gdrive auth login` again.")]
    CredentialsExpired,

    #[error("Token refresh failed: {0}. Run `gdrive auth login` again.")]
    TokenRefreshError(String),

    #[error(
        "Stored credentials only grant readonly access. Run `gdrive auth login` without --readonly to {0}."
    )]
    InsufficientScope(&'static str),

    #[error("Client secret file not found: {}", .0.display())]
    ClientSecretMissing(PathBuf),

    #[error("Invalid client secret file {}: {reason}", .path.display())]
    ClientSecretInvalid { path: PathBuf, reason: String },

    #[error("Failed to parse credentials file {}: {source}", .path.display())]
    CredentialsParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("JWT encoding error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Cannot determine a configuration directory; set GDRIVE_CONFIG_DIR")]
    NoConfigDir,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse classification of a [`DriveError`], used for exit codes and
/// structured error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Auth,
    Network,
    Remote,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Remote => "remote",
            ErrorKind::Io => "io",
        }
    }

    /// Process exit status for this class of failure.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Input => 2,
            ErrorKind::Auth => 3,
            ErrorKind::Remote => 4,
            ErrorKind::Network => 5,
        }
    }
}

impl DriveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriveError::InvalidUrlOrId(_)
            | DriveError::WrongReferenceKind { .. }
            | DriveError::FileNotFound(_)
            | DriveError::MissingOption(_)
            | DriveError::UnsupportedFormat { .. } => ErrorKind::Input,
            DriveError::NoCredentials
            | DriveError::CredentialsExpired
            | DriveError::TokenRefreshError(_)
            | DriveError::InsufficientScope(_)
            | DriveError::ClientSecretMissing(_)
            | DriveError::ClientSecretInvalid { .. }
            | DriveError::CredentialsParseError { .. }
            | DriveError::AuthenticationError(_)
            | DriveError::JwtError(_) => ErrorKind::Auth,
            DriveError::HttpError(_) => ErrorKind::Network,
            DriveError::ApiError { .. } => ErrorKind::Remote,
            DriveError::NoConfigDir
            | DriveError::Io(_)
            | DriveError::Json(_)
            | DriveError::Csv(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(DriveError::InvalidUrlOrId("x".into()).kind(), ErrorKind::Input);
        assert_eq!(DriveError::NoCredentials.kind(), ErrorKind::Auth);
        assert_eq!(
            DriveError::ApiError {
                status: 403,
                message: "forbidden".into()
            }
            .kind(),
            ErrorKind::Remote
        );
        assert_eq!(ErrorKind::Input.exit_code(), 2);
        assert_eq!(ErrorKind::Auth.exit_code(), 3);
    }
}
