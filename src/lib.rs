//! gdrive_cli - A CLI tool for Google Drive.
//!
//! This library provides functionality to:
//! - Log in with an OAuth desktop client and keep the token fresh
//! - Fall back to application default credentials
//! - Resolve folder/file links and IDs
//! - List, upload, download and trash files
//!
//! # Example
//!
//! ```no_run
//! use gdrive_cli::{Access, ConfigPaths, Context, FileCredentialStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let paths = ConfigPaths::from_env()?;
//!     let ctx = Context::new(Box::new(FileCredentialStore::new(paths.credentials_file)));
//!
//!     let client = ctx.ensure_client(Access::Read).await?;
//!     for file in client.list_files("root").await? {
//!         println!("{}", file);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod oauth;
pub mod output;
pub mod url_parser;

// Re-exports for convenience
pub use auth::{Access, AuthFlow, Authenticator};
pub use client::DriveClient;
pub use commands::Context;
pub use config::{ApiEndpoints, ConfigPaths};
pub use credentials::{CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore, Scope};
pub use error::{DriveError, ErrorKind, Result};
pub use models::FileMetadata;
pub use output::OutputFormat;
pub use url_parser::{extract_id, resolve_file_id, resolve_folder_id, Reference};
