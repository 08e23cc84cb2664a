//! Google Drive API client.

use std::path::Path;

use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::auth::Authenticator;
use crate::config::ApiEndpoints;
use crate::error::{DriveError, Result};
use crate::models::{About, ApiErrorResponse, FileListResponse, FileMetadata, User};
use crate::url_parser::ROOT_FOLDER_ID;

/// Files larger than this go through a resumable upload session (5 MiB).
const RESUMABLE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Maximum page size accepted by files.list.
const LIST_PAGE_SIZE: &str = "1000";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, modifiedTime, trashed)";
const FILE_FIELDS: &str = "id, name, mimeType, size, modifiedTime, webViewLink";
const UPLOAD_FIELDS: &str = "id, name, mimeType, size, webViewLink";
const TRASH_FIELDS: &str = "id, name, trashed";

/// Authenticated handle to the Drive API, one per CLI invocation.
pub struct DriveClient {
    auth: Authenticator,
    endpoints: ApiEndpoints,
    http: Client,
}

impl DriveClient {
    /// Create a new DriveClient. Performs no I/O.
    pub fn new(auth: Authenticator, endpoints: ApiEndpoints) -> Self {
        Self {
            auth,
            endpoints,
            http: Client::new(),
        }
    }

    /// List all non-trashed children of a folder.
    ///
    /// Follows page tokens until exhausted; a failing page fails the whole
    /// listing.
    pub async fn list_files(&self, parent_id: &str) -> Result<Vec<FileMetadata>> {
        let query = format!("'{}' in parents and trashed = false", parent_id);
        self.query_files(&query).await
    }

    /// Query files using Google Drive query syntax.
    pub async fn query_files(&self, query: &str) -> Result<Vec<FileMetadata>> {
        let token = self.auth.get_access_token().await?;
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.endpoints.api_base))
                .bearer_auth(&token)
                .query(&[
                    ("q", query),
                    ("orderBy", "folder,name"),
                    ("pageSize", LIST_PAGE_SIZE),
                    ("includeItemsFromAllDrives", "true"),
                    ("supportsAllDrives", "true"),
                    ("fields", LIST_FIELDS),
                ]);

            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = check_status(request.send().await?).await?;
            let list_response: FileListResponse = response.json().await?;
            debug!(count = list_response.files.len(), "received file page");
            all_files.extend(list_response.files);

            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Fetch at most one file anywhere in the user's Drive.
    ///
    /// Used as a connectivity probe.
    pub async fn sample_files(&self) -> Result<Vec<FileMetadata>> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .get(format!("{}/files", self.endpoints.api_base))
            .bearer_auth(&token)
            .query(&[("pageSize", "1"), ("fields", "files(id, name)")])
            .send()
            .await?;

        let list_response: FileListResponse = check_status(response).await?.json().await?;
        Ok(list_response.files)
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, file_id: &str) -> Result<FileMetadata> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .get(format!("{}/files/{}", self.endpoints.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("supportsAllDrives", "true"), ("fields", FILE_FIELDS)])
            .send()
            .await?;

        let metadata: FileMetadata = check_status(response).await?.json().await?;
        Ok(metadata)
    }

    /// Look up the authenticated account.
    pub async fn about_user(&self) -> Result<User> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .get(format!("{}/about", self.endpoints.api_base))
            .bearer_auth(&token)
            .query(&[("fields", "user(displayName, emailAddress)")])
            .send()
            .await?;

        let about: About = check_status(response).await?.json().await?;
        Ok(about.user)
    }

    /// Move a file to the trash.
    pub async fn trash_file(&self, file_id: &str) -> Result<FileMetadata> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .patch(format!("{}/files/{}", self.endpoints.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("supportsAllDrives", "true"), ("fields", TRASH_FIELDS)])
            .json(&serde_json::json!({ "trashed": true }))
            .send()
            .await?;

        let metadata: FileMetadata = check_status(response).await?.json().await?;
        Ok(metadata)
    }

    /// Upload a file to a folder.
    ///
    /// # Arguments
    /// * `local_path` - Path to the local file
    /// * `parent_id` - ID of the destination folder
    pub async fn upload_file<P: AsRef<Path>>(
        &self,
        local_path: P,
        parent_id: &str,
    ) -> Result<FileMetadata> {
        let local_path = local_path.as_ref();
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DriveError::FileNotFound(local_path.display().to_string()))?;

        let file_size = tokio::fs::metadata(local_path).await?.len();
        let mime_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        let mut metadata = serde_json::json!({ "name": filename });
        if parent_id != ROOT_FOLDER_ID {
            metadata["parents"] = serde_json::json!([parent_id]);
        }

        debug!(file = %local_path.display(), size = file_size, mime = %mime_type, "uploading");
        if file_size > RESUMABLE_THRESHOLD {
            self.upload_resumable(local_path, &metadata, &mime_type, file_size)
                .await
        } else {
            self.upload_multipart(local_path, &metadata, filename, &mime_type, file_size)
                .await
        }
    }

    /// Upload a file using multipart upload (for smaller files).
    async fn upload_multipart(
        &self,
        local_path: &Path,
        metadata: &serde_json::Value,
        filename: &str,
        mime_type: &str,
        file_size: u64,
    ) -> Result<FileMetadata> {
        let token = self.auth.get_access_token().await?;
        let file = File::open(local_path).await?;

        let metadata_part = Part::text(metadata.to_string()).mime_str("application/json")?;

        let file_part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), file_size)
            .file_name(filename.to_string())
            .mime_str(mime_type)?;

        let form = Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .http
            .post(format!("{}/files", self.endpoints.upload_base))
            .bearer_auth(&token)
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", UPLOAD_FIELDS),
            ])
            .multipart(form)
            .send()
            .await?;

        let metadata: FileMetadata = check_status(response).await?.json().await?;
        Ok(metadata)
    }

    /// Upload a file using resumable upload (for larger files).
    async fn upload_resumable(
        &self,
        local_path: &Path,
        metadata: &serde_json::Value,
        mime_type: &str,
        file_size: u64,
    ) -> Result<FileMetadata> {
        let token = self.auth.get_access_token().await?;

        // Step 1: Initiate resumable upload
        let init_response = self
            .http
            .post(format!("{}/files", self.endpoints.upload_base))
            .bearer_auth(&token)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
            ])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(metadata)
            .send()
            .await?;

        let init_response = check_status(init_response).await?;

        let upload_url = init_response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::ApiError {
                status: 500,
                message: "No upload URL in response".to_string(),
            })?
            .to_string();

        // Step 2: Stream the file content
        let file = File::open(local_path).await?;
        let upload_response = self
            .http
            .put(&upload_url)
            .header("Content-Type", mime_type)
            .header("Content-Length", file_size.to_string())
            .query(&[("fields", UPLOAD_FIELDS)])
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let metadata: FileMetadata = check_status(upload_response).await?.json().await?;
        Ok(metadata)
    }

    /// Stream a file's content into `destination`.
    ///
    /// The caller owns `destination`; it is flushed before returning.
    pub async fn download_to(&self, file_id: &str, destination: &mut File) -> Result<u64> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .http
            .get(format!("{}/files/{}", self.endpoints.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;

        let response = check_status(response).await?;

        // Stream to file
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            destination.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        destination.flush().await?;

        Ok(written)
    }
}

/// Pass successful responses through; turn failures into
/// [`DriveError::ApiError`] carrying the remote message.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(DriveError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(DriveError::ApiError {
        status: status.as_u16(),
        message: error_body,
    })
}
