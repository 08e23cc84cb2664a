//! URL parser for extracting Google Drive IDs from URLs.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{DriveError, Result};

/// Regex patterns for Google Drive URLs, tried in this order.
static FOLDER_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://drive\.google\.com/drive/(?:u/\d+/)?folders/([a-zA-Z0-9_-]+)")
        .expect("Invalid folder URL regex")
});

static FILE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://drive\.google\.com/file/d/([a-zA-Z0-9_-]+)")
        .expect("Invalid file URL regex")
});

static DOCS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://docs\.google\.com/[a-z]+/(?:u/\d+/)?d/([a-zA-Z0-9_-]+)")
        .expect("Invalid docs URL regex")
});

static OPEN_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://drive\.google\.com/(?:open|uc)\?(?:[^#]*&)?id=([a-zA-Z0-9_-]+)")
        .expect("Invalid open URL regex")
});

/// Valid Google Drive ID pattern (alphanumeric, underscore, hyphen).
static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid ID regex"));

/// Folder alias understood by the Drive API for the user's "My Drive".
pub const ROOT_FOLDER_ID: &str = "root";

/// Which URL template a reference matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Folder,
    File,
    Document,
    Open,
}

impl LinkKind {
    fn describe(self) -> &'static str {
        match self {
            LinkKind::Folder => "folder",
            LinkKind::File | LinkKind::Document => "file",
            LinkKind::Open => "generic",
        }
    }
}

/// A user-supplied folder or file locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Id(String),
    Url { kind: LinkKind, id: String },
}

impl Reference {
    /// Parse a raw ID or a supported Drive URL.
    pub fn parse(url_or_id: &str) -> Result<Self> {
        let trimmed = url_or_id.trim();

        let patterns: [(&Regex, LinkKind); 4] = [
            (&*FOLDER_URL_REGEX, LinkKind::Folder),
            (&*FILE_URL_REGEX, LinkKind::File),
            (&*DOCS_URL_REGEX, LinkKind::Document),
            (&*OPEN_URL_REGEX, LinkKind::Open),
        ];

        for (regex, kind) in patterns {
            if let Some(id) = regex.captures(trimmed).and_then(|c| c.get(1)) {
                return Ok(Reference::Url {
                    kind,
                    id: id.as_str().to_string(),
                });
            }
        }

        if !trimmed.is_empty() && ID_REGEX.is_match(trimmed) {
            return Ok(Reference::Id(trimmed.to_string()));
        }

        Err(DriveError::InvalidUrlOrId(url_or_id.to_string()))
    }

    /// The canonical ID this reference points at.
    pub fn into_id(self) -> String {
        match self {
            Reference::Id(id) => id,
            Reference::Url { id, .. } => id,
        }
    }
}

/// Extract a Google Drive ID from a URL or validate a raw ID.
///
/// Supports the following URL formats:
/// - `https://drive.google.com/drive/folders/<ID>`
/// - `https://drive.google.com/drive/u/0/folders/<ID>`
/// - `https://drive.google.com/file/d/<ID>/view`
/// - `https://docs.google.com/document/d/<ID>/edit`
/// - `https://drive.google.com/open?id=<ID>`
/// - Raw ID string
///
/// # Examples
///
/// ```
/// use gdrive_cli::url_parser::extract_id;
///
/// let id = extract_id("https://drive.google.com/drive/folders/1abc123").unwrap();
/// assert_eq!(id, "1abc123");
///
/// let id = extract_id("1abc123").unwrap();
/// assert_eq!(id, "1abc123");
/// ```
pub fn extract_id(url_or_id: &str) -> Result<String> {
    Reference::parse(url_or_id).map(Reference::into_id)
}

/// Resolve a folder reference, defaulting to the root folder.
///
/// File links are rejected rather than guessed at.
pub fn resolve_folder_id(value: Option<&str>) -> Result<String> {
    let Some(value) = value else {
        return Ok(ROOT_FOLDER_ID.to_string());
    };

    match Reference::parse(value)? {
        Reference::Url {
            kind: kind @ (LinkKind::File | LinkKind::Document),
            ..
        } => Err(DriveError::WrongReferenceKind {
            expected: "folder",
            found: kind.describe(),
            input: value.to_string(),
        }),
        reference => Ok(reference.into_id()),
    }
}

/// Resolve a file reference. Folder links are rejected.
pub fn resolve_file_id(value: &str) -> Result<String> {
    match Reference::parse(value)? {
        Reference::Url {
            kind: LinkKind::Folder,
            ..
        } => Err(DriveError::WrongReferenceKind {
            expected: "file",
            found: LinkKind::Folder.describe(),
            input: value.to_string(),
        }),
        reference => Ok(reference.into_id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_folder_url() {
        let url = "https://drive.google.com/drive/folders/1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn test_extract_folder_url_with_user() {
        let url = "https://drive.google.com/drive/u/0/folders/1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");

        let url = "https://drive.google.com/drive/u/2/folders/1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn test_extract_file_url() {
        let url = "https://drive.google.com/file/d/1abc123XYZ/view";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");

        let url = "https://drive.google.com/file/d/1abc123XYZ/view?usp=sharing";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn test_extract_open_url() {
        let url = "https://drive.google.com/open?id=1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");

        let url = "https://drive.google.com/uc?export=download&id=1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn test_reference_variants() {
        assert_eq!(
            Reference::parse("abc-123").unwrap(),
            Reference::Id("abc-123".to_string())
        );
        assert_eq!(
            Reference::parse("https://drive.google.com/drive/folders/ABC123").unwrap(),
            Reference::Url {
                kind: LinkKind::Folder,
                id: "ABC123".to_string()
            }
        );
    }

    #[test]
    fn test_extract_with_whitespace() {
        assert_eq!(extract_id("  1abc123XYZ  ").unwrap(), "1abc123XYZ");
    }

    #[test]
    fn test_invalid_url() {
        assert!(extract_id("https://example.com/folder/123").is_err());
        assert!(extract_id("").is_err());
        assert!(extract_id("   ").is_err());
    }

    #[test]
    fn test_folder_defaults_to_root() {
        assert_eq!(resolve_folder_id(None).unwrap(), ROOT_FOLDER_ID);
    }
}
