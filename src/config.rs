//! Filesystem locations and API endpoints.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{DriveError, Result};

/// Overrides the credentials file path directly. Takes precedence.
pub const CREDENTIALS_FILE_ENV: &str = "GDRIVE_CREDENTIALS_FILE";

/// Overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "GDRIVE_CONFIG_DIR";

/// Standard location override for application default credentials.
pub const ADC_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const APP_DIR_NAME: &str = "gdrive-cli";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";
const CLIENT_SECRET_FILE_NAME: &str = "client_secret.json";
const ADC_FILE_NAME: &str = "application_default_credentials.json";

/// Base URL for Google Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload URL for Google Drive API.
const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Resolved locations of the files this tool reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub credentials_file: PathBuf,
}

impl ConfigPaths {
    /// Resolve paths from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var_os(key))
    }

    /// Resolve paths using `lookup` to read environment variables.
    ///
    /// Order: `GDRIVE_CREDENTIALS_FILE`, then `GDRIVE_CONFIG_DIR/credentials.json`,
    /// then `<config home>/gdrive-cli/credentials.json`.
    pub fn resolve<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        Self::resolve_with(lookup, dirs::config_dir())
    }

    fn resolve_with<F>(lookup: F, config_home: Option<PathBuf>) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let credentials_override =
            non_empty(lookup(CREDENTIALS_FILE_ENV)).map(|file| expand_tilde(Path::new(&file)));

        let config_dir = match non_empty(lookup(CONFIG_DIR_ENV)) {
            Some(dir) => expand_tilde(Path::new(&dir)),
            None => match (config_home, &credentials_override) {
                (Some(home), _) => home.join(APP_DIR_NAME),
                // No config home: keep companion files next to the overridden credentials.
                (None, Some(file)) => file
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                (None, None) => return Err(DriveError::NoConfigDir),
            },
        };

        let credentials_file =
            credentials_override.unwrap_or_else(|| config_dir.join(CREDENTIALS_FILE_NAME));

        Ok(Self {
            config_dir,
            credentials_file,
        })
    }

    /// Default location of the OAuth client secret used by `auth login`.
    pub fn client_secret_file(&self) -> PathBuf {
        self.config_dir.join(CLIENT_SECRET_FILE_NAME)
    }
}

/// Locate application default credentials, if any are discoverable.
///
/// An explicit `GOOGLE_APPLICATION_CREDENTIALS` is returned as-is so a bad
/// path surfaces as an error instead of being silently skipped. The gcloud
/// well-known file is only returned when it exists.
pub fn discover_adc<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    if let Some(path) = non_empty(lookup(ADC_ENV)) {
        return Some(expand_tilde(Path::new(&path)));
    }

    let well_known = gcloud_adc_file()?;
    well_known.is_file().then_some(well_known)
}

/// Where `gcloud auth application-default login` writes its credentials.
#[cfg(not(windows))]
fn gcloud_adc_file() -> Option<PathBuf> {
    Some(
        dirs::home_dir()?
            .join(".config")
            .join("gcloud")
            .join(ADC_FILE_NAME),
    )
}

#[cfg(windows)]
fn gcloud_adc_file() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("gcloud").join(ADC_FILE_NAME))
}

fn non_empty(value: Option<OsString>) -> Option<OsString> {
    value.filter(|v| !v.is_empty())
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Drive API base URLs. Overridable so tests can target a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Point both the metadata and the upload API at `base`.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: base.to_string(),
            upload_base: format!("{}/upload", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_credentials_file_override_wins() {
        let paths = ConfigPaths::resolve(env(&[
            (CONFIG_DIR_ENV, "/tmp/cfg"),
            (CREDENTIALS_FILE_ENV, "/tmp/elsewhere/creds.json"),
        ]))
        .unwrap();

        assert_eq!(paths.config_dir, PathBuf::from("/tmp/cfg"));
        assert_eq!(
            paths.credentials_file,
            PathBuf::from("/tmp/elsewhere/creds.json")
        );
    }

    #[test]
    fn test_config_dir_override() {
        let paths = ConfigPaths::resolve(env(&[(CONFIG_DIR_ENV, "/tmp/cfg")])).unwrap();
        assert_eq!(
            paths.credentials_file,
            PathBuf::from("/tmp/cfg/credentials.json")
        );
        assert_eq!(
            paths.client_secret_file(),
            PathBuf::from("/tmp/cfg/client_secret.json")
        );
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let paths = ConfigPaths::resolve(env(&[
            (CONFIG_DIR_ENV, "/tmp/cfg"),
            (CREDENTIALS_FILE_ENV, ""),
        ]))
        .unwrap();
        assert_eq!(
            paths.credentials_file,
            PathBuf::from("/tmp/cfg/credentials.json")
        );
    }

    #[test]
    fn test_credentials_override_without_config_home() {
        let paths = ConfigPaths::resolve_with(
            env(&[(CREDENTIALS_FILE_ENV, "/srv/gdrive/creds.json")]),
            None,
        )
        .unwrap();

        assert_eq!(paths.credentials_file, PathBuf::from("/srv/gdrive/creds.json"));
        assert_eq!(paths.config_dir, PathBuf::from("/srv/gdrive"));
    }

    #[test]
    fn test_no_config_home_and_no_override() {
        let err = ConfigPaths::resolve_with(env(&[]), None).unwrap_err();
        assert!(matches!(err, DriveError::NoConfigDir));
    }

    #[test]
    fn test_config_home_default() {
        let paths =
            ConfigPaths::resolve_with(env(&[]), Some(PathBuf::from("/home/u/.config"))).unwrap();
        assert_eq!(
            paths.credentials_file,
            PathBuf::from("/home/u/.config/gdrive-cli/credentials.json")
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_gcloud_adc_file_under_dot_config() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                gcloud_adc_file(),
                Some(home.join(".config/gcloud/application_default_credentials.json"))
            );
        }
    }

    #[test]
    fn test_adc_env_override() {
        let path = discover_adc(env(&[(ADC_ENV, "/tmp/adc.json")]));
        assert_eq!(path, Some(PathBuf::from("/tmp/adc.json")));
    }

    #[test]
    fn test_endpoints_with_base() {
        let endpoints = ApiEndpoints::with_base("http://127.0.0.1:1234/");
        assert_eq!(endpoints.api_base, "http://127.0.0.1:1234");
        assert_eq!(endpoints.upload_base, "http://127.0.0.1:1234/upload");
    }
}
