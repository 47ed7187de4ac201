//! Process configuration loaded via OrthoConfig, and quota table loading.

use std::io;
use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::domain::rate_limit::{QuotaError, QuotaPolicy};

/// Settings shared by the gradesync binaries.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "GRADESYNC")]
pub struct SyncSettings {
    /// PostgreSQL connection string for the rate-limit store.
    pub database_url: Option<String>,
    /// JSON quota table; the built-in table is used when absent.
    pub quota_file: Option<PathBuf>,
    /// Remove expired rate-limit windows before serving checks.
    #[ortho_config(default = false)]
    pub purge_on_start: bool,
}

impl SyncSettings {
    /// Resolve the quota policy these settings point at.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaFileError`] when the configured file cannot be read
    /// or parsed.
    pub fn quota_policy(&self) -> Result<QuotaPolicy, QuotaFileError> {
        match &self.quota_file {
            Some(path) => QuotaPolicy::load(path),
            None => {
                info!(reason = "no quota file configured", "using built-in quota table");
                Ok(QuotaPolicy::builtin())
            }
        }
    }
}

/// Errors returned while loading a quota file.
#[derive(Debug, Error)]
pub enum QuotaFileError {
    /// The file could not be read.
    #[error("failed to read quota file at {path}: {source}")]
    Read {
        /// Path to the quota file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file content was rejected.
    #[error("invalid quota file at {path}: {source}")]
    Invalid {
        /// Path to the quota file.
        path: PathBuf,
        /// Validation failure.
        #[source]
        source: QuotaError,
    },
}

impl QuotaPolicy {
    /// Read and validate a JSON quota table from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaFileError::Read`] for I/O failures and
    /// [`QuotaFileError::Invalid`] for malformed or out-of-range entries.
    pub fn load(path: &Path) -> Result<Self, QuotaFileError> {
        let raw = read_to_string(path).map_err(|source| QuotaFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = Self::from_json(&raw).map_err(|source| QuotaFileError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), endpoints = policy.len(), "loaded quota table");
        Ok(policy)
    }
}

fn read_to_string(path: &Path) -> io::Result<String> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "quota file path must include a file name",
        )
    })?;
    let directory = Dir::open_ambient_dir(parent, ambient_authority())?;
    directory.read_to_string(Path::new(file_name))
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings parsing and quota file loading.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    use crate::domain::Endpoint;
    use crate::test_support::cap_fs::quota_file;

    fn load_from_empty_args() -> SyncSettings {
        SyncSettings::load_from_iter([OsString::from("gradesync")]).expect("config should load")
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env([
            ("GRADESYNC_DATABASE_URL", None::<String>),
            ("GRADESYNC_QUOTA_FILE", None::<String>),
            ("GRADESYNC_PURGE_ON_START", None::<String>),
        ]);

        let settings = load_from_empty_args();
        assert!(settings.database_url.is_none());
        assert!(settings.quota_file.is_none());
        assert!(!settings.purge_on_start);
        assert_eq!(
            settings.quota_policy().expect("builtin policy"),
            QuotaPolicy::builtin()
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            (
                "GRADESYNC_DATABASE_URL",
                Some("postgres://gradesync@localhost/gradesync".to_owned()),
            ),
            ("GRADESYNC_QUOTA_FILE", Some("/etc/gradesync/quotas.json".to_owned())),
            ("GRADESYNC_PURGE_ON_START", Some("true".to_owned())),
        ]);

        let settings = load_from_empty_args();
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://gradesync@localhost/gradesync")
        );
        assert_eq!(
            settings.quota_file,
            Some(PathBuf::from("/etc/gradesync/quotas.json"))
        );
        assert!(settings.purge_on_start);
    }

    #[rstest]
    fn quota_file_is_loaded_and_validated() {
        let (_dir, path) = quota_file(
            r#"{"endpoints": {"bulk-grades": {"maxRequests": 2, "windowMinutes": 5}}}"#,
        )
        .expect("write quota file");

        let policy = QuotaPolicy::load(&path).expect("quota table");

        let quota = policy
            .quota_for(&Endpoint::new("bulk-grades").expect("endpoint"))
            .expect("configured quota");
        assert_eq!(quota.max_requests(), 2);
        assert_eq!(quota.window_minutes(), 5);
        assert!(policy.quota_for(&Endpoint::new("grades").expect("endpoint")).is_none());
    }

    #[rstest]
    fn invalid_quota_file_reports_path() {
        let (_dir, path) =
            quota_file(r#"{"endpoints": {"grades": {"maxRequests": 0, "windowMinutes": 1}}}"#)
                .expect("write quota file");

        let err = QuotaPolicy::load(&path).expect_err("zero quota rejected");

        assert!(matches!(err, QuotaFileError::Invalid { .. }));
        assert!(err.to_string().contains("quotas.json"));
    }

    #[rstest]
    fn missing_quota_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = QuotaPolicy::load(&dir.path().join("absent.json")).expect_err("missing file");

        let QuotaFileError::Read { source, .. } = err else {
            panic!("expected read error");
        };
        assert_eq!(source.kind(), io::ErrorKind::NotFound);
    }

    #[rstest]
    fn reference_fixture_matches_builtin_policy() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join("quotas.json");

        assert_eq!(
            QuotaPolicy::load(&path).expect("fixture"),
            QuotaPolicy::builtin()
        );
    }
}
