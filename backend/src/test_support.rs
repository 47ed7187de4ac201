//! Test utilities for the gradesync crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`,
//! through the `test-support` feature).

pub mod clock;

pub mod cap_fs {
    //! Capability-safe filesystem helpers for tests.
    //!
    //! The crate reads files through `cap_std::fs::Dir` only; these helpers
    //! keep test suites on the same policy.

    use std::ffi::OsString;
    use std::io;
    use std::path::{Path, PathBuf};

    use cap_std::{ambient_authority, fs::Dir};
    use tempfile::TempDir;

    /// Write bytes to a file through `cap_std`.
    pub fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
        let (parent, file_name) = parent_and_file_name(path)?;
        let directory = Dir::open_ambient_dir(parent, ambient_authority())?;
        directory.write(Path::new(&file_name), contents)
    }

    /// Write `contents` to `quotas.json` inside a fresh temporary directory.
    ///
    /// Keep the returned [`TempDir`] alive for as long as the file is used.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gradesync::domain::rate_limit::QuotaPolicy;
    /// use gradesync::test_support::cap_fs::quota_file;
    ///
    /// let (_dir, path) = quota_file(r#"{"endpoints": {}}"#)?;
    /// let policy = QuotaPolicy::load(&path).expect("quota file");
    /// assert!(policy.is_empty());
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn quota_file(contents: &str) -> io::Result<(TempDir, PathBuf)> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join("quotas.json");
        write_file(&path, contents.as_bytes())?;
        Ok((directory, path))
    }

    fn parent_and_file_name(path: &Path) -> io::Result<(&Path, OsString)> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "path must include a file or directory name",
            )
        })?;
        Ok((parent, file_name.to_os_string()))
    }
}

pub mod records {
    //! Record builders for grade fixtures.

    use serde_json::Value;

    use crate::domain::{CollectionKey, FieldChanges, Record, RecordId};

    /// Convert a JSON object literal into field changes.
    ///
    /// Panics when `value` is not an object.
    pub fn fields(value: Value) -> FieldChanges {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }

    /// Parse a record id, panicking on invalid input.
    pub fn record_id(raw: &str) -> RecordId {
        match RecordId::new(raw) {
            Ok(id) => id,
            Err(error) => panic!("invalid record id {raw:?}: {error}"),
        }
    }

    /// Parse a collection key, panicking on invalid input.
    pub fn collection_key(raw: &str) -> CollectionKey {
        match CollectionKey::new(raw) {
            Ok(key) => key,
            Err(error) => panic!("invalid collection key {raw:?}: {error}"),
        }
    }

    /// A grade record in class `7b`.
    pub fn grade(id: &str, value: i64) -> Record {
        Record::new(
            record_id(id),
            fields(serde_json::json!({ "class_id": "7b", "grade": value })),
        )
    }
}
