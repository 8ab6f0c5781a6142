//! Throwaway sqlite database files.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::unique_str;

/// A sqlite file path inside a private temp directory.
///
/// The file itself is not created; the driver does that on first connect.
/// Everything is removed when the value is dropped.
pub struct TempSqlite {
    _dir: TempDir,
    path: PathBuf,
}

impl TempSqlite {
    pub fn new(prefix: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().join(format!("{}.db", unique_str(prefix)));
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path as a string, the form database configs take.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}
