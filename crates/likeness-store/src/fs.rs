//! Filesystem-backed reference store.
//!
//! The reference is one file, `<dir>/<key>`. Saves write a temporary file in
//! the same directory, fsync it, and rename it over the target, so an
//! interrupted save leaves the previous reference untouched.

use crate::reference::{
    validate_key, Fingerprint, ReferenceInfo, ReferenceStore, StorageLocation, StoreError,
    DEFAULT_REFERENCE_KEY,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct FsReferenceStore {
    dir: PathBuf,
    key: String,
}

impl FsReferenceStore {
    /// Store under `dir` with the default `enrolled_face` key.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key: DEFAULT_REFERENCE_KEY.to_string(),
        }
    }

    pub fn with_key(dir: impl Into<PathBuf>, key: &str) -> Result<Self, StoreError> {
        validate_key(key)?;
        Ok(Self {
            dir: dir.into(),
            key: key.to_string(),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.key)
    }

    fn write_error(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            path: self.path(),
            source,
        }
    }

    fn read_error(&self, source: io::Error) -> StoreError {
        StoreError::Read {
            path: self.path(),
            source,
        }
    }
}

impl ReferenceStore for FsReferenceStore {
    fn save(&self, bytes: &[u8]) -> Result<StorageLocation, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| self.write_error(e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| self.write_error(e))?;
        tmp.write_all(bytes).map_err(|e| self.write_error(e))?;
        tmp.flush().map_err(|e| self.write_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.write_error(e))?;

        let path = self.path();
        tmp.persist(&path).map_err(|e| self.write_error(e.error))?;

        // Make the rename itself durable. Not every platform can open a
        // directory for syncing, so failure here is only logged.
        if let Err(e) = fs::File::open(&self.dir).and_then(|d| d.sync_all()) {
            tracing::debug!(dir = %self.dir.display(), error = %e, "directory fsync skipped");
        }

        tracing::info!(path = %path.display(), len = bytes.len(), "reference saved");
        Ok(StorageLocation::File(path))
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path()) {
            Ok(bytes) => {
                tracing::debug!(
                    path = %self.path().display(),
                    len = bytes.len(),
                    "reference loaded"
                );
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.read_error(e)),
        }
    }

    fn info(&self) -> Result<Option<ReferenceInfo>, StoreError> {
        let path = self.path();
        // Metadata and contents come from one open handle, so a concurrent
        // replace cannot pair one file's timestamp with another's digest.
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.read_error(e)),
        };
        let meta = file.metadata().map_err(|e| self.read_error(e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| self.read_error(e))?;

        Ok(Some(ReferenceInfo {
            location: StorageLocation::File(path),
            len: bytes.len() as u64,
            enrolled_at: meta.modified().ok().map(DateTime::<Utc>::from),
            sha256: Fingerprint::of(&bytes),
        }))
    }

    fn clear(&self) -> Result<bool, StoreError> {
        match fs::remove_file(self.path()) {
            Ok(()) => {
                tracing::info!(path = %self.path().display(), "reference cleared");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.write_error(e)),
        }
    }

    fn location(&self) -> StorageLocation {
        StorageLocation::File(self.path())
    }
}
