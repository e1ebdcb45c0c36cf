//! Reference store contract and the types shared by its implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Logical name of the single enrolled reference.
pub const DEFAULT_REFERENCE_KEY: &str = "enrolled_face";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write reference at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read reference at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid reference key: {0:?}")]
    InvalidKey(String),
}

/// Where a reference lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum StorageLocation {
    File(PathBuf),
    Memory(String),
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::File(path) => write!(f, "{}", path.display()),
            StorageLocation::Memory(key) => write!(f, "memory:{key}"),
        }
    }
}

/// SHA-256 of a stored reference's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Metadata about the current reference, without its bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceInfo {
    pub location: StorageLocation,
    pub len: u64,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub sha256: Fingerprint,
}

/// Key-addressed slot holding at most one enrolled reference image.
///
/// Absence is `Ok(None)`, never an error. Writes replace the previous
/// reference atomically: a reader sees either the old bytes or the new ones.
pub trait ReferenceStore: Send + Sync {
    /// Persist `bytes`, replacing any previous reference.
    fn save(&self, bytes: &[u8]) -> Result<StorageLocation, StoreError>;

    /// Return the stored bytes, or `None` if nothing is enrolled.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    fn info(&self) -> Result<Option<ReferenceInfo>, StoreError>;

    /// Remove the reference. Returns whether one existed.
    fn clear(&self) -> Result<bool, StoreError>;

    fn location(&self) -> StorageLocation;
}

impl<T: ReferenceStore + ?Sized> ReferenceStore for Box<T> {
    fn save(&self, bytes: &[u8]) -> Result<StorageLocation, StoreError> {
        (**self).save(bytes)
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load()
    }

    fn info(&self) -> Result<Option<ReferenceInfo>, StoreError> {
        (**self).info()
    }

    fn clear(&self) -> Result<bool, StoreError> {
        (**self).clear()
    }

    fn location(&self) -> StorageLocation {
        (**self).location()
    }
}

impl<T: ReferenceStore + ?Sized> ReferenceStore for Arc<T> {
    fn save(&self, bytes: &[u8]) -> Result<StorageLocation, StoreError> {
        (**self).save(bytes)
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load()
    }

    fn info(&self) -> Result<Option<ReferenceInfo>, StoreError> {
        (**self).info()
    }

    fn clear(&self) -> Result<bool, StoreError> {
        (**self).clear()
    }

    fn location(&self) -> StorageLocation {
        (**self).location()
    }
}

/// Keys become file names, so they must be a single plain path component.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
        || key.len() > 128;
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex() {
        // SHA-256("")
        assert_eq!(
            Fingerprint::of(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        assert_ne!(Fingerprint::of(b"a"), Fingerprint::of(b"b"));
        assert_eq!(Fingerprint::of(b"a"), Fingerprint::of(b"a"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(DEFAULT_REFERENCE_KEY).is_ok());
        assert!(validate_key("face-2.jpg").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b", "nul\0"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_location_serializes_tagged() {
        let loc = StorageLocation::Memory(DEFAULT_REFERENCE_KEY.into());
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["kind"], "memory");
        assert_eq!(json["at"], "enrolled_face");
    }
}
