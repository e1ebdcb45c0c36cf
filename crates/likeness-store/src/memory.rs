//! In-process reference store, for embedding and tests.

use crate::reference::{
    validate_key, Fingerprint, ReferenceInfo, ReferenceStore, StorageLocation, StoreError,
    DEFAULT_REFERENCE_KEY,
};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct MemoryReferenceStore {
    key: String,
    slot: Mutex<Option<(Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_REFERENCE_KEY.to_string(),
            slot: Mutex::new(None),
        }
    }

    pub fn with_key(key: &str) -> Result<Self, StoreError> {
        validate_key(key)?;
        Ok(Self {
            key: key.to_string(),
            slot: Mutex::new(None),
        })
    }

    // Replacing an Option is a single move, so a poisoned lock still holds
    // a consistent value.
    fn slot(&self) -> MutexGuard<'_, Option<(Vec<u8>, DateTime<Utc>)>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryReferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn save(&self, bytes: &[u8]) -> Result<StorageLocation, StoreError> {
        *self.slot() = Some((bytes.to_vec(), Utc::now()));
        tracing::debug!(key = %self.key, len = bytes.len(), "reference saved in memory");
        Ok(self.location())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.slot().as_ref().map(|(bytes, _)| bytes.clone()))
    }

    fn info(&self) -> Result<Option<ReferenceInfo>, StoreError> {
        Ok(self.slot().as_ref().map(|(bytes, at)| ReferenceInfo {
            location: self.location(),
            len: bytes.len() as u64,
            enrolled_at: Some(*at),
            sha256: Fingerprint::of(bytes),
        }))
    }

    fn clear(&self) -> Result<bool, StoreError> {
        Ok(self.slot().take().is_some())
    }

    fn location(&self) -> StorageLocation {
        StorageLocation::Memory(self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryReferenceStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(b"one").unwrap();
        store.save(b"two").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some(&b"two"[..]));

        let info = store.info().unwrap().unwrap();
        assert_eq!(info.len, 3);
        assert_eq!(info.location, StorageLocation::Memory("enrolled_face".into()));

        assert!(store.clear().unwrap());
        assert!(!store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_boxed_store_delegates() {
        let store: Box<dyn ReferenceStore> = Box::new(MemoryReferenceStore::new());
        store.save(b"x").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some(&b"x"[..]));
    }
}
