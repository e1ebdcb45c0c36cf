//! likeness-store — Persistence for the single enrolled reference image.
//!
//! Provides an atomic-replace filesystem store and an in-memory store behind
//! the [`ReferenceStore`] trait.

pub mod fs;
pub mod memory;
pub mod reference;

pub use fs::FsReferenceStore;
pub use memory::MemoryReferenceStore;
pub use reference::{
    Fingerprint, ReferenceInfo, ReferenceStore, StorageLocation, StoreError, DEFAULT_REFERENCE_KEY,
};
