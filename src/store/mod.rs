//! Storage collaborators: artifact blobs and serving records.

pub mod artifact;
pub mod records;

pub use artifact::{
    compute_hash, file_extension, sanitize_filename, ArtifactStore, FsArtifactStore, StorageStats,
    StoredArtifact,
};
pub use records::{JobFilter, MemoryRecordStore, ModelFilter, RecordStore};
