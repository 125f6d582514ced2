//! Durable storage for compiled plugin artifacts.

pub mod storage;

pub use storage::{
    artifact_key, sanitize_filename, ArtifactStorage, LocalArtifactStorage, S3ArtifactStorage,
    StorageError, StoredArtifact,
};
