//! Durable artifact storage.

pub mod filesystem;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::job::GenerationId;
use crate::template::DocumentFormat;

pub use filesystem::FileArtifactStore;

/// Where a finished document lives and what it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Store-relative location, e.g. `<generation_id>/document-0003.md`.
    pub location: String,
    pub size: u64,
    pub format: DocumentFormat,
    /// BLAKE3 hex digest of the stored bytes.
    pub checksum: String,
}

/// Storage collaborator for generated documents.
///
/// `write` must be idempotent per `(generation_id, index)`: a retried
/// document replaces the earlier attempt at the same location.
pub trait ArtifactStore: Send + Sync {
    fn write(
        &self,
        generation_id: &GenerationId,
        index: usize,
        format: DocumentFormat,
        content: &[u8],
    ) -> Result<Artifact, StorageError>;

    fn read(&self, location: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes every artifact of a generation. Missing data is not an error.
    fn purge(&self, generation_id: &GenerationId) -> Result<(), StorageError>;
}

pub fn checksum(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}
