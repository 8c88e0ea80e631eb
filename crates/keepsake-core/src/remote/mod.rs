//! Remote blob store contract.
//!
//! The remote is a flat namespace of named blobs with no append primitive.
//! Blob ids are opaque to callers; names may contain `/`. Two backends ship
//! with the crate: [`MemoryBlobStore`] for tests and embedding, and
//! [`DirBlobStore`] which mirrors blobs into a local directory (a synced
//! folder, a mounted bucket).

pub mod dir;
pub mod memory;

pub use dir::DirBlobStore;
pub use memory::MemoryBlobStore;

use std::io;

/// Opaque blob identifier assigned by the store.
pub type BlobId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub id: BlobId,
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub modified_time: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    #[error("invalid blob name: {0}")]
    InvalidName(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Named-blob storage.
pub trait BlobStore: Send + Sync {
    /// Id of the blob called `name`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be queried.
    fn find_by_name(&self, name: &str) -> Result<Option<BlobId>, BlobError>;

    /// Every blob in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote cannot be listed.
    fn list(&self) -> Result<Vec<BlobMeta>, BlobError>;

    /// Write `bytes` under `name`, replacing any existing blob of that name.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    fn create_or_replace(&self, name: &str, bytes: &[u8]) -> Result<BlobId, BlobError>;

    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] for an unknown id, or a transport error.
    fn read(&self, id: &str) -> Result<Vec<u8>, BlobError>;

    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] for an unknown id, or a transport error.
    fn delete(&self, id: &str) -> Result<(), BlobError>;
}

/// Read the blob called `name` as UTF-8 text, if it exists.
///
/// # Errors
///
/// Returns an error if the lookup or download fails, or the blob is not UTF-8.
pub fn read_text(store: &dyn BlobStore, name: &str) -> Result<Option<(BlobId, String)>, BlobError> {
    let Some(id) = store.find_by_name(name)? else {
        return Ok(None);
    };
    let bytes = store.read(&id)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| BlobError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(Some((id, text)))
}
