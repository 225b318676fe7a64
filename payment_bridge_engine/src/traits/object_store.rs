use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ObjectStoreError {
    #[error("I/O error accessing object storage: {0}")]
    Io(String),
    #[error("Object {0} already exists. Stored objects are immutable")]
    AlreadyExists(String),
}

impl From<std::io::Error> for ObjectStoreError {
    fn from(e: std::io::Error) -> Self {
        ObjectStoreError::Io(e.to_string())
    }
}

/// Write-once blob storage for downloaded bill files.
///
/// Content is opaque and immutable: `save` picks a fresh key, `write_at` writes to a
/// caller-chosen key and fails if anything is already stored there.
pub trait ObjectStore {
    /// Stores `data` under a newly generated key and returns that key. `ext_hint` is a filename
    /// extension hint (e.g. `csv`, `txt.gz`) used where the backing store supports it.
    fn save(
        &self,
        data: &[u8],
        ext_hint: &str,
    ) -> impl std::future::Future<Output = Result<String, ObjectStoreError>> + Send;

    /// Stores `data` under the given key. Fails with [`ObjectStoreError::AlreadyExists`] if the
    /// key is taken.
    fn write_at(
        &self,
        key: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<(), ObjectStoreError>> + Send;
}
