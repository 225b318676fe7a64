//! A filesystem-backed [`ObjectStore`].
//!
//! Keys are relative paths under a root directory, sharded by date so a long-running deployment
//! does not accumulate one giant flat directory. Objects are write-once; there is no delete.

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::*;
use rand::distributions::{Alphanumeric, DistString};
use tokio::{fs, io::AsyncWriteExt};

use crate::traits::{ObjectStore, ObjectStoreError};

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generate_key(ext_hint: &str) -> String {
        let now = Utc::now();
        let name = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let ext = ext_hint.trim_start_matches('.');
        if ext.is_empty() {
            format!("{}/{name}", now.format("%Y/%m/%d"))
        } else {
            format!("{}/{name}.{ext}", now.format("%Y/%m/%d"))
        }
    }

    /// Keys come from `generate_key` or from callers building them out of trusted fields, but a
    /// stored key that escapes the root would be a path traversal hole, so reject it outright.
    fn resolve(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let rel = Path::new(key);
        let escapes = rel.is_absolute() ||
            rel.components().any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes {
            return Err(ObjectStoreError::Io(format!("Invalid object key: {key}")));
        }
        Ok(self.root.join(rel))
    }

    async fn store(&self, path: &Path, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // create_new makes the existence check and the create a single syscall
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ObjectStoreError::AlreadyExists(key.to_string()));
            },
            Err(e) => return Err(e.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;
        debug!("🗄️ Stored {} bytes at {key}", data.len());
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    async fn save(&self, data: &[u8], ext_hint: &str) -> Result<String, ObjectStoreError> {
        let key = Self::generate_key(ext_hint);
        let path = self.resolve(&key)?;
        self.store(&path, &key, data).await?;
        Ok(key)
    }

    async fn write_at(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        let path = self.resolve(key)?;
        self.store(&path, key, data).await
    }
}
