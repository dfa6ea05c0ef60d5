//! Directory-backed store.
//!
//! Each key maps to `<root>/<hex(key)>.bin`. Hex encoding keeps arbitrary
//! participant identifiers out of path syntax. Writes go to an owner-only
//! staging file that is renamed into place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use super::InsecureLocalStore;
use crate::error::{Error, Result};

/// Store that writes one file per key under a root directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::StorageError(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", hex::encode(key.as_bytes())))
    }

    /// Unique per call, so concurrent writers of one key never share a file
    fn staging_path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{:016x}.tmp",
            hex::encode(key.as_bytes()),
            rand::random::<u64>()
        ))
    }
}

/// Write `value` to a fresh owner-only file at `staging`, then move it over
/// `path`
async fn write_staged(staging: &Path, path: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(staging).await?;
    file.write_all(value).await?;
    file.sync_all().await?;
    drop(file);

    // umask may have narrowed the creation mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(staging, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(staging, path).await
}

#[async_trait]
impl InsecureLocalStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageError(format!("failed to read {}: {}", key, e))),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let staging = self.staging_path_for(key);

        let result = write_staged(&staging, &path, value).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&staging).await {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Could not remove {}: {}", staging.display(), e);
                }
            }
        }
        result.map_err(|e| Error::StorageError(format!("failed to write {}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::StorageError(format!("failed to delete {}: {}", key, e))),
        }
    }
}
