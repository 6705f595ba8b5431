// dbbackup/src/storage/mod.rs
//! File transfer backends, one per storage tier.

pub(crate) mod local;
pub(crate) mod s3;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::errors::{BackendError, BackendResult};

pub use local::LocalFileManager;
pub use s3::S3FileManager;

/// A file as seen by [`FileTransferBackend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the backend root, usable with `download` and `delete`.
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl FileEntry {
    /// Last path segment of `name`.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Storage medium of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

/// Where a storage tier lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorageData {
    pub name: String,
    pub kind: StorageKind,
    /// Directory for local storage, key prefix for S3.
    pub root: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl FileStorageData {
    pub fn local(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StorageKind::Local,
            root: root.into(),
            endpoint_url: None,
            region: None,
            bucket_name: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Moves artifacts in and out of one storage tier.
///
/// Writes are staged under `<name><temp_ext>` and only committed to `<name>`
/// once the full content is in place and its size verified, so a reader of the
/// final name never observes a partial file. An interrupted transfer may leave
/// the staged file behind.
#[async_trait]
pub trait FileTransferBackend: Send + Sync {
    /// Short label used in logs.
    fn describe(&self) -> String;

    /// Files directly inside `folder` (`""` is the root), ordered by name.
    async fn list(&self, folder: &str, cancel: &CancellationToken) -> BackendResult<Vec<FileEntry>>;

    /// Copies `local_file` into this tier as `remote_name`. Returns the byte count.
    async fn upload(
        &self,
        local_file: &Path,
        remote_name: &str,
        temp_ext: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<u64>;

    /// Copies `remote_name` out of this tier to `local_file`. Returns the byte count.
    async fn download(
        &self,
        remote_name: &str,
        local_file: &Path,
        temp_ext: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<u64>;

    /// Removes `name`; absent names are not an error.
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> BackendResult<()>;
}

/// Builds the backend described by `storage`.
pub async fn create_file_manager(
    storage: &FileStorageData,
) -> BackendResult<Arc<dyn FileTransferBackend>> {
    match storage.kind {
        StorageKind::Local => Ok(Arc::new(LocalFileManager::new(&storage.root)?)),
        StorageKind::S3 => Ok(Arc::new(S3FileManager::from_storage(storage).await?)),
    }
}

/// `<path><ext>` without touching the existing extension.
pub(crate) fn with_temp_ext(path: &Path, temp_ext: &str) -> PathBuf {
    let mut staged = path.as_os_str().to_os_string();
    staged.push(temp_ext);
    PathBuf::from(staged)
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> BackendResult<()> {
    if cancel.is_cancelled() {
        Err(BackendError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_temp_ext_appends() {
        let staged = with_temp_ext(Path::new("/var/backups/db1/db1_20240101.bak"), ".down!");
        assert_eq!(staged, PathBuf::from("/var/backups/db1/db1_20240101.bak.down!"));
    }

    #[test]
    fn test_file_entry_file_name() {
        let entry = FileEntry {
            name: "main/db1_20240101.bak".into(),
            size: 1,
            created_at: Utc::now(),
        };
        assert_eq!(entry.file_name(), "db1_20240101.bak");
    }

    #[tokio::test]
    async fn test_create_local_file_manager() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorageData::local("local", dir.path().to_string_lossy());
        let manager = create_file_manager(&storage).await.unwrap();
        assert!(manager.describe().starts_with("local:"));
    }
}
