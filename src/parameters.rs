// dbbackup/src/parameters.rs
//! Parameter objects describing one backup or restore run.
//!
//! Both are assembled through builders and are read-only once built. Backends
//! are optional here: a backend that could not be constructed is simply absent,
//! and the validator reports it together with every other problem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::DatabaseBackend;
use crate::retention::{ArtifactNaming, RetentionSchema};
use crate::storage::{FileStorageData, FileTransferBackend};

pub const DEFAULT_DOWNLOAD_TEMP_EXTENSION: &str = ".down!";
pub const DEFAULT_UPLOAD_TEMP_EXTENSION: &str = ".up!";

/// Database, its server-side storage and the retention of the remote tier.
#[derive(Clone, Default)]
pub struct BackupRestoreParameters {
    database_backend: Option<Arc<dyn DatabaseBackend>>,
    file_transfer_backend: Option<Arc<dyn FileTransferBackend>>,
    retention_schema: Option<RetentionSchema>,
    database_name: String,
    db_server_folders_set_name: String,
    file_storage: Option<FileStorageData>,
}

impl BackupRestoreParameters {
    pub fn builder() -> BackupRestoreParametersBuilder {
        BackupRestoreParametersBuilder::default()
    }

    pub fn database_backend(&self) -> Option<&Arc<dyn DatabaseBackend>> {
        self.database_backend.as_ref()
    }

    pub fn file_transfer_backend(&self) -> Option<&Arc<dyn FileTransferBackend>> {
        self.file_transfer_backend.as_ref()
    }

    /// Retention applied on the exchange tier.
    pub fn retention_schema(&self) -> Option<&RetentionSchema> {
        self.retention_schema.as_ref()
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn db_server_folders_set_name(&self) -> &str {
        &self.db_server_folders_set_name
    }

    pub fn file_storage(&self) -> Option<&FileStorageData> {
        self.file_storage.as_ref()
    }
}

impl fmt::Debug for BackupRestoreParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupRestoreParameters")
            .field("database_backend", &self.database_backend.as_ref().map(|b| b.describe()))
            .field(
                "file_transfer_backend",
                &self.file_transfer_backend.as_ref().map(|b| b.describe()),
            )
            .field("retention_schema", &self.retention_schema)
            .field("database_name", &self.database_name)
            .field("db_server_folders_set_name", &self.db_server_folders_set_name)
            .field("file_storage", &self.file_storage.as_ref().map(|s| &s.name))
            .finish()
    }
}

#[derive(Default)]
pub struct BackupRestoreParametersBuilder {
    inner: BackupRestoreParameters,
}

impl BackupRestoreParametersBuilder {
    pub fn database_backend(mut self, backend: Option<Arc<dyn DatabaseBackend>>) -> Self {
        self.inner.database_backend = backend;
        self
    }

    pub fn file_transfer_backend(mut self, backend: Option<Arc<dyn FileTransferBackend>>) -> Self {
        self.inner.file_transfer_backend = backend;
        self
    }

    pub fn retention_schema(mut self, schema: Option<RetentionSchema>) -> Self {
        self.inner.retention_schema = schema;
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.inner.database_name = name.into();
        self
    }

    /// The folder set may be chosen after the rest of the parameters are known,
    /// hence the `&mut` setter next to the chained one.
    pub fn set_db_server_folders_set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.inner.db_server_folders_set_name = name.into();
        self
    }

    pub fn db_server_folders_set_name(mut self, name: impl Into<String>) -> Self {
        self.set_db_server_folders_set_name(name);
        self
    }

    pub fn file_storage(mut self, storage: Option<FileStorageData>) -> Self {
        self.inner.file_storage = storage;
        self
    }

    pub fn build(self) -> BackupRestoreParameters {
        self.inner
    }
}

/// Everything a backup run needs: the source, the local staging tier and the
/// optional exchange tier.
#[derive(Clone)]
pub struct BaseBackupParameters {
    source: BackupRestoreParameters,
    need_download_from_source: bool,
    download_temp_extension: String,
    local_file_transfer_backend: Option<Arc<dyn FileTransferBackend>>,
    local_retention_schema: Option<RetentionSchema>,
    need_upload_to_exchange: bool,
    exchange_file_transfer_backend: Option<Arc<dyn FileTransferBackend>>,
    upload_temp_extension: String,
    local_path: PathBuf,
    artifact_naming: Option<ArtifactNaming>,
}

impl BaseBackupParameters {
    pub fn builder(source: BackupRestoreParameters) -> BaseBackupParametersBuilder {
        BaseBackupParametersBuilder {
            inner: BaseBackupParameters {
                source,
                need_download_from_source: true,
                download_temp_extension: DEFAULT_DOWNLOAD_TEMP_EXTENSION.to_string(),
                local_file_transfer_backend: None,
                local_retention_schema: None,
                need_upload_to_exchange: false,
                exchange_file_transfer_backend: None,
                upload_temp_extension: DEFAULT_UPLOAD_TEMP_EXTENSION.to_string(),
                local_path: PathBuf::new(),
                artifact_naming: None,
            },
        }
    }

    pub fn source(&self) -> &BackupRestoreParameters {
        &self.source
    }

    pub fn need_download_from_source(&self) -> bool {
        self.need_download_from_source
    }

    pub fn download_temp_extension(&self) -> &str {
        &self.download_temp_extension
    }

    /// Backend rooted at [`Self::local_path`].
    pub fn local_file_transfer_backend(&self) -> Option<&Arc<dyn FileTransferBackend>> {
        self.local_file_transfer_backend.as_ref()
    }

    pub fn local_retention_schema(&self) -> Option<&RetentionSchema> {
        self.local_retention_schema.as_ref()
    }

    pub fn need_upload_to_exchange(&self) -> bool {
        self.need_upload_to_exchange
    }

    pub fn exchange_file_transfer_backend(&self) -> Option<&Arc<dyn FileTransferBackend>> {
        self.exchange_file_transfer_backend.as_ref()
    }

    pub fn upload_temp_extension(&self) -> &str {
        &self.upload_temp_extension
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Naming of the backup files; falls back to `<db>_%Y%m%d%H%M%S.bak`.
    pub fn artifact_naming(&self) -> Option<&ArtifactNaming> {
        self.artifact_naming.as_ref()
    }
}

impl fmt::Debug for BaseBackupParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseBackupParameters")
            .field("source", &self.source)
            .field("need_download_from_source", &self.need_download_from_source)
            .field("download_temp_extension", &self.download_temp_extension)
            .field(
                "local_file_transfer_backend",
                &self.local_file_transfer_backend.as_ref().map(|b| b.describe()),
            )
            .field("local_retention_schema", &self.local_retention_schema)
            .field("need_upload_to_exchange", &self.need_upload_to_exchange)
            .field(
                "exchange_file_transfer_backend",
                &self.exchange_file_transfer_backend.as_ref().map(|b| b.describe()),
            )
            .field("upload_temp_extension", &self.upload_temp_extension)
            .field("local_path", &self.local_path)
            .finish()
    }
}

pub struct BaseBackupParametersBuilder {
    inner: BaseBackupParameters,
}

impl BaseBackupParametersBuilder {
    pub fn need_download_from_source(mut self, value: bool) -> Self {
        self.inner.need_download_from_source = value;
        self
    }

    pub fn download_temp_extension(mut self, ext: impl Into<String>) -> Self {
        self.inner.download_temp_extension = ext.into();
        self
    }

    pub fn local_file_transfer_backend(mut self, backend: Option<Arc<dyn FileTransferBackend>>) -> Self {
        self.inner.local_file_transfer_backend = backend;
        self
    }

    pub fn local_retention_schema(mut self, schema: Option<RetentionSchema>) -> Self {
        self.inner.local_retention_schema = schema;
        self
    }

    pub fn need_upload_to_exchange(mut self, value: bool) -> Self {
        self.inner.need_upload_to_exchange = value;
        self
    }

    pub fn exchange_file_transfer_backend(
        mut self,
        backend: Option<Arc<dyn FileTransferBackend>>,
    ) -> Self {
        self.inner.exchange_file_transfer_backend = backend;
        self
    }

    pub fn upload_temp_extension(mut self, ext: impl Into<String>) -> Self {
        self.inner.upload_temp_extension = ext.into();
        self
    }

    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.local_path = path.into();
        self
    }

    pub fn artifact_naming(mut self, naming: Option<ArtifactNaming>) -> Self {
        self.inner.artifact_naming = naming;
        self
    }

    pub fn build(self) -> BaseBackupParameters {
        self.inner
    }
}

/// Parameters of a restore run: put a local backup file back on the database
/// server and load it.
#[derive(Clone)]
pub struct RestoreParameters {
    source: BackupRestoreParameters,
    local_path: PathBuf,
    local_file_transfer_backend: Option<Arc<dyn FileTransferBackend>>,
    upload_temp_extension: String,
    artifact_name: Option<String>,
    artifact_naming: Option<ArtifactNaming>,
}

impl RestoreParameters {
    pub fn new(source: BackupRestoreParameters, local_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            local_path: local_path.into(),
            local_file_transfer_backend: None,
            upload_temp_extension: DEFAULT_UPLOAD_TEMP_EXTENSION.to_string(),
            artifact_name: None,
            artifact_naming: None,
        }
    }

    pub fn with_local_file_transfer_backend(
        mut self,
        backend: Option<Arc<dyn FileTransferBackend>>,
    ) -> Self {
        self.local_file_transfer_backend = backend;
        self
    }

    pub fn with_upload_temp_extension(mut self, ext: impl Into<String>) -> Self {
        self.upload_temp_extension = ext.into();
        self
    }

    /// Restore this file instead of the newest local one.
    pub fn with_artifact_name(mut self, name: Option<String>) -> Self {
        self.artifact_name = name;
        self
    }

    pub fn with_artifact_naming(mut self, naming: Option<ArtifactNaming>) -> Self {
        self.artifact_naming = naming;
        self
    }

    pub fn source(&self) -> &BackupRestoreParameters {
        &self.source
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn local_file_transfer_backend(&self) -> Option<&Arc<dyn FileTransferBackend>> {
        self.local_file_transfer_backend.as_ref()
    }

    pub fn upload_temp_extension(&self) -> &str {
        &self.upload_temp_extension
    }

    pub fn artifact_name(&self) -> Option<&str> {
        self.artifact_name.as_deref()
    }

    pub fn artifact_naming(&self) -> Option<&ArtifactNaming> {
        self.artifact_naming.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folders_set_name_is_settable_before_build() {
        let mut builder = BackupRestoreParameters::builder().database_name("db1");
        builder.set_db_server_folders_set_name("main");
        let params = builder.build();
        assert_eq!(params.database_name(), "db1");
        assert_eq!(params.db_server_folders_set_name(), "main");
        assert!(params.database_backend().is_none());
    }

    #[test]
    fn test_base_defaults() {
        let params = BaseBackupParameters::builder(BackupRestoreParameters::default())
            .local_path("/var/backups/db1")
            .build();
        assert!(params.need_download_from_source());
        assert!(!params.need_upload_to_exchange());
        assert_eq!(params.download_temp_extension(), ".down!");
        assert_eq!(params.upload_temp_extension(), ".up!");
        assert_eq!(params.local_path(), Path::new("/var/backups/db1"));
        assert!(format!("{:?}", params).contains("local_path"));
    }
}
