// dbbackup/src/database/mod.rs
//! Database engines that can produce and consume backup files.

pub(crate) mod postgres;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::BackendResult;

pub use postgres::PgDumpBackend;

/// A backup file produced by a [`DatabaseBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    /// Path relative to the source storage root, `<folders set>/<file name>`.
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl BackupArtifact {
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    fn describe(&self) -> String;

    /// Dumps `database_name` into the server folder set `folders_set_name`.
    async fn create_backup(
        &self,
        database_name: &str,
        folders_set_name: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<BackupArtifact>;

    /// Loads `artifact`, already present in the server folder set, into `database_name`.
    async fn restore(
        &self,
        database_name: &str,
        artifact: &BackupArtifact,
        cancel: &CancellationToken,
    ) -> BackendResult<()>;
}

/// Connection and layout of the database server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseServerConfig {
    /// Server URL; any database path in it is replaced per operation.
    pub url: String,
    /// Directory holding the server's folder sets.
    pub dump_root: PathBuf,
    pub date_mask: String,
    pub extension: String,
    pub create_database_if_missing: bool,
}

pub fn create_database_backend(
    config: &DatabaseServerConfig,
) -> BackendResult<Arc<dyn DatabaseBackend>> {
    Ok(Arc::new(PgDumpBackend::new(config)?))
}
