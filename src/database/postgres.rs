// dbbackup/src/database/postgres.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, Utc};
use sqlx::{Connection, PgConnection};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use which::which;

use super::{BackupArtifact, DatabaseBackend, DatabaseServerConfig};
use crate::errors::{BackendError, BackendResult};
use crate::retention::ArtifactNaming;
use crate::storage::{check_cancelled, with_temp_ext};

/// Suffix of a dump that `pg_dump` is still writing.
const DUMP_TEMP_EXTENSION: &str = ".dumping!";

/// PostgreSQL through the `pg_dump` / `pg_restore` client tools, custom archive format.
#[derive(Debug, Clone)]
pub struct PgDumpBackend {
    server_url: Url,
    pg_dump: PathBuf,
    pg_restore: PathBuf,
    dump_root: PathBuf,
    date_mask: String,
    extension: String,
    create_database_if_missing: bool,
}

fn find_executable(name: &str) -> BackendResult<PathBuf> {
    which(name).map_err(|_| {
        BackendError::InvalidInput(format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            name
        ))
    })
}

fn is_valid_database_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl PgDumpBackend {
    /// Locates the client tools and parses the server URL. Does not connect.
    pub fn new(config: &DatabaseServerConfig) -> BackendResult<Self> {
        Self::with_tools(
            config,
            find_executable("pg_dump")?,
            find_executable("pg_restore")?,
        )
    }

    pub fn with_tools(
        config: &DatabaseServerConfig,
        pg_dump: PathBuf,
        pg_restore: PathBuf,
    ) -> BackendResult<Self> {
        let server_url = Url::parse(&config.url).map_err(|e| {
            BackendError::InvalidInput(format!("Invalid database URL format: {}", e))
        })?;
        if !matches!(server_url.scheme(), "postgres" | "postgresql") {
            return Err(BackendError::InvalidInput(format!(
                "Unsupported database URL scheme '{}'",
                server_url.scheme()
            )));
        }
        // fail here rather than mid-run on a bad mask
        ArtifactNaming::new("", &config.date_mask, &config.extension)?;

        Ok(Self {
            server_url,
            pg_dump,
            pg_restore,
            dump_root: config.dump_root.clone(),
            date_mask: config.date_mask.clone(),
            extension: config.extension.clone(),
            create_database_if_missing: config.create_database_if_missing,
        })
    }

    fn database_url(&self, database_name: &str) -> String {
        let mut url = self.server_url.clone();
        url.set_path(&format!("/{}", database_name));
        url.to_string()
    }

    /// Server URL without the password, for logs.
    fn redacted_url(&self) -> String {
        let mut url = self.server_url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }

    fn naming(&self, database_name: &str) -> BackendResult<ArtifactNaming> {
        ArtifactNaming::new(format!("{}_", database_name), &self.date_mask, &self.extension)
    }

    async fn run_tool(
        &self,
        program: &Path,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> BackendResult<()> {
        check_cancelled(cancel)?;
        let mut command = Command::new(program);
        command.args(&args).kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            output = command.output() => output.map_err(|e| BackendError::io(program, e))?,
        };
        if !output.status.success() {
            return Err(BackendError::Command {
                program: program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn ensure_database_exists(&self, database_name: &str) -> BackendResult<()> {
        let admin_url = self.database_url("postgres");
        let mut conn = PgConnection::connect(&admin_url).await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(database_name)
                .fetch_one(&mut conn)
                .await?;

        if !exists {
            if !self.create_database_if_missing {
                return Err(BackendError::InvalidInput(format!(
                    "Database '{}' does not exist and creating missing databases is disabled",
                    database_name
                )));
            }
            info!(database = database_name, "Creating database");
            let mut create_sql = format!(r#"CREATE DATABASE "{}""#, database_name.replace('"', "\"\""));
            let owner = self.server_url.username();
            if !owner.is_empty() {
                create_sql.push_str(&format!(r#" OWNER "{}""#, owner.replace('"', "\"\"")));
            }
            sqlx::query(&create_sql).execute(&mut conn).await?;
        }
        conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for PgDumpBackend {
    fn describe(&self) -> String {
        format!("postgres:{}", self.redacted_url())
    }

    async fn create_backup(
        &self,
        database_name: &str,
        folders_set_name: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<BackupArtifact> {
        if !is_valid_database_name(database_name) {
            return Err(BackendError::InvalidInput(format!(
                "Invalid database name '{}'",
                database_name
            )));
        }
        check_cancelled(cancel)?;

        let file_name = self
            .naming(database_name)?
            .file_name(Local::now().naive_local());
        let folder = self.dump_root.join(folders_set_name);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| BackendError::io(&folder, e))?;
        let target = folder.join(&file_name);
        let staged = with_temp_ext(&target, DUMP_TEMP_EXTENSION);

        info!(database = database_name, file = %target.display(), "Dumping database with pg_dump");
        let args: Vec<OsString> = vec![
            "--format=custom".into(),
            "-f".into(),
            staged.clone().into_os_string(),
            self.database_url(database_name).into(),
        ];
        self.run_tool(&self.pg_dump, args, cancel).await?;

        tokio::fs::rename(&staged, &target)
            .await
            .map_err(|e| BackendError::io(&target, e))?;
        let size = tokio::fs::metadata(&target)
            .await
            .map_err(|e| BackendError::io(&target, e))?
            .len();
        debug!(file = %target.display(), bytes = size, "Dump finished");

        Ok(BackupArtifact {
            name: format!("{}/{}", folders_set_name.trim_matches('/'), file_name),
            size,
            created_at: Utc::now(),
        })
    }

    async fn restore(
        &self,
        database_name: &str,
        artifact: &BackupArtifact,
        cancel: &CancellationToken,
    ) -> BackendResult<()> {
        if !is_valid_database_name(database_name) {
            return Err(BackendError::InvalidInput(format!(
                "Invalid database name '{}'",
                database_name
            )));
        }
        let dump = self.dump_root.join(&artifact.name);
        if !dump.is_file() {
            return Err(BackendError::NotFound(dump.display().to_string()));
        }
        check_cancelled(cancel)?;
        self.ensure_database_exists(database_name).await?;

        info!(database = database_name, file = %dump.display(), "Restoring database with pg_restore");
        let args: Vec<OsString> = vec![
            "--clean".into(),
            "--if-exists".into(),
            "--no-owner".into(),
            "-d".into(),
            self.database_url(database_name).into(),
            dump.into_os_string(),
        ];
        self.run_tool(&self.pg_restore, args, cancel).await
    }
}
