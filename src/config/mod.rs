// dbbackup/src/config/mod.rs
pub mod installer;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use installer::{InstallerSettings, require_installer};

use crate::database::{DatabaseBackend, DatabaseServerConfig, create_database_backend};
use crate::parameters::{
    BackupRestoreParameters, BaseBackupParameters, DEFAULT_DOWNLOAD_TEMP_EXTENSION,
    DEFAULT_UPLOAD_TEMP_EXTENSION, RestoreParameters,
};
use crate::retention::{
    ArtifactNaming, DEFAULT_ARTIFACT_EXTENSION, DEFAULT_DATE_MASK, RetentionRules, RetentionSchema,
};
use crate::storage::{FileStorageData, FileTransferBackend, StorageKind, create_file_manager};

pub const CONFIG_PATH_ENV: &str = "DBBACKUP_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_VERSION_API_TIMEOUT_SECS: u64 = 30;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDatabaseServer {
    pub url: Option<String>,
    pub dump_root: Option<PathBuf>,
    pub create_database_if_missing: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonStorageConfig {
    pub name: Option<String>,
    pub kind: Option<StorageKind>,
    pub root: Option<String>,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonBackupOptions {
    pub database_name: Option<String>,
    pub folders_set_name: Option<String>,
    pub local_path: Option<PathBuf>,
    pub need_download_from_source: Option<bool>,
    pub need_upload_to_exchange: Option<bool>,
    pub download_temp_extension: Option<String>,
    pub upload_temp_extension: Option<String>,
    pub artifact_date_mask: Option<String>,
    pub artifact_extension: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRetention {
    pub keep_last: Option<usize>,
    pub days: Option<u32>,
    pub weeks: Option<u32>,
    pub months: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonVersionApi {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_server: Option<JsonDatabaseServer>,
    pub source_storage: Option<JsonStorageConfig>,
    pub exchange_storage: Option<JsonStorageConfig>,
    pub backup: Option<JsonBackupOptions>,
    pub local_retention: Option<JsonRetention>,
    pub exchange_retention: Option<JsonRetention>,
    pub installer: Option<InstallerSettings>,
    pub version_api: Option<JsonVersionApi>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub database_name: String,
    pub folders_set_name: String,
    pub local_path: PathBuf,
    pub need_download_from_source: bool,
    pub need_upload_to_exchange: bool,
    pub download_temp_extension: String,
    pub upload_temp_extension: String,
    pub naming: ArtifactNaming,
    pub local_retention: Option<RetentionSchema>,
    pub exchange_retention: Option<RetentionSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_server: Option<DatabaseServerConfig>,
    pub source_storage: Option<FileStorageData>,
    pub exchange_storage: Option<FileStorageData>,
    pub backup: BackupConfig,
    pub version_api: Option<VersionApiConfig>,
    pub raw_json_config: RawJsonConfig, // Store the parsed raw config
}

/// `config.json` location, overridable through `DBBACKUP_CONFIG`.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to load config file at {}",
                config_path.display()
            )
        })
    }

    pub fn from_json_str(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig = serde_json::from_str(config_content)?;
        let backup = load_backup_config_from_json(&raw_json_config)?;

        Ok(AppConfig {
            database_server: load_database_server_config(&raw_json_config, &backup.naming),
            source_storage: load_source_storage(&raw_json_config)?,
            exchange_storage: raw_json_config
                .exchange_storage
                .as_ref()
                .map(|s| storage_from_json(s, "exchange", "")),
            version_api: load_version_api_config(&raw_json_config)?,
            backup,
            raw_json_config,
        })
    }

    pub fn installer(&self) -> Option<&InstallerSettings> {
        self.raw_json_config.installer.as_ref()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.trim().is_empty())
}

fn storage_from_json(raw: &JsonStorageConfig, default_name: &str, default_root: &str) -> FileStorageData {
    FileStorageData {
        name: non_empty(&raw.name).unwrap_or_else(|| default_name.to_string()),
        kind: raw.kind.unwrap_or_default(),
        root: raw.root.clone().unwrap_or_else(|| default_root.to_string()),
        endpoint_url: non_empty(&raw.endpoint_url),
        region: non_empty(&raw.region),
        bucket_name: non_empty(&raw.bucket_name),
        access_key_id: non_empty(&raw.access_key_id),
        secret_access_key: non_empty(&raw.secret_access_key),
    }
}

/// The source tier defaults to the database server's dump directory. Dumps
/// are written to and read from `dump_root` on this host, so an explicit
/// source storage must be that same local directory.
fn load_source_storage(raw_config: &RawJsonConfig) -> Result<Option<FileStorageData>> {
    let dump_root = raw_config
        .database_server
        .as_ref()
        .and_then(|s| s.dump_root.clone());

    let storage = match (&raw_config.source_storage, &dump_root) {
        (Some(raw), dump_root) => storage_from_json(
            raw,
            "source",
            &dump_root
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        (None, Some(dump_root)) => FileStorageData::local("source", dump_root.to_string_lossy()),
        (None, None) => return Ok(None),
    };

    if let Some(dump_root) = &dump_root {
        if storage.kind != StorageKind::Local || Path::new(&storage.root) != dump_root.as_path() {
            anyhow::bail!(
                "source_storage '{}' must be the local directory database_server.dump_root ({})",
                storage.name,
                dump_root.display()
            );
        }
    }
    Ok(Some(storage))
}

fn load_database_server_config(
    raw_config: &RawJsonConfig,
    naming: &ArtifactNaming,
) -> Option<DatabaseServerConfig> {
    let server = raw_config.database_server.as_ref()?;
    let (Some(url), Some(dump_root)) = (non_empty(&server.url), server.dump_root.clone()) else {
        warn!("database_server in config.json needs both url and dump_root; database operations will be disabled.");
        return None;
    };
    Some(DatabaseServerConfig {
        url,
        dump_root,
        date_mask: naming.mask().to_string(),
        extension: naming.extension().to_string(),
        create_database_if_missing: server.create_database_if_missing.unwrap_or(false),
    })
}

fn retention_from_json(raw: &JsonRetention, naming: &ArtifactNaming) -> RetentionSchema {
    RetentionSchema::new(
        RetentionRules {
            keep_last: raw.keep_last.unwrap_or(1),
            days: raw.days.unwrap_or(0),
            weeks: raw.weeks.unwrap_or(0),
            months: raw.months.unwrap_or(0),
        },
        naming.clone(),
    )
}

/// Missing fields come through empty so that the validator can report them
/// all at once; only malformed values fail here.
pub fn load_backup_config_from_json(raw_config: &RawJsonConfig) -> Result<BackupConfig> {
    let options = raw_config.backup.clone().unwrap_or_default();
    let database_name = options.database_name.unwrap_or_default();

    let naming = ArtifactNaming::new(
        format!("{}_", database_name),
        options
            .artifact_date_mask
            .unwrap_or_else(|| DEFAULT_DATE_MASK.to_string()),
        options
            .artifact_extension
            .unwrap_or_else(|| DEFAULT_ARTIFACT_EXTENSION.to_string()),
    )
    .context("backup.artifact_date_mask / backup.artifact_extension in config.json are invalid")?;

    Ok(BackupConfig {
        folders_set_name: options.folders_set_name.unwrap_or_default(),
        local_path: options.local_path.unwrap_or_default(),
        need_download_from_source: options.need_download_from_source.unwrap_or(true),
        need_upload_to_exchange: options.need_upload_to_exchange.unwrap_or(false),
        download_temp_extension: options
            .download_temp_extension
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_TEMP_EXTENSION.to_string()),
        upload_temp_extension: options
            .upload_temp_extension
            .unwrap_or_else(|| DEFAULT_UPLOAD_TEMP_EXTENSION.to_string()),
        local_retention: raw_config
            .local_retention
            .as_ref()
            .map(|r| retention_from_json(r, &naming)),
        exchange_retention: raw_config
            .exchange_retention
            .as_ref()
            .map(|r| retention_from_json(r, &naming)),
        database_name,
        naming,
    })
}

pub fn load_version_api_config(raw_config: &RawJsonConfig) -> Result<Option<VersionApiConfig>> {
    let Some(api) = &raw_config.version_api else {
        return Ok(None);
    };
    let base_url = non_empty(&api.base_url).context("version_api.base_url must be set in config.json")?;
    url::Url::parse(&base_url)
        .with_context(|| format!("version_api.base_url '{}' is not a valid URL", base_url))?;

    Ok(Some(VersionApiConfig {
        base_url,
        timeout: Duration::from_secs(api.timeout_secs.unwrap_or(DEFAULT_VERSION_API_TIMEOUT_SECS)),
    }))
}

async fn build_file_manager(
    storage: Option<&FileStorageData>,
) -> Option<Arc<dyn FileTransferBackend>> {
    let storage = storage?;
    match create_file_manager(storage).await {
        Ok(manager) => Some(manager),
        Err(e) => {
            warn!(storage = %storage.name, error = %e, "Could not create file manager");
            None
        }
    }
}

fn build_database_backend(config: Option<&DatabaseServerConfig>) -> Option<Arc<dyn DatabaseBackend>> {
    let config = config?;
    match create_database_backend(config) {
        Ok(backend) => Some(backend),
        Err(e) => {
            warn!(error = %e, "Could not create database server client");
            None
        }
    }
}

async fn build_local_file_manager(local_path: &Path) -> Option<Arc<dyn FileTransferBackend>> {
    if local_path.as_os_str().is_empty() {
        return None;
    }
    let storage = FileStorageData::local("local", local_path.to_string_lossy());
    build_file_manager(Some(&storage)).await
}

async fn build_source(app_config: &AppConfig) -> BackupRestoreParameters {
    let backup = &app_config.backup;
    BackupRestoreParameters::builder()
        .database_backend(build_database_backend(app_config.database_server.as_ref()))
        .file_transfer_backend(build_file_manager(app_config.source_storage.as_ref()).await)
        .retention_schema(backup.exchange_retention.clone())
        .database_name(backup.database_name.clone())
        .db_server_folders_set_name(backup.folders_set_name.clone())
        .file_storage(app_config.source_storage.clone())
        .build()
}

/// Builds every backend the configuration describes. Backends that cannot be
/// created are left out and reported by the validator.
pub async fn build_backup_parameters(app_config: &AppConfig) -> BaseBackupParameters {
    let backup = &app_config.backup;
    BaseBackupParameters::builder(build_source(app_config).await)
        .need_download_from_source(backup.need_download_from_source)
        .download_temp_extension(backup.download_temp_extension.clone())
        .local_file_transfer_backend(build_local_file_manager(&backup.local_path).await)
        .local_retention_schema(backup.local_retention.clone())
        .need_upload_to_exchange(backup.need_upload_to_exchange)
        .exchange_file_transfer_backend(build_file_manager(app_config.exchange_storage.as_ref()).await)
        .upload_temp_extension(backup.upload_temp_extension.clone())
        .local_path(backup.local_path.clone())
        .artifact_naming(Some(backup.naming.clone()))
        .build()
}

pub async fn build_restore_parameters(
    app_config: &AppConfig,
    artifact_name: Option<String>,
) -> RestoreParameters {
    let backup = &app_config.backup;
    RestoreParameters::new(build_source(app_config).await, backup.local_path.clone())
        .with_local_file_transfer_backend(build_local_file_manager(&backup.local_path).await)
        .with_upload_temp_extension(backup.upload_temp_extension.clone())
        .with_artifact_name(artifact_name)
        .with_artifact_naming(Some(backup.naming.clone()))
}
