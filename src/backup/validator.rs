// dbbackup/src/backup/validator.rs
//! Pre-flight checks. Every check runs; the caller gets all violations at once.
//! Nothing here touches the disk or the network.

use std::path::PathBuf;
use std::sync::Arc;

use crate::database::DatabaseBackend;
use crate::errors::{ErrorCode, Failure, Failures};
use crate::parameters::{BackupRestoreParameters, BaseBackupParameters, RestoreParameters};
use crate::retention::{ArtifactNaming, RetentionSchema};
use crate::storage::{FileStorageData, FileTransferBackend};

/// The database server side of a run, with every handle present.
pub struct ValidatedSource {
    pub database_name: String,
    pub folders_set_name: String,
    pub database_backend: Arc<dyn DatabaseBackend>,
    pub transfer: Arc<dyn FileTransferBackend>,
    pub storage: FileStorageData,
}

pub struct ExchangeTier {
    pub transfer: Arc<dyn FileTransferBackend>,
    pub retention: Option<RetentionSchema>,
}

/// A backup run that passed validation.
pub struct ValidatedBackup {
    pub source: ValidatedSource,
    pub naming: ArtifactNaming,
    pub local_path: PathBuf,
    pub local_transfer: Arc<dyn FileTransferBackend>,
    pub local_retention: Option<RetentionSchema>,
    pub download: Option<String>,
    /// Present iff upload to exchange was requested.
    pub exchange: Option<(ExchangeTier, String)>,
}

/// A restore run that passed validation.
pub struct ValidatedRestore {
    pub source: ValidatedSource,
    pub naming: ArtifactNaming,
    pub local_path: PathBuf,
    pub local_transfer: Arc<dyn FileTransferBackend>,
    pub upload_temp_extension: String,
    pub artifact_name: Option<String>,
}

fn check_source(params: &BackupRestoreParameters, errors: &mut Vec<Failure>) -> Option<ValidatedSource> {
    if params.database_name().trim().is_empty() {
        errors.push(ErrorCode::SourceDatabaseNameDoesNotSpecified.into());
    }
    if params.db_server_folders_set_name().trim().is_empty() {
        errors.push(ErrorCode::FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified.into());
    }
    if params.database_backend().is_none() {
        errors.push(ErrorCode::CanNotCreateDatabaseServerClient.into());
    }
    if params.file_storage().is_none() || params.file_transfer_backend().is_none() {
        errors.push(ErrorCode::SourceFileStorageAndSourceFileManagerIsNotCreated.into());
    }

    Some(ValidatedSource {
        database_name: params.database_name().to_string(),
        folders_set_name: params.db_server_folders_set_name().to_string(),
        database_backend: params.database_backend()?.clone(),
        transfer: params.file_transfer_backend()?.clone(),
        storage: params.file_storage()?.clone(),
    })
}

fn naming_for(params: &BackupRestoreParameters, explicit: Option<&ArtifactNaming>) -> Option<ArtifactNaming> {
    match explicit {
        Some(naming) => Some(naming.clone()),
        None => ArtifactNaming::for_database(params.database_name()).ok(),
    }
}

fn check_temp_extension(
    ext: &str,
    empty_code: ErrorCode,
    naming: Option<&ArtifactNaming>,
    errors: &mut Vec<Failure>,
) {
    if ext.trim().is_empty() {
        errors.push(empty_code.into());
    } else if naming.is_some_and(|n| n.extension() == ext) {
        errors.push(Failure::with_detail(
            ErrorCode::TempExtensionMatchesArtifactExtension,
            format!("'{}'", ext),
        ));
    }
}

pub fn validate_backup(params: &BaseBackupParameters) -> Result<ValidatedBackup, Failures> {
    let mut errors = Vec::new();

    if params.local_path().as_os_str().is_empty() {
        errors.push(ErrorCode::LocalPathIsNotSpecifiedInParameters.into());
    }
    let source = check_source(params.source(), &mut errors);
    if params.local_file_transfer_backend().is_none() {
        errors.push(ErrorCode::LocalFileManagerIsNotCreated.into());
    }
    if params.need_upload_to_exchange() && params.exchange_file_transfer_backend().is_none() {
        errors.push(ErrorCode::ExchangeFileManagerIsNotCreated.into());
    }

    let naming = naming_for(params.source(), params.artifact_naming());
    check_temp_extension(
        params.download_temp_extension(),
        ErrorCode::DownloadTempExtensionIsEmpty,
        naming.as_ref(),
        &mut errors,
    );
    check_temp_extension(
        params.upload_temp_extension(),
        ErrorCode::UploadTempExtensionIsEmpty,
        naming.as_ref(),
        &mut errors,
    );

    if let Some(failures) = Failures::from_vec(errors) {
        return Err(failures);
    }

    // every handle is present once no error was recorded
    let (Some(source), Some(naming), Some(local_transfer)) =
        (source, naming, params.local_file_transfer_backend().cloned())
    else {
        return Err(ErrorCode::LocalFileManagerIsNotCreated.into());
    };

    let exchange = match params.exchange_file_transfer_backend() {
        Some(transfer) if params.need_upload_to_exchange() => Some((
            ExchangeTier {
                transfer: transfer.clone(),
                retention: params.source().retention_schema().cloned(),
            },
            params.upload_temp_extension().to_string(),
        )),
        _ => None,
    };

    Ok(ValidatedBackup {
        source,
        naming,
        local_path: params.local_path().to_path_buf(),
        local_transfer,
        local_retention: params.local_retention_schema().cloned(),
        download: params
            .need_download_from_source()
            .then(|| params.download_temp_extension().to_string()),
        exchange,
    })
}

pub fn validate_restore(params: &RestoreParameters) -> Result<ValidatedRestore, Failures> {
    let mut errors = Vec::new();

    if params.local_path().as_os_str().is_empty() {
        errors.push(ErrorCode::LocalPathIsNotSpecifiedInParameters.into());
    }
    let source = check_source(params.source(), &mut errors);
    if params.local_file_transfer_backend().is_none() {
        errors.push(ErrorCode::LocalFileManagerIsNotCreated.into());
    }
    let naming = naming_for(params.source(), params.artifact_naming());
    check_temp_extension(
        params.upload_temp_extension(),
        ErrorCode::UploadTempExtensionIsEmpty,
        naming.as_ref(),
        &mut errors,
    );

    if let Some(failures) = Failures::from_vec(errors) {
        return Err(failures);
    }
    let (Some(source), Some(naming), Some(local_transfer)) =
        (source, naming, params.local_file_transfer_backend().cloned())
    else {
        return Err(ErrorCode::LocalFileManagerIsNotCreated.into());
    };

    Ok(ValidatedRestore {
        source,
        naming,
        local_path: params.local_path().to_path_buf(),
        local_transfer,
        upload_temp_extension: params.upload_temp_extension().to_string(),
        artifact_name: params.artifact_name().map(str::to_string),
    })
}
