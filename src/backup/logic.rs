// dbbackup/src/backup/logic.rs
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::validator::{ValidatedBackup, validate_backup};
use crate::database::BackupArtifact;
use crate::errors::{BackendResult, ErrorCode, Phase, RunError};
use crate::parameters::BaseBackupParameters;
use crate::retention::{ArtifactNaming, RetentionSchema, prune};
use crate::storage::{FileEntry, FileTransferBackend};

/// States a run passes through, in order. Optional states are skipped when
/// their step was not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Validated,
    Downloaded,
    LocallyPruned,
    Uploaded,
    RemotelyPruned,
    Completed,
}

/// What a successful backup run did.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub states: Vec<PipelineState>,
    /// Artifact created on the database server, if a download was requested.
    pub artifact: Option<BackupArtifact>,
    /// File in the local tier that was downloaded or picked for upload.
    pub local_file: Option<PathBuf>,
    /// Name the artifact was committed under in the exchange tier.
    pub uploaded: Option<String>,
    pub local_deleted: Vec<String>,
    pub exchange_deleted: Vec<String>,
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken, phase: Phase) -> Result<(), RunError> {
    if cancel.is_cancelled() {
        info!(%phase, "Run cancelled before phase");
        return Err(RunError::Cancelled { phase });
    }
    Ok(())
}

/// Newest file in `folder` that matches `naming`, by the timestamp in its name.
pub(crate) async fn newest_artifact(
    backend: &dyn FileTransferBackend,
    naming: &ArtifactNaming,
    folder: &str,
    cancel: &CancellationToken,
) -> BackendResult<Option<FileEntry>> {
    let files = backend.list(folder, cancel).await?;
    Ok(files
        .into_iter()
        .filter_map(|f| naming.timestamp_of(f.file_name()).map(|ts| (ts, f)))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)))
        .map(|(_, f)| f))
}

async fn prune_tier(
    backend: &dyn FileTransferBackend,
    schema: &RetentionSchema,
    folder: &str,
    protected: Option<&str>,
    phase: Phase,
    code: ErrorCode,
    cancel: &CancellationToken,
) -> Result<Vec<String>, RunError> {
    prune(backend, schema, folder, protected, cancel)
        .await
        .map_err(|e| RunError::from_backend(phase, code, e))
}

/// Runs the validated pipeline: source dump and download, local retention,
/// upload to exchange, exchange retention. The first failure stops the run;
/// steps already committed are left in place.
pub async fn perform_backup_orchestration(
    params: &BaseBackupParameters,
    cancel: &CancellationToken,
    run_id: Uuid,
) -> Result<BackupReport, RunError> {
    ensure_not_cancelled(cancel, Phase::Validation)?;
    let plan = validate_backup(params).map_err(|errors| {
        warn!(errors = %errors, "Backup parameters rejected");
        RunError::failed(Phase::Validation, errors)
    })?;

    let mut report = BackupReport {
        run_id,
        states: vec![PipelineState::Validated],
        ..BackupReport::default()
    };

    download_step(&plan, cancel, &mut report).await?;
    local_retention_step(&plan, cancel, &mut report).await?;
    upload_step(&plan, cancel, &mut report).await?;

    report.states.push(PipelineState::Completed);
    Ok(report)
}

async fn download_step(
    plan: &ValidatedBackup,
    cancel: &CancellationToken,
    report: &mut BackupReport,
) -> Result<(), RunError> {
    let Some(temp_ext) = plan.download.as_deref() else {
        return Ok(());
    };
    ensure_not_cancelled(cancel, Phase::Download)?;
    let source = &plan.source;

    let artifact = source
        .database_backend
        .create_backup(&source.database_name, &source.folders_set_name, cancel)
        .await
        .map_err(|e| RunError::from_backend(Phase::Download, ErrorCode::BackupWasNotCreated, e))?;
    info!(artifact = %artifact.name, bytes = artifact.size, "Backup created on database server");

    let local_file = plan.local_path.join(artifact.file_name());
    let bytes = source
        .transfer
        .download(&artifact.name, &local_file, temp_ext, cancel)
        .await
        .map_err(|e| {
            RunError::from_backend(Phase::Download, ErrorCode::DownloadFromSourceFailed, e)
        })?;
    info!(file = %local_file.display(), bytes, "Backup downloaded to local storage");

    report.artifact = Some(artifact);
    report.local_file = Some(local_file);
    report.states.push(PipelineState::Downloaded);
    Ok(())
}

async fn local_retention_step(
    plan: &ValidatedBackup,
    cancel: &CancellationToken,
    report: &mut BackupReport,
) -> Result<(), RunError> {
    let Some(schema) = &plan.local_retention else {
        return Ok(());
    };
    ensure_not_cancelled(cancel, Phase::LocalRetention)?;
    let downloaded = report
        .local_file
        .as_ref()
        .and_then(|f| f.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    report.local_deleted = prune_tier(
        plan.local_transfer.as_ref(),
        schema,
        "",
        downloaded.as_deref(),
        Phase::LocalRetention,
        ErrorCode::LocalRetentionFailed,
        cancel,
    )
    .await?;
    report.states.push(PipelineState::LocallyPruned);
    Ok(())
}

async fn upload_step(
    plan: &ValidatedBackup,
    cancel: &CancellationToken,
    report: &mut BackupReport,
) -> Result<(), RunError> {
    let Some((exchange, temp_ext)) = &plan.exchange else {
        return Ok(());
    };
    ensure_not_cancelled(cancel, Phase::Upload)?;

    let local_file = match &report.local_file {
        Some(file) => file.clone(),
        None => {
            let naming = plan
                .local_retention
                .as_ref()
                .map(|s| &s.naming)
                .unwrap_or(&plan.naming);
            let newest = newest_artifact(plan.local_transfer.as_ref(), naming, "", cancel)
                .await
                .map_err(|e| {
                    RunError::from_backend(Phase::Upload, ErrorCode::NoLocalArtifactToUpload, e)
                })?
                .ok_or_else(|| RunError::failed(Phase::Upload, ErrorCode::NoLocalArtifactToUpload))?;
            plan.local_path.join(&newest.name)
        }
    };
    let file_name = local_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RunError::failed(Phase::Upload, ErrorCode::NoLocalArtifactToUpload))?;
    let remote_name = format!("{}/{}", plan.source.folders_set_name, file_name);

    let bytes = exchange
        .transfer
        .upload(&local_file, &remote_name, temp_ext, cancel)
        .await
        .map_err(|e| RunError::from_backend(Phase::Upload, ErrorCode::UploadToExchangeFailed, e))?;
    info!(tier = %exchange.transfer.describe(), file = %remote_name, bytes, "Backup uploaded to exchange storage");
    report.local_file = Some(local_file);
    report.uploaded = Some(remote_name);
    report.states.push(PipelineState::Uploaded);

    if let Some(schema) = &exchange.retention {
        ensure_not_cancelled(cancel, Phase::ExchangeRetention)?;
        report.exchange_deleted = prune_tier(
            exchange.transfer.as_ref(),
            schema,
            &plan.source.folders_set_name,
            report.uploaded.as_deref(),
            Phase::ExchangeRetention,
            ErrorCode::ExchangeRetentionFailed,
            cancel,
        )
        .await?;
        report.states.push(PipelineState::RemotelyPruned);
    }
    Ok(())
}
