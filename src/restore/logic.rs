// dbbackup/src/restore/logic.rs
use std::path::PathBuf;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::{ensure_not_cancelled, newest_artifact};
use crate::backup::validator::validate_restore;
use crate::database::BackupArtifact;
use crate::errors::{ErrorCode, Phase, RunError};
use crate::parameters::RestoreParameters;

/// What a successful restore run did.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub run_id: Uuid,
    pub local_file: PathBuf,
    /// Artifact as placed on the database server.
    pub artifact: BackupArtifact,
}

/// Uploads a local backup file into the source tier and restores it with the
/// database backend.
pub async fn perform_restore_orchestration(
    params: &RestoreParameters,
    cancel: &CancellationToken,
    run_id: Uuid,
) -> Result<RestoreReport, RunError> {
    ensure_not_cancelled(cancel, Phase::Validation)?;
    let plan = validate_restore(params).map_err(|errors| {
        warn!(errors = %errors, "Restore parameters rejected");
        RunError::failed(Phase::Validation, errors)
    })?;

    ensure_not_cancelled(cancel, Phase::Upload)?;
    let file_name = match &plan.artifact_name {
        Some(name) => name.clone(),
        None => newest_artifact(plan.local_transfer.as_ref(), &plan.naming, "", cancel)
            .await
            .map_err(|e| RunError::from_backend(Phase::Upload, ErrorCode::NoLocalArtifactToUpload, e))?
            .ok_or_else(|| RunError::failed(Phase::Upload, ErrorCode::NoLocalArtifactToUpload))?
            .name,
    };
    let local_file = plan.local_path.join(&file_name);
    let remote_name = format!("{}/{}", plan.source.folders_set_name, file_name);

    info!(file = %local_file.display(), target = %remote_name, "Uploading backup to database server storage");
    let size = plan
        .source
        .transfer
        .upload(&local_file, &remote_name, &plan.upload_temp_extension, cancel)
        .await
        .map_err(|e| RunError::from_backend(Phase::Upload, ErrorCode::UploadToSourceFailed, e))?;

    let artifact = BackupArtifact {
        name: remote_name,
        size,
        created_at: Utc::now(),
    };

    ensure_not_cancelled(cancel, Phase::Restore)?;
    plan.source
        .database_backend
        .restore(&plan.source.database_name, &artifact, cancel)
        .await
        .map_err(|e| RunError::from_backend(Phase::Restore, ErrorCode::DatabaseRestoreFailed, e))?;
    info!(database = %plan.source.database_name, artifact = %artifact.name, "Database restored");

    Ok(RestoreReport {
        run_id,
        local_file,
        artifact,
    })
}
