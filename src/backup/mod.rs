mod logic;
pub mod validator;

pub use logic::{BackupReport, PipelineState, perform_backup_orchestration};
pub(crate) use logic::{ensure_not_cancelled, newest_artifact};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::errors::RunError;
use crate::parameters::BaseBackupParameters;

/// Public entry point for the backup process. Each run gets its own id and
/// tracing span.
pub async fn run_backup_flow(
    params: &BaseBackupParameters,
    cancel: &CancellationToken,
) -> Result<BackupReport, RunError> {
    let run_id = Uuid::new_v4();
    let span = info_span!(
        "backup_run",
        %run_id,
        database = params.source().database_name()
    );
    perform_backup_orchestration(params, cancel, run_id)
        .instrument(span)
        .await
}
