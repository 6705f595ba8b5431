mod logic;

pub use logic::{RestoreReport, perform_restore_orchestration};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::errors::RunError;
use crate::parameters::RestoreParameters;

/// Public entry point for the restore process.
pub async fn run_restore_flow(
    params: &RestoreParameters,
    cancel: &CancellationToken,
) -> Result<RestoreReport, RunError> {
    let run_id = Uuid::new_v4();
    let span = info_span!(
        "restore_run",
        %run_id,
        database = params.source().database_name()
    );
    perform_restore_orchestration(params, cancel, run_id)
        .instrument(span)
        .await
}
