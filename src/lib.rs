//! Database backup transfer and retention pipeline.
//!
//! A backup run dumps a database on its server, copies the dump into local
//! staging storage, prunes old local backups, uploads the dump to exchange
//! storage and prunes there as well. Every write to a storage tier is staged
//! under a temporary name and committed by rename.

pub mod backup;
pub mod config;
pub mod database;
pub mod errors;
pub mod parameters;
pub mod restore;
pub mod retention;
pub mod storage;
pub mod utils;

pub use backup::{BackupReport, PipelineState, run_backup_flow};
pub use errors::{ErrorCode, Failure, Failures, Phase, RunError};
pub use parameters::{BackupRestoreParameters, BaseBackupParameters, RestoreParameters};
pub use restore::{RestoreReport, run_restore_flow};
