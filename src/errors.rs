// dbbackup/src/errors.rs
//! Error catalog and the error types returned across the crate.
//!
//! Every user-facing failure is a [`Failure`]: a code from the fixed [`ErrorCode`]
//! catalog plus a message. Backends report [`BackendError`]s, which the flows
//! convert into failures naming the step that broke.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationMissing,
    BackendConstructionFailure,
    TransferFailure,
    RemoteCallFailure,
}

/// Fixed catalog of failure reasons, shared by the backup and installer domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // backup / restore
    LocalPathIsNotSpecifiedInParameters,
    SourceDatabaseNameDoesNotSpecified,
    FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified,
    CanNotCreateDatabaseServerClient,
    SourceFileStorageAndSourceFileManagerIsNotCreated,
    LocalFileManagerIsNotCreated,
    ExchangeFileManagerIsNotCreated,
    UploadTempExtensionIsEmpty,
    TempExtensionMatchesArtifactExtension,
    BackupWasNotCreated,
    DownloadFromSourceFailed,
    UploadToExchangeFailed,
    UploadToSourceFailed,
    NoLocalArtifactToUpload,
    LocalRetentionFailed,
    ExchangeRetentionFailed,
    DatabaseRestoreFailed,
    // installer / update
    InstallerWasNotCreated,
    InstallerWorkFolderIsEmpty,
    FilesUserNameIsEmpty,
    FilesUsersGroupNameIsEmpty,
    ServiceUserNameIsEmpty,
    DownloadTempExtensionIsEmpty,
    InstallFolderIsEmpty,
    DotnetRunnerIsEmpty,
    // version api
    RemoteCallFailed,
}

impl ErrorCode {
    pub const fn code(self) -> &'static str {
        match self {
            Self::LocalPathIsNotSpecifiedInParameters => "LocalPathIsNotSpecifiedInParameters",
            Self::SourceDatabaseNameDoesNotSpecified => "SourceDatabaseNameDoesNotSpecified",
            Self::FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified => {
                "FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified"
            }
            Self::CanNotCreateDatabaseServerClient => "CanNotCreateDatabaseServerClient",
            Self::SourceFileStorageAndSourceFileManagerIsNotCreated => {
                "SourceFileStorageAndSourceFileManagerIsNotCreated"
            }
            Self::LocalFileManagerIsNotCreated => "LocalFileManagerIsNotCreated",
            Self::ExchangeFileManagerIsNotCreated => "ExchangeFileManagerIsNotCreated",
            Self::UploadTempExtensionIsEmpty => "UploadTempExtensionIsEmpty",
            Self::TempExtensionMatchesArtifactExtension => "TempExtensionMatchesArtifactExtension",
            Self::BackupWasNotCreated => "BackupWasNotCreated",
            Self::DownloadFromSourceFailed => "DownloadFromSourceFailed",
            Self::UploadToExchangeFailed => "UploadToExchangeFailed",
            Self::UploadToSourceFailed => "UploadToSourceFailed",
            Self::NoLocalArtifactToUpload => "NoLocalArtifactToUpload",
            Self::LocalRetentionFailed => "LocalRetentionFailed",
            Self::ExchangeRetentionFailed => "ExchangeRetentionFailed",
            Self::DatabaseRestoreFailed => "DatabaseRestoreFailed",
            Self::InstallerWasNotCreated => "InstallerWasNotCreated",
            Self::InstallerWorkFolderIsEmpty => "InstallerWorkFolderIsEmpty",
            Self::FilesUserNameIsEmpty => "FilesUserNameIsEmpty",
            Self::FilesUsersGroupNameIsEmpty => "FilesUsersGroupNameIsEmpty",
            Self::ServiceUserNameIsEmpty => "ServiceUserNameIsEmpty",
            Self::DownloadTempExtensionIsEmpty => "DownloadTempExtensionIsEmpty",
            Self::InstallFolderIsEmpty => "InstallFolderIsEmpty",
            Self::DotnetRunnerIsEmpty => "DotnetRunnerIsEmpty",
            Self::RemoteCallFailed => "RemoteCallFailed",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::LocalPathIsNotSpecifiedInParameters => "Local path is not specified in parameters",
            Self::SourceDatabaseNameDoesNotSpecified => "Source database name is not specified",
            Self::FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified => {
                "Database server folders set name is not specified in database parameters"
            }
            Self::CanNotCreateDatabaseServerClient => "Cannot create database server client",
            Self::SourceFileStorageAndSourceFileManagerIsNotCreated => {
                "Source file storage and source file manager are not created"
            }
            Self::LocalFileManagerIsNotCreated => "Local file manager is not created",
            Self::ExchangeFileManagerIsNotCreated => {
                "Upload to exchange is requested but the exchange file manager is not created"
            }
            Self::UploadTempExtensionIsEmpty => "Upload temp extension is empty",
            Self::TempExtensionMatchesArtifactExtension => {
                "Temp extension must differ from the backup file extension"
            }
            Self::BackupWasNotCreated => "Database backup was not created",
            Self::DownloadFromSourceFailed => "Backup file download from source storage failed",
            Self::UploadToExchangeFailed => "Backup file upload to exchange storage failed",
            Self::UploadToSourceFailed => "Backup file upload to source storage failed",
            Self::NoLocalArtifactToUpload => "No local backup file found to upload",
            Self::LocalRetentionFailed => "Removing old backup files from local storage failed",
            Self::ExchangeRetentionFailed => "Removing old backup files from exchange storage failed",
            Self::DatabaseRestoreFailed => "Database restore failed",
            Self::InstallerWasNotCreated => "Installer was not created",
            Self::InstallerWorkFolderIsEmpty => "Installer work folder is empty",
            Self::FilesUserNameIsEmpty => "Files user name is empty",
            Self::FilesUsersGroupNameIsEmpty => "Files users group name is empty",
            Self::ServiceUserNameIsEmpty => "Service user name is empty",
            Self::DownloadTempExtensionIsEmpty => "Download temp extension is empty",
            Self::InstallFolderIsEmpty => "Install folder is empty",
            Self::DotnetRunnerIsEmpty => "Dotnet runner is empty",
            Self::RemoteCallFailed => "Remote call returned an error",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::CanNotCreateDatabaseServerClient
            | Self::SourceFileStorageAndSourceFileManagerIsNotCreated
            | Self::LocalFileManagerIsNotCreated
            | Self::ExchangeFileManagerIsNotCreated
            | Self::InstallerWasNotCreated => ErrorKind::BackendConstructionFailure,
            Self::BackupWasNotCreated
            | Self::DownloadFromSourceFailed
            | Self::UploadToExchangeFailed
            | Self::UploadToSourceFailed
            | Self::NoLocalArtifactToUpload
            | Self::LocalRetentionFailed
            | Self::ExchangeRetentionFailed
            | Self::DatabaseRestoreFailed => ErrorKind::TransferFailure,
            Self::RemoteCallFailed => ErrorKind::RemoteCallFailure,
            _ => ErrorKind::ConfigurationMissing,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One (code, message) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
}

impl Failure {
    /// Failure carrying the catalog message followed by `detail`.
    pub fn with_detail(code: ErrorCode, detail: impl fmt::Display) -> Self {
        Self {
            code,
            message: format!("{}: {}", code.message(), detail),
        }
    }
}

impl From<ErrorCode> for Failure {
    fn from(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A non-empty, ordered list of failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failures(Vec<Failure>);

impl Failures {
    /// Returns `None` for an empty list.
    pub fn from_vec(failures: Vec<Failure>) -> Option<Self> {
        if failures.is_empty() { None } else { Some(Self(failures)) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Failure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> &Failure {
        &self.0[0]
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.0.iter().any(|f| f.code == code)
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.0.iter().map(|f| f.code).collect()
    }

    pub fn into_vec(self) -> Vec<Failure> {
        self.0
    }
}

impl From<Failure> for Failures {
    fn from(failure: Failure) -> Self {
        Self(vec![failure])
    }
}

impl From<ErrorCode> for Failures {
    fn from(code: ErrorCode) -> Self {
        Self(vec![code.into()])
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for Failures {}

/// Errors reported by database and file transfer backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Command `{program}` failed with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch { name: String, expected: u64, actual: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Step of a backup or restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validation,
    Download,
    LocalRetention,
    Upload,
    ExchangeRetention,
    Restore,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Download => "download",
            Self::LocalRetention => "local retention",
            Self::Upload => "upload",
            Self::ExchangeRetention => "exchange retention",
            Self::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Why a run did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("{phase} failed: {errors}")]
    Failed { phase: Phase, errors: Failures },

    /// Cancellation was observed at `phase`; phases before it stay committed.
    #[error("Operation cancelled before {phase} completed")]
    Cancelled { phase: Phase },
}

impl RunError {
    /// Maps a backend error raised during `phase` to a run error. A backend
    /// that stopped on the cancellation token yields [`RunError::Cancelled`].
    pub fn from_backend(phase: Phase, code: ErrorCode, err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => Self::Cancelled { phase },
            err => Self::Failed {
                phase,
                errors: Failure::with_detail(code, err).into(),
            },
        }
    }

    pub fn failed(phase: Phase, errors: impl Into<Failures>) -> Self {
        Self::Failed {
            phase,
            errors: errors.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Failures of a failed run; empty for a cancelled one.
    pub fn failures(&self) -> Option<&Failures> {
        match self {
            Self::Failed { errors, .. } => Some(errors),
            Self::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_code_matches_variant_name() {
        let code = ErrorCode::FromDatabaseParametersDbServerFoldersSetNameIsNotSpecified;
        assert_eq!(code.code(), format!("{:?}", code));
        assert_eq!(ErrorCode::DotnetRunnerIsEmpty.to_string(), "DotnetRunnerIsEmpty");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ErrorCode::LocalPathIsNotSpecifiedInParameters.kind(),
            ErrorKind::ConfigurationMissing
        );
        assert_eq!(
            ErrorCode::LocalFileManagerIsNotCreated.kind(),
            ErrorKind::BackendConstructionFailure
        );
        assert_eq!(ErrorCode::UploadToExchangeFailed.kind(), ErrorKind::TransferFailure);
        assert_eq!(ErrorCode::RemoteCallFailed.kind(), ErrorKind::RemoteCallFailure);
    }

    #[test]
    fn test_failures_is_never_empty() {
        assert!(Failures::from_vec(Vec::new()).is_none());
        let failures = Failures::from_vec(vec![
            ErrorCode::InstallFolderIsEmpty.into(),
            Failure::with_detail(ErrorCode::RemoteCallFailed, "500"),
        ])
        .unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.contains(ErrorCode::RemoteCallFailed));
        assert_eq!(failures.first().code, ErrorCode::InstallFolderIsEmpty);
        assert_eq!(
            failures.to_string(),
            "[InstallFolderIsEmpty] Install folder is empty; [RemoteCallFailed] Remote call returned an error: 500"
        );
    }

    #[test]
    fn test_run_error_from_backend() {
        let cancelled =
            RunError::from_backend(Phase::Upload, ErrorCode::UploadToExchangeFailed, BackendError::Cancelled);
        assert_eq!(cancelled, RunError::Cancelled { phase: Phase::Upload });
        assert!(cancelled.failures().is_none());

        let failed = RunError::from_backend(
            Phase::Download,
            ErrorCode::DownloadFromSourceFailed,
            BackendError::NotFound("main/db1.bak".into()),
        );
        let failures = failed.failures().unwrap();
        assert!(failures.contains(ErrorCode::DownloadFromSourceFailed));
        assert!(failures.first().message.contains("main/db1.bak"));
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_not_found_detection() {
        let err = BackendError::io("x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(BackendError::NotFound("x".into()).is_not_found());
        assert!(!BackendError::Cancelled.is_not_found());
    }
}
