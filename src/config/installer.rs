// dbbackup/src/config/installer.rs
use serde::Deserialize;

use crate::errors::{ErrorCode, Failure, Failures};
use crate::parameters::DEFAULT_DOWNLOAD_TEMP_EXTENSION;

fn default_download_temp_extension() -> Option<String> {
    Some(DEFAULT_DOWNLOAD_TEMP_EXTENSION.to_string())
}

/// Settings of the program installer/updater. Every field may be absent in
/// `config.json`; [`InstallerSettings::validate`] decides what is usable.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InstallerSettings {
    pub installer_work_folder: Option<String>,
    pub install_folder: Option<String>,
    pub dotnet_runner: Option<String>,
    pub program_archive_date_mask: Option<String>,
    pub program_archive_extension: Option<String>,
    pub parameters_file_date_mask: Option<String>,
    pub parameters_file_extension: Option<String>,
    pub program_exchange_file_storage_name: Option<String>,
    pub service_user_name: Option<String>,
    #[serde(default = "default_download_temp_extension")]
    pub download_temp_extension: Option<String>,
    pub files_user_name: Option<String>,
    pub files_users_group_name: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl InstallerSettings {
    /// Every missing required field, in declaration order.
    pub fn validate(&self) -> Result<(), Failures> {
        let checks = [
            (&self.installer_work_folder, ErrorCode::InstallerWorkFolderIsEmpty),
            (&self.files_user_name, ErrorCode::FilesUserNameIsEmpty),
            (&self.files_users_group_name, ErrorCode::FilesUsersGroupNameIsEmpty),
            (&self.service_user_name, ErrorCode::ServiceUserNameIsEmpty),
            (&self.download_temp_extension, ErrorCode::DownloadTempExtensionIsEmpty),
            (&self.install_folder, ErrorCode::InstallFolderIsEmpty),
            (&self.dotnet_runner, ErrorCode::DotnetRunnerIsEmpty),
        ];
        let errors: Vec<Failure> = checks
            .into_iter()
            .filter(|(value, _)| is_blank(value))
            .map(|(_, code)| code.into())
            .collect();

        match Failures::from_vec(errors) {
            Some(failures) => Err(failures),
            None => Ok(()),
        }
    }

    /// Hook run before the settings are persisted.
    pub fn check_before_save(&self) -> Result<(), Failures> {
        self.validate()
    }
}

/// The installer block of the configuration, or `InstallerWasNotCreated`.
pub fn require_installer(settings: Option<&InstallerSettings>) -> Result<&InstallerSettings, Failures> {
    settings.ok_or_else(|| ErrorCode::InstallerWasNotCreated.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_and_pascal_case_fields() {
        let settings: InstallerSettings = serde_json::from_value(json!({
            "InstallerWorkFolder": "/opt/installer/work",
            "InstallFolder": "/opt/app",
            "DotnetRunner": "/usr/bin/dotnet",
            "ServiceUserName": "app",
            "FilesUserName": "app",
            "FilesUsersGroupName": "app"
        }))
        .unwrap();
        assert_eq!(settings.download_temp_extension.as_deref(), Some(".down!"));
        assert!(settings.validate().is_ok());
        assert!(settings.check_before_save().is_ok());
    }

    #[test]
    fn test_every_missing_field_is_reported() {
        let settings = InstallerSettings {
            download_temp_extension: Some(" ".into()),
            ..InstallerSettings::default()
        };
        let errors = settings.check_before_save().unwrap_err();
        assert_eq!(
            errors.codes(),
            vec![
                ErrorCode::InstallerWorkFolderIsEmpty,
                ErrorCode::FilesUserNameIsEmpty,
                ErrorCode::FilesUsersGroupNameIsEmpty,
                ErrorCode::ServiceUserNameIsEmpty,
                ErrorCode::DownloadTempExtensionIsEmpty,
                ErrorCode::InstallFolderIsEmpty,
                ErrorCode::DotnetRunnerIsEmpty,
            ]
        );
    }

    #[test]
    fn test_missing_block() {
        let errors = require_installer(None).unwrap_err();
        assert_eq!(errors.codes(), vec![ErrorCode::InstallerWasNotCreated]);
    }
}
