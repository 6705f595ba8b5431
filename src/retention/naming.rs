// dbbackup/src/retention/naming.rs
use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::errors::{BackendError, BackendResult};

pub const DEFAULT_DATE_MASK: &str = "%Y%m%d%H%M%S";
pub const DEFAULT_ARTIFACT_EXTENSION: &str = ".bak";

/// Backup file naming: `<prefix><timestamp formatted by mask><extension>`.
#[derive(Debug, Clone)]
pub struct ArtifactNaming {
    prefix: String,
    mask: String,
    extension: String,
    pattern: Regex,
}

impl PartialEq for ArtifactNaming {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.mask == other.mask && self.extension == other.extension
    }
}

impl Eq for ArtifactNaming {}

impl ArtifactNaming {
    /// `mask` uses strftime syntax (`%Y%m%d` etc.).
    pub fn new(
        prefix: impl Into<String>,
        mask: impl Into<String>,
        extension: impl Into<String>,
    ) -> BackendResult<Self> {
        let prefix = prefix.into();
        let mask = mask.into();
        let extension = extension.into();

        if mask.trim().is_empty() {
            return Err(BackendError::InvalidInput("date mask is empty".to_string()));
        }
        if StrftimeItems::new(&mask).any(|item| matches!(item, Item::Error)) {
            return Err(BackendError::InvalidInput(format!("invalid date mask '{}'", mask)));
        }

        let pattern = Regex::new(&format!(
            "^{}(.+){}$",
            regex::escape(&prefix),
            regex::escape(&extension)
        ))
        .map_err(|e| BackendError::InvalidInput(format!("invalid artifact name pattern: {}", e)))?;

        let naming = Self {
            prefix,
            mask,
            extension,
            pattern,
        };
        naming.check_round_trip()?;
        Ok(naming)
    }

    /// The mask must format a naive date-time and the name it produces must
    /// parse back to a timestamp.
    fn check_round_trip(&self) -> BackendResult<()> {
        let sample = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_opt(7, 30, 45))
            .ok_or_else(|| BackendError::InvalidInput("sample timestamp".to_string()))?;
        let mut stamp = String::new();
        write!(stamp, "{}", sample.format(&self.mask)).map_err(|_| {
            BackendError::InvalidInput(format!(
                "date mask '{}' needs a time zone to format",
                self.mask
            ))
        })?;
        let name = format!("{}{}{}", self.prefix, stamp, self.extension);
        if self.timestamp_of(&name).is_none() {
            return Err(BackendError::InvalidInput(format!(
                "date mask '{}' does not identify a date; '{}' cannot be read back",
                self.mask, name
            )));
        }
        Ok(())
    }

    /// Default naming for a database: `<db>_%Y%m%d%H%M%S.bak`.
    pub fn for_database(database_name: &str) -> BackendResult<Self> {
        Self::new(
            format!("{}_", database_name),
            DEFAULT_DATE_MASK,
            DEFAULT_ARTIFACT_EXTENSION,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self, timestamp: NaiveDateTime) -> String {
        format!("{}{}{}", self.prefix, timestamp.format(&self.mask), self.extension)
    }

    /// Timestamp encoded in `file_name`, or `None` when the name is not an artifact
    /// of this naming (staged files included).
    pub fn timestamp_of(&self, file_name: &str) -> Option<NaiveDateTime> {
        let captures = self.pattern.captures(file_name)?;
        let stamp = captures.get(1)?.as_str();
        NaiveDateTime::parse_from_str(stamp, &self.mask)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(stamp, &self.mask)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_only_mask() {
        let naming = ArtifactNaming::new("db1_", "%Y%m%d", ".bak").unwrap();
        let ts = naming.timestamp_of("db1_20240101.bak").unwrap();
        assert_eq!(ts, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(naming.file_name(ts), "db1_20240101.bak");
    }

    #[test]
    fn test_rejects_foreign_and_staged_names() {
        let naming = ArtifactNaming::for_database("db1").unwrap();
        assert!(naming.timestamp_of("db1_20240101120000.bak").is_some());
        assert!(naming.timestamp_of("db1_20240101120000.bak.down!").is_none());
        assert!(naming.timestamp_of("db2_20240101120000.bak").is_none());
        assert!(naming.timestamp_of("db1_notadate.bak").is_none());
    }

    #[test]
    fn test_prefix_with_regex_characters() {
        let naming = ArtifactNaming::new("db.(1)+", "%Y-%m-%d_%H%M", ".tar.gz").unwrap();
        let name = "db.(1)+2024-03-05_0730.tar.gz";
        let ts = naming.timestamp_of(name).unwrap();
        assert_eq!(naming.file_name(ts), name);
    }

    #[test]
    fn test_invalid_mask() {
        assert!(ArtifactNaming::new("a", "%Q", ".bak").is_err());
        assert!(ArtifactNaming::new("a", " ", ".bak").is_err());
    }

    #[test]
    fn test_mask_with_offset_is_rejected() {
        let err = ArtifactNaming::new("db1_", "%Y%m%d%z", ".bak").unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
        assert!(ArtifactNaming::new("db1_", "%Y%m%d_%Z", ".bak").is_err());
    }

    #[test]
    fn test_mask_without_full_date_is_rejected() {
        assert!(ArtifactNaming::new("db1_", "%Y%m", ".bak").is_err());
        assert!(ArtifactNaming::new("db1_", "%H%M%S", ".bak").is_err());
        assert!(ArtifactNaming::new("db1_", "backup", ".bak").is_err());
    }

    #[test]
    fn test_accepted_masks_read_back_their_names() {
        let ts = NaiveDate::from_ymd_opt(2024, 11, 30).unwrap().and_hms_opt(23, 59, 58).unwrap();
        for mask in ["%Y%m%d", "%Y%m%d%H%M", "%Y-%m-%dT%H-%M-%S", "%d.%m.%Y"] {
            let naming = ArtifactNaming::new("db1_", mask, ".bak").unwrap();
            let name = naming.file_name(ts);
            assert!(naming.timestamp_of(&name).is_some(), "mask {}", mask);
        }
    }
}
