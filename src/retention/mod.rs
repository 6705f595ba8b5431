// dbbackup/src/retention/mod.rs
//! Aging of backup files within one storage tier.
//!
//! Files are ranked newest first by the timestamp encoded in their names. The
//! newest `keep_last` always survive. Every other file falls into a bucket by its
//! age relative to the newest file: one bucket per day for `days` days, then one
//! per ISO week for `weeks` weeks, then one per calendar month for `months`
//! months. The first (newest) file in a bucket survives, the rest are deleted,
//! and files older than every window are deleted.
//!
//! The result depends only on the set of names, so running it again on the
//! survivors deletes nothing.

mod naming;

pub use naming::{ArtifactNaming, DEFAULT_ARTIFACT_EXTENSION, DEFAULT_DATE_MASK};

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::BackendResult;
use crate::storage::{FileEntry, FileTransferBackend};

/// Window sizes of a retention schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionRules {
    pub keep_last: usize,
    pub days: u32,
    pub weeks: u32,
    pub months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Day(NaiveDate),
    Week(i32, u32),
    Month(i32, u32),
}

impl RetentionRules {
    fn bucket_of(&self, anchor: NaiveDate, date: NaiveDate) -> Option<Bucket> {
        let age_days = anchor.signed_duration_since(date).num_days();
        if age_days < i64::from(self.days) {
            return Some(Bucket::Day(date));
        }
        if age_days < i64::from(self.weeks) * 7 {
            let week = date.iso_week();
            return Some(Bucket::Week(week.year(), week.week()));
        }
        let age_months = (anchor.year() * 12 + anchor.month() as i32)
            - (date.year() * 12 + date.month() as i32);
        if age_months < self.months as i32 {
            return Some(Bucket::Month(date.year(), date.month()));
        }
        None
    }
}

/// Rules plus the naming used to read timestamps out of file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSchema {
    pub rules: RetentionRules,
    pub naming: ArtifactNaming,
}

/// Outcome of [`RetentionSchema::plan`]. Files the naming does not recognise
/// appear in neither list.
#[derive(Debug, Default)]
pub struct RetentionPlan<'a> {
    pub keep: Vec<&'a FileEntry>,
    pub delete: Vec<&'a FileEntry>,
}

impl RetentionSchema {
    pub fn new(rules: RetentionRules, naming: ArtifactNaming) -> Self {
        Self { rules, naming }
    }

    pub fn plan<'a>(&self, files: &'a [FileEntry]) -> RetentionPlan<'a> {
        let mut dated: Vec<(NaiveDateTime, &FileEntry)> = files
            .iter()
            .filter_map(|f| self.naming.timestamp_of(f.file_name()).map(|ts| (ts, f)))
            .collect();
        // newest first; equal timestamps ordered by name so the result is stable
        dated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.name.cmp(&a.1.name)));

        let mut plan = RetentionPlan::default();
        let Some(anchor) = dated.first().map(|(ts, _)| ts.date()) else {
            return plan;
        };

        let keep_last = self.rules.keep_last.max(1);
        let mut filled: HashSet<Bucket> = HashSet::new();
        for (rank, (ts, file)) in dated.into_iter().enumerate() {
            let bucket = self.rules.bucket_of(anchor, ts.date());
            if rank < keep_last {
                if let Some(bucket) = bucket {
                    filled.insert(bucket);
                }
                plan.keep.push(file);
                continue;
            }
            match bucket {
                Some(bucket) if filled.insert(bucket) => plan.keep.push(file),
                _ => plan.delete.push(file),
            }
        }
        plan
    }

    /// Files left after applying the plan, in input order.
    pub fn survivors(&self, files: &[FileEntry]) -> Vec<FileEntry> {
        let plan = self.plan(files);
        let doomed: HashSet<&str> = plan.delete.iter().map(|f| f.name.as_str()).collect();
        files
            .iter()
            .filter(|f| !doomed.contains(f.name.as_str()))
            .cloned()
            .collect()
    }
}

/// Lists `folder` on `backend` and deletes what `schema` does not keep.
/// `protected` (a name as returned by `list`) is never deleted.
/// Returns the names actually deleted; files that vanished in the meantime
/// count as already pruned.
pub async fn prune(
    backend: &dyn FileTransferBackend,
    schema: &RetentionSchema,
    folder: &str,
    protected: Option<&str>,
    cancel: &CancellationToken,
) -> BackendResult<Vec<String>> {
    let files = backend.list(folder, cancel).await?;
    let plan = schema.plan(&files);
    debug!(
        tier = %backend.describe(),
        keep = plan.keep.len(),
        delete = plan.delete.len(),
        "Retention plan"
    );

    let mut deleted = Vec::with_capacity(plan.delete.len());
    for file in plan.delete {
        if protected == Some(file.name.as_str()) {
            debug!(file = %file.name, "Kept artifact of the current run");
            continue;
        }
        match backend.delete(&file.name, cancel).await {
            Ok(()) => {
                info!(tier = %backend.describe(), file = %file.name, "Removed old backup");
                deleted.push(file.name.clone());
            }
            Err(e) if e.is_not_found() => {
                debug!(file = %file.name, "Already removed");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use proptest::prelude::*;

    fn schema(keep_last: usize, days: u32, weeks: u32, months: u32) -> RetentionSchema {
        RetentionSchema::new(
            RetentionRules {
                keep_last,
                days,
                weeks,
                months,
            },
            ArtifactNaming::for_database("db1").unwrap(),
        )
    }

    fn entry_at(ts: NaiveDateTime) -> FileEntry {
        FileEntry {
            name: ArtifactNaming::for_database("db1").unwrap().file_name(ts),
            size: 10,
            created_at: Utc::now(),
        }
    }

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 30)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap()
    }

    fn names(files: &[&FileEntry]) -> Vec<String> {
        let mut names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_keep_last_only() {
        let files: Vec<FileEntry> = (0..5).map(|i| entry_at(base() - Duration::hours(i))).collect();
        let plan = schema(2, 0, 0, 0).plan(&files);
        assert_eq!(plan.keep.len(), 2);
        assert_eq!(plan.delete.len(), 3);
        assert_eq!(plan.keep[0].name, files[0].name);
        assert_eq!(plan.keep[1].name, files[1].name);
    }

    #[test]
    fn test_one_per_day_keeps_latest_of_each_day() {
        // two backups a day for four days
        let mut files = Vec::new();
        for day in 0..4 {
            files.push(entry_at(base() - Duration::days(day)));
            files.push(entry_at(base() - Duration::days(day) - Duration::hours(6)));
        }
        let plan = schema(1, 3, 0, 0).plan(&files);
        let mut expected = vec![
            files[0].name.clone(),
            files[2].name.clone(),
            files[4].name.clone(),
        ];
        expected.sort();
        assert_eq!(names(&plan.keep), expected);
        // day 3 is outside the daily window and there is no weekly window
        assert_eq!(plan.delete.len(), 5);
    }

    #[test]
    fn test_weekly_and_monthly_windows() {
        let files: Vec<FileEntry> = (0..120)
            .map(|day| entry_at(base() - Duration::days(day)))
            .collect();
        let plan = schema(1, 7, 4, 3).plan(&files);
        // a file survives per day for a week, then per ISO week, then per month
        assert!(plan.keep.len() >= 7 + 2);
        assert!(plan.keep.iter().any(|f| f.name == files[0].name));
        assert!(plan.delete.iter().any(|f| f.name == files[119].name));
        assert_eq!(plan.keep.len() + plan.delete.len(), files.len());
    }

    #[test]
    fn test_equal_timestamps_and_foreign_files() {
        let mut files = vec![entry_at(base()), entry_at(base())];
        files[1].name = format!("archive/{}", files[1].name);
        files.push(FileEntry {
            name: "notes.txt".into(),
            size: 1,
            created_at: Utc::now(),
        });
        let plan = schema(1, 0, 0, 0).plan(&files);
        assert_eq!(plan.keep.len(), 1);
        // "db1_..." sorts after "archive/db1_..." and wins the tie
        assert_eq!(plan.keep[0].name, files[0].name);
        assert_eq!(plan.delete.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let plan = schema(3, 1, 1, 1).plan(&[]);
        assert!(plan.keep.is_empty() && plan.delete.is_empty());
    }

    #[tokio::test]
    async fn test_prune_local_tier() {
        use crate::storage::LocalFileManager;

        let dir = tempfile::tempdir().unwrap();
        let naming = ArtifactNaming::for_database("db1").unwrap();
        for h in 0..4 {
            let name = naming.file_name(base() - Duration::hours(h));
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::write(dir.path().join("readme.txt"), b"keep me").await.unwrap();

        let manager = LocalFileManager::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let deleted = prune(&manager, &schema(2, 0, 0, 0), "", None, &cancel).await.unwrap();
        assert_eq!(deleted.len(), 2);

        let remaining = manager.list("", &cancel).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().any(|f| f.name == "readme.txt"));
        assert!(remaining.iter().any(|f| f.name == naming.file_name(base())));

        // second pass finds nothing to do
        let again = prune(&manager, &schema(2, 0, 0, 0), "", None, &cancel).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_protected_file() {
        use crate::storage::LocalFileManager;

        let dir = tempfile::tempdir().unwrap();
        let naming = ArtifactNaming::for_database("db1").unwrap();
        let newer = naming.file_name(base());
        let current = naming.file_name(base() - Duration::days(1));
        for name in [&newer, &current] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let manager = LocalFileManager::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let deleted = prune(&manager, &schema(1, 0, 0, 0), "", Some(&current), &cancel)
            .await
            .unwrap();
        assert!(deleted.is_empty());
        assert!(dir.path().join(&current).is_file());
        assert!(dir.path().join(&newer).is_file());
    }

    /// Lists a fixed set of files whose deletion always reports them missing.
    struct VanishingFiles {
        files: Vec<FileEntry>,
        deletes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FileTransferBackend for VanishingFiles {
        fn describe(&self) -> String {
            "vanishing".to_string()
        }

        async fn list(&self, _folder: &str, _cancel: &CancellationToken) -> BackendResult<Vec<FileEntry>> {
            Ok(self.files.clone())
        }

        async fn upload(
            &self,
            _local_file: &std::path::Path,
            remote_name: &str,
            _temp_ext: &str,
            _cancel: &CancellationToken,
        ) -> BackendResult<u64> {
            Err(crate::errors::BackendError::InvalidInput(remote_name.to_string()))
        }

        async fn download(
            &self,
            remote_name: &str,
            _local_file: &std::path::Path,
            _temp_ext: &str,
            _cancel: &CancellationToken,
        ) -> BackendResult<u64> {
            Err(crate::errors::BackendError::NotFound(remote_name.to_string()))
        }

        async fn delete(&self, name: &str, _cancel: &CancellationToken) -> BackendResult<()> {
            self.deletes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(crate::errors::BackendError::NotFound(name.to_string()))
        }
    }

    #[tokio::test]
    async fn test_prune_tolerates_files_removed_concurrently() {
        let backend = VanishingFiles {
            files: (0..3).map(|d| entry_at(base() - Duration::days(d))).collect(),
            deletes: Default::default(),
        };
        let deleted = prune(&backend, &schema(1, 0, 0, 0), "", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(deleted.is_empty());
        assert_eq!(backend.deletes.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    fn arb_files() -> impl Strategy<Value = Vec<FileEntry>> {
        prop::collection::btree_set(0i64..(400 * 24), 1..40).prop_map(|hours| {
            hours
                .into_iter()
                .map(|h| entry_at(base() - Duration::hours(h)))
                .collect()
        })
    }

    fn arb_schema() -> impl Strategy<Value = RetentionSchema> {
        (0usize..4, 0u32..10, 0u32..6, 0u32..6)
            .prop_map(|(k, d, w, m)| schema(k, d, w, m))
    }

    proptest! {
        #[test]
        fn prop_retention_is_idempotent(files in arb_files(), schema in arb_schema()) {
            let once = schema.survivors(&files);
            let twice = schema.survivors(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_newest_is_never_deleted(
            files in arb_files().prop_flat_map(|f| Just(f).prop_shuffle()),
            schema in arb_schema(),
        ) {
            let newest = files
                .iter()
                .max_by_key(|f| schema.naming.timestamp_of(&f.name))
                .map(|f| f.name.clone())
                .unwrap();
            let plan = schema.plan(&files);
            prop_assert!(plan.delete.iter().all(|f| f.name != newest));
        }

        #[test]
        fn prop_input_order_does_not_matter(
            files in arb_files().prop_flat_map(|f| (Just(f.clone()), Just(f).prop_shuffle())),
            schema in arb_schema(),
        ) {
            let (ordered, shuffled) = files;
            prop_assert_eq!(names(&schema.plan(&ordered).delete), names(&schema.plan(&shuffled).delete));
        }
    }
}
