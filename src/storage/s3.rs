// dbbackup/src/storage/s3.rs
use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{TimeZone, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::local::write_staged;
use super::{check_cancelled, FileEntry, FileStorageData, FileTransferBackend};
use crate::errors::{BackendError, BackendResult};

/// Storage tier on an S3-compatible object store (DigitalOcean Spaces, MinIO, AWS).
///
/// Object stores have no rename, so an upload is committed with a server-side
/// copy from the staged key. The copy is atomic: the final key holds either the
/// previous object or the complete new one.
#[derive(Debug, Clone)]
pub struct S3FileManager {
    client: s3::Client,
    bucket: String,
    prefix: String,
    label: String,
}

fn required<'a>(value: &'a Option<String>, field: &str, storage: &str) -> BackendResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            BackendError::InvalidInput(format!("{} is missing for S3 storage '{}'", field, storage))
        })
}

impl S3FileManager {
    pub async fn from_storage(storage: &FileStorageData) -> BackendResult<Self> {
        let bucket = required(&storage.bucket_name, "bucket_name", &storage.name)?;
        let region = required(&storage.region, "region", &storage.name)?;
        let endpoint = required(&storage.endpoint_url, "endpoint_url", &storage.name)?;
        let key_id = required(&storage.access_key_id, "access_key_id", &storage.name)?;
        let secret = required(&storage.secret_access_key, "secret_access_key", &storage.name)?;

        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.to_string()))
            .credentials_provider(s3::config::Credentials::new(
                key_id,
                secret,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        Ok(Self {
            client: s3::Client::new(&sdk_config),
            bucket: bucket.to_string(),
            prefix: storage.root.trim_matches('/').to_string(),
            label: format!("s3://{}/{}", bucket, storage.root.trim_matches('/')),
        })
    }

    fn key(&self, name: &str) -> String {
        let name = name.trim_start_matches('/');
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    fn relative<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(key)
        }
    }
}

/// Races `fut` against the token.
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
        result = fut => result,
    }
}

fn s3_error<E: std::error::Error>(action: &str, key: &str, err: E) -> BackendError {
    BackendError::S3(format!("{} {} failed: {}", action, key, DisplayErrorContext(&err)))
}

#[async_trait]
impl FileTransferBackend for S3FileManager {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn list(&self, folder: &str, cancel: &CancellationToken) -> BackendResult<Vec<FileEntry>> {
        let mut list_prefix = self.key(folder.trim_matches('/'));
        if !list_prefix.is_empty() && !list_prefix.ends_with('/') {
            list_prefix.push('/');
        }

        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            check_cancelled(cancel)?;
            let request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take());
            let output = cancellable(cancel, async {
                request
                    .send()
                    .await
                    .map_err(|e| s3_error("list", &list_prefix, e))
            })
            .await?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let created_at = object
                    .last_modified()
                    .and_then(|t| Utc.timestamp_opt(t.secs(), 0).single())
                    .unwrap_or_default();
                entries.push(FileEntry {
                    name: self.relative(key).to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    created_at,
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn upload(
        &self,
        local_file: &Path,
        remote_name: &str,
        temp_ext: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<u64> {
        check_cancelled(cancel)?;
        let expected = match tokio::fs::metadata(local_file).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound(local_file.display().to_string()));
            }
            Err(e) => return Err(BackendError::io(local_file, e)),
        };
        let final_key = self.key(remote_name);
        let staged_key = format!("{}{}", final_key, temp_ext);

        let body = ByteStream::from_path(local_file)
            .await
            .map_err(|e| BackendError::S3(format!("Failed to read {}: {}", local_file.display(), e)))?;
        debug!(bucket = %self.bucket, key = %staged_key, bytes = expected, "Uploading staged object");
        cancellable(cancel, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&staged_key)
                .body(body)
                .send()
                .await
                .map_err(|e| s3_error("put", &staged_key, e))
        })
        .await?;

        let head = cancellable(cancel, async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(&staged_key)
                .send()
                .await
                .map_err(|e| s3_error("head", &staged_key, e))
        })
        .await?;
        let actual = head.content_length().unwrap_or(-1);
        if actual != expected as i64 {
            return Err(BackendError::SizeMismatch {
                name: final_key,
                expected,
                actual: actual.max(0) as u64,
            });
        }

        check_cancelled(cancel)?;
        cancellable(cancel, async {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, staged_key))
                .key(&final_key)
                .send()
                .await
                .map_err(|e| s3_error("copy", &final_key, e))
        })
        .await?;

        if let Err(e) = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&staged_key)
            .send()
            .await
        {
            warn!(key = %staged_key, error = %DisplayErrorContext(&e), "Failed to remove staged object");
        }
        debug!(bucket = %self.bucket, key = %final_key, "Committed object");
        Ok(expected)
    }

    async fn download(
        &self,
        remote_name: &str,
        local_file: &Path,
        temp_ext: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<u64> {
        check_cancelled(cancel)?;
        let key = self.key(remote_name);
        let object = cancellable(cancel, async {
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let missing = e
                        .as_service_error()
                        .map(|se| se.is_no_such_key())
                        .unwrap_or(false);
                    if missing {
                        BackendError::NotFound(key.clone())
                    } else {
                        s3_error("get", &key, e)
                    }
                })
        })
        .await?;

        let expected = object.content_length().unwrap_or(0).max(0) as u64;
        let reader = Box::pin(object.body.into_async_read());
        write_staged(reader, expected, local_file, temp_ext, cancel).await
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> BackendResult<()> {
        check_cancelled(cancel)?;
        let key = self.key(name);
        // S3 answers a delete of a missing key with success.
        cancellable(cancel, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| s3_error("delete", &key, e))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageKind;

    fn spaces(root: &str) -> FileStorageData {
        FileStorageData {
            name: "exchange".into(),
            kind: StorageKind::S3,
            root: root.into(),
            endpoint_url: Some("https://fra1.digitaloceanspaces.com".into()),
            region: Some("fra1".into()),
            bucket_name: Some("backups".into()),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
        }
    }

    #[tokio::test]
    async fn test_keys_are_prefixed_with_root() {
        let manager = S3FileManager::from_storage(&spaces("/db-backups/")).await.unwrap();
        assert_eq!(manager.key("db1_20240101.bak"), "db-backups/db1_20240101.bak");
        assert_eq!(manager.relative("db-backups/db1_20240101.bak"), "db1_20240101.bak");
        assert_eq!(manager.describe(), "s3://backups/db-backups");

        let bare = S3FileManager::from_storage(&spaces("")).await.unwrap();
        assert_eq!(bare.key("/main/a.bak"), "main/a.bak");
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_construction() {
        let mut storage = spaces("x");
        storage.secret_access_key = Some("  ".into());
        let err = S3FileManager::from_storage(&storage).await.unwrap_err();
        assert!(err.to_string().contains("secret_access_key"));
    }
}
