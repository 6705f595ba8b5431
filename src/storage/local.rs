// dbbackup/src/storage/local.rs
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{check_cancelled, with_temp_ext, FileEntry, FileTransferBackend};
use crate::errors::{BackendError, BackendResult};

const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Storage tier on a mounted filesystem. Commits by renaming the staged file,
/// which replaces the final name atomically on the same filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileManager {
    root: PathBuf,
}

impl LocalFileManager {
    /// Does not touch the disk; the root is created on first write.
    pub fn new(root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(BackendError::InvalidInput(
                "local storage root is empty".to_string(),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(BackendError::InvalidInput(format!(
                "'{}' is not a path inside {}",
                name,
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileTransferBackend for LocalFileManager {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list(&self, folder: &str, cancel: &CancellationToken) -> BackendResult<Vec<FileEntry>> {
        check_cancelled(cancel)?;
        let dir = self.resolve(folder)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| BackendError::io(&dir, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // removed between readdir and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackendError::io(entry.path(), e)),
            };
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|e| BackendError::io(entry.path(), e))?;
            let name = if folder.is_empty() {
                file_name
            } else {
                format!("{}/{}", folder.trim_end_matches('/'), file_name)
            };
            entries.push(FileEntry {
                name,
                size: metadata.len(),
                created_at: DateTime::<Utc>::from(created),
            });
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
        let destination = self.resolve(remote_name)?;
        copy_file_staged(local_file, &destination, temp_ext, cancel).await
    }

    async fn download(
        &self,
        remote_name: &str,
        local_file: &Path,
        temp_ext: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<u64> {
        let source = self.resolve(remote_name)?;
        copy_file_staged(&source, local_file, temp_ext, cancel).await
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> BackendResult<()> {
        check_cancelled(cancel)?;
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(&path, e)),
        }
    }
}

/// Copies `source` to `destination` through `<destination><temp_ext>`.
pub(crate) async fn copy_file_staged(
    source: &Path,
    destination: &Path,
    temp_ext: &str,
    cancel: &CancellationToken,
) -> BackendResult<u64> {
    check_cancelled(cancel)?;
    let input = match File::open(source).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackendError::NotFound(source.display().to_string()));
        }
        Err(e) => return Err(BackendError::io(source, e)),
    };
    let expected = input
        .metadata()
        .await
        .map_err(|e| BackendError::io(source, e))?
        .len();
    write_staged(input, expected, destination, temp_ext, cancel).await
}

/// Streams `reader` into the staged file, checks that exactly `expected` bytes
/// arrived, then renames the staged file onto `destination`.
pub(crate) async fn write_staged<R>(
    mut reader: R,
    expected: u64,
    destination: &Path,
    temp_ext: &str,
    cancel: &CancellationToken,
) -> BackendResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::io(parent, e))?;
        }
    }

    let staged = with_temp_ext(destination, temp_ext);
    let mut output = File::create(&staged)
        .await
        .map_err(|e| BackendError::io(&staged, e))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        check_cancelled(cancel)?;
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| BackendError::io(&staged, e))?;
        if read == 0 {
            break;
        }
        output
            .write_all(&buffer[..read])
            .await
            .map_err(|e| BackendError::io(&staged, e))?;
        written += read as u64;
    }
    output.flush().await.map_err(|e| BackendError::io(&staged, e))?;
    output.sync_all().await.map_err(|e| BackendError::io(&staged, e))?;
    drop(output);

    let on_disk = fs::metadata(&staged)
        .await
        .map_err(|e| BackendError::io(&staged, e))?
        .len();
    if written != expected || on_disk != expected {
        return Err(BackendError::SizeMismatch {
            name: destination.display().to_string(),
            expected,
            actual: on_disk,
        });
    }

    check_cancelled(cancel)?;
    fs::rename(&staged, destination)
        .await
        .map_err(|e| BackendError::io(destination, e))?;
    debug!(path = %destination.display(), bytes = written, "Committed file");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `good` bytes and then fails, like a connection dropping mid-transfer.
    struct BrokenReader {
        good: usize,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_upload_commits_under_final_name() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("db1_20240101.bak");
        tokio::fs::write(&src, vec![1u8; 3 * COPY_CHUNK_SIZE + 17]).await.unwrap();

        let manager = LocalFileManager::new(dst_dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let bytes = manager
            .upload(&src, "archive/db1_20240101.bak", ".up!", &cancel)
            .await
            .unwrap();

        assert_eq!(bytes, (3 * COPY_CHUNK_SIZE + 17) as u64);
        let committed = dst_dir.path().join("archive/db1_20240101.bak");
        assert_eq!(tokio::fs::read(&committed).await.unwrap(), tokio::fs::read(&src).await.unwrap());
        assert!(!dst_dir.path().join("archive/db1_20240101.bak.up!").exists());
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_previous_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("db1_20240101.bak");
        tokio::fs::write(&destination, b"previous complete backup").await.unwrap();

        let cancel = CancellationToken::new();
        let result = write_staged(
            BrokenReader { good: 2 * COPY_CHUNK_SIZE },
            10 * COPY_CHUNK_SIZE as u64,
            &destination,
            ".down!",
            &cancel,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            tokio::fs::read(&destination).await.unwrap(),
            b"previous complete backup"
        );
        let staged = dir.path().join("db1_20240101.bak.down!");
        assert!(staged.exists());
    }

    #[tokio::test]
    async fn test_short_read_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("short.bak");
        let cancel = CancellationToken::new();
        let result = write_staged(&b"abc"[..], 10, &destination, ".tmp", &cancel).await;
        assert!(matches!(result, Err(BackendError::SizeMismatch { expected: 10, actual: 3, .. })));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.bak");
        tokio::fs::write(&src, b"data").await.unwrap();

        let manager = LocalFileManager::new(dst_dir.path().join("out")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager.upload(&src, "a.bak", ".up!", &cancel).await;

        assert!(matches!(result, Err(BackendError::Cancelled)));
        assert!(!dst_dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("main/nested")).await.unwrap();
        tokio::fs::write(dir.path().join("main/b.bak"), b"bb").await.unwrap();
        tokio::fs::write(dir.path().join("main/a.bak"), b"a").await.unwrap();

        let manager = LocalFileManager::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let listed = manager.list("main", &cancel).await.unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["main/a.bak", "main/b.bak"]);
        assert_eq!(listed[1].size, 2);

        manager.delete("main/a.bak", &cancel).await.unwrap();
        // already gone
        manager.delete("main/a.bak", &cancel).await.unwrap();
        assert_eq!(manager.list("main", &cancel).await.unwrap().len(), 1);
        assert!(manager.list("missing", &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LocalFileManager::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let err = manager
            .download("nope.bak", &dir.path().join("x.bak"), ".down!", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rejects_escaping_names() {
        let manager = LocalFileManager::new("/var/backups").unwrap();
        assert!(manager.resolve("../etc/passwd").is_err());
        assert!(manager.resolve("/etc/passwd").is_err());
        assert!(manager.resolve("db1/a.bak").is_ok());
        assert!(LocalFileManager::new("").is_err());
    }
}
