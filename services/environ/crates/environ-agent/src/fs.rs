//! Filesystem port for the env file and its tokio implementation.

use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// File operations the [`crate::store::ConfigStore`] needs.
///
/// The production implementation is [`TokioFs`]; tests substitute doubles
/// that fail on demand or count calls.
pub trait FileSystem: Send + Sync {
    /// Whether `path` is an existing regular file.
    fn is_file(&self, path: &Path) -> impl Future<Output = bool> + Send;

    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;

    /// Append `data` to the end of `path`.
    fn append(&self, path: &Path, data: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Replace the whole content of `path` so that readers see either the
    /// old or the new content, never a mix.
    fn replace(&self, path: &Path, data: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// Production [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

impl FileSystem for TokioFs {
    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn append(&self, path: &Path, data: &str) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await?;
        file.write_all(data.as_bytes()).await?;
        file.sync_data().await
    }

    async fn replace(&self, path: &Path, data: &str) -> io::Result<()> {
        let path = path.to_path_buf();
        let data = data.to_owned();
        tokio::task::spawn_blocking(move || atomic_replace(&path, data.as_bytes()))
            .await
            .map_err(io::Error::other)?
    }
}

/// Write `content` to a temp file beside `path`, fsync it, then rename it
/// over `path`. The original permissions are carried over.
///
/// On crash before the rename a stray `.tmp*` file may remain next to the
/// target; the target itself is never partially written.
pub fn atomic_replace(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        temp.as_file().set_permissions(meta.permissions())?;
    }
    temp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    if let Ok(dir) = std::fs::File::open(&dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
