//! Owner of the env file: existence checks, targeted edits and the cache.
//!
//! Every mutation runs under the path's lock from [`crate::locks`] and
//! follows the same shape: check the file still exists, read it, edit the
//! [`EnvDocument`], write it back atomically, then refresh the cache from
//! the content just written. `get`/`getKey` read only the cache and never
//! wait on file I/O.
//!
//! Values are never logged; only keys are.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use environ_common::{EnvValue, ParsedEnv, validate_env_key, validate_env_value};
use tokio::sync::{Mutex, RwLock};

use crate::envfile::{EnvDocument, Upsert, line_ending, parse_env};
use crate::error::StoreError;
use crate::fs::{FileSystem, TokioFs};
use crate::locks::lock_for;

/// The single env file managed by this agent.
pub struct ConfigStore<F = TokioFs> {
    path: PathBuf,
    fs: F,
    lock: Arc<Mutex<()>>,
    cache: RwLock<ParsedEnv>,
}

impl<F> std::fmt::Debug for ConfigStore<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ConfigStore<TokioFs> {
    /// Open the env file at `path`. The file must already exist; it is
    /// never created.
    ///
    /// Symlinks are resolved once here so atomic replaces rewrite the
    /// target rather than the link.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = tokio::fs::canonicalize(path.as_ref())
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StoreError::Missing,
                _ => StoreError::Io(e),
            })?;
        Self::open_with(TokioFs, path).await
    }
}

impl<F: FileSystem> ConfigStore<F> {
    /// Open `path` through `fs` and build the initial cache.
    pub async fn open_with(fs: F, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !fs.is_file(&path).await {
            return Err(StoreError::Missing);
        }
        let content = fs.read_to_string(&path).await?;
        let cache = parse_env(&content);
        tracing::info!(path = %path.display(), keys = cache.len(), "env file loaded");
        Ok(Self {
            lock: lock_for(&path),
            path,
            fs,
            cache: RwLock::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the env file is still there. Checked by every file operation
    /// because the file may be removed behind the agent's back.
    pub async fn exists(&self) -> bool {
        self.fs.is_file(&self.path).await
    }

    /// Copy of the cached mapping. Does not touch the disk.
    pub async fn snapshot(&self) -> ParsedEnv {
        self.cache.read().await.clone()
    }

    /// Cached value of `key`. Does not touch the disk.
    pub async fn value(&self, key: &str) -> Option<EnvValue> {
        self.cache.read().await.get(key).cloned()
    }

    async fn is_cached(&self, key: &str) -> bool {
        self.cache.read().await.contains_key(key)
    }

    async fn ensure_exists(&self) -> Result<(), StoreError> {
        if self.exists().await {
            Ok(())
        } else {
            tracing::warn!(path = %self.path.display(), "env file is missing");
            Err(StoreError::Missing)
        }
    }

    async fn store_cache(&self, env: ParsedEnv) {
        *self.cache.write().await = env;
    }

    /// Insert a key that is not in the cache yet.
    ///
    /// Appends in two steps: a line break if the file does not end with
    /// one, then `KEY=VALUE` with its terminator. A crash in between leaves
    /// at most an extra line break.
    pub async fn add(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists().await?;
        check_entry(key, value)?;
        if self.is_cached(key).await {
            return Err(StoreError::KeyExists(key.to_string()));
        }

        let content = self.fs.read_to_string(&self.path).await?;
        let eol = line_ending(&content);
        if !content.is_empty() && !content.ends_with('\n') {
            self.fs.append(&self.path, eol).await?;
        }
        self.fs
            .append(&self.path, &format!("{key}={value}{eol}"))
            .await?;
        tracing::info!(key, "env key added");

        self.reload_locked().await;
        Ok(())
    }

    /// Update the line assigning `key`, or append one. With duplicates the
    /// last assignment is rewritten, so reads see the new value.
    ///
    /// Comment lines and keys that merely share a prefix are never touched.
    /// Calling it twice with the same arguments leaves the same bytes as
    /// calling it once.
    pub async fn set(&self, key: &str, value: &str) -> Result<Upsert, StoreError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists().await?;
        check_entry(key, value)?;

        let content = self.fs.read_to_string(&self.path).await?;
        let mut doc = EnvDocument::parse(&content);
        let placement = doc.upsert(key, value);
        let updated = doc.render();
        if updated == content {
            tracing::debug!(key, "env key already up to date");
        } else {
            self.fs.replace(&self.path, &updated).await?;
            tracing::info!(key, ?placement, "env key set");
        }

        self.store_cache(parse_env(&updated)).await;
        Ok(placement)
    }

    /// Remove the line assigning `key`. With duplicates this is the last
    /// one, the assignment the cache reports.
    ///
    /// The key must be in the cache. If the file no longer has a matching
    /// line nothing is written, the call still succeeds and the cache is
    /// resynchronised with the disk. Returns the removed line's index.
    pub async fn delete(&self, key: &str) -> Result<Option<usize>, StoreError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists().await?;
        if !self.is_cached(key).await {
            return Err(StoreError::KeyMissing(key.to_string()));
        }

        let content = self.fs.read_to_string(&self.path).await?;
        let mut doc = EnvDocument::parse(&content);
        let removed = doc.remove(key);
        let updated = doc.render();
        match removed {
            Some(line) => {
                self.fs.replace(&self.path, &updated).await?;
                tracing::info!(key, line, "env key deleted");
            }
            None => tracing::warn!(key, "cached key has no line in env file"),
        }

        self.store_cache(parse_env(&updated)).await;
        Ok(removed)
    }

    /// Replace the whole file with `data`, verbatim.
    pub async fn write(&self, data: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.ensure_exists().await?;
        self.fs.replace(&self.path, data).await?;
        tracing::info!(bytes = data.len(), "env file replaced");
        self.store_cache(parse_env(data)).await;
        Ok(())
    }

    /// Cache refresh after an append. The append already succeeded, so a
    /// failed re-read only leaves the cache stale.
    async fn reload_locked(&self) {
        match self.fs.read_to_string(&self.path).await {
            Ok(content) => self.store_cache(parse_env(&content)).await,
            Err(e) => tracing::warn!(error = %e, "env cache refresh failed"),
        }
    }
}

fn check_entry(key: &str, value: &str) -> Result<(), StoreError> {
    validate_env_key(key).map_err(|reason| StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    })?;
    validate_env_value(value).map_err(|reason| StoreError::InvalidValue {
        key: key.to_string(),
        reason,
    })
}
