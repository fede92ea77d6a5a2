//! Process-wide mutation locks keyed by file path.
//!
//! Every read-modify-write of an env file runs while holding the lock for
//! its path, so two stores opened on the same file still serialise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

static LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Mutation lock for `path`. The same path always yields the same lock.
pub fn lock_for(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut locks = LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}
