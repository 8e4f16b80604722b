//! Single-writer-per-key locking for store entries.
//!
//! Two layers:
//! - an in-process async mutex per key (tasks within one evaluator)
//! - an exclusive `flock` on `<root>/locks/<section>-<key>.lock` (separate
//!   processes sharing a store)
//!
//! The guard releases both on drop.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use super::StoreError;

/// Registry of per-key async mutexes.
#[derive(Debug, Default)]
pub struct KeyedLocks {
  keys: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a caller is the single writer for a key.
#[derive(Debug)]
pub struct KeyGuard {
  _file: File,
  _guard: OwnedMutexGuard<()>,
  lock_path: PathBuf,
}

impl KeyGuard {
  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

impl KeyedLocks {
  pub fn new() -> Self {
    Self::default()
  }

  fn mutex_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
    let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Prune entries with no holders or waiters
    keys.retain(|_, m| Arc::strong_count(m) > 1);
    keys.entry(key.to_string()).or_default().clone()
  }

  /// Acquire exclusive ownership of `key`, backed by the lock file at `lock_path`.
  pub async fn acquire(&self, key: &str, lock_path: PathBuf) -> Result<KeyGuard, StoreError> {
    let guard = self.mutex_for(key).lock_owned().await;
    trace!(key, "acquired in-process key lock");

    let path = lock_path.clone();
    let file = tokio::task::spawn_blocking(move || open_and_lock(&path))
      .await
      .map_err(|e| StoreError::Lock {
        path: lock_path.clone(),
        source: io::Error::other(e),
      })?
      .map_err(|source| StoreError::Lock {
        path: lock_path.clone(),
        source,
      })?;
    trace!(key, path = ?lock_path, "acquired store file lock");

    Ok(KeyGuard {
      _file: file,
      _guard: guard,
      lock_path,
    })
  }
}

fn open_and_lock(path: &Path) -> io::Result<File> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)?;
  lock_exclusive(&file)?;
  Ok(file)
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::LockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, LOCKFILE_EXCLUSIVE_LOCK, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
