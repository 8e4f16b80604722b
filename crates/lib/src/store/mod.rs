//! Content-addressed local store.
//!
//! The store is the only shared mutable resource: verified source trees and
//! build outputs live here, keyed by content hash. It is passed explicitly to
//! every component that needs it.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── src/<algo>-<hash>/      # Verified source trees
//! ├── out/<key>/              # Build outputs
//! ├── tmp/                    # Staging, never visible under a key
//! └── locks/                  # One lock file per key being written
//! ```
//!
//! Entries are written into `tmp/`, stamped with a completion marker and then
//! renamed into place. An entry without a valid marker is treated as absent.

pub mod lock;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::COMPLETE_MARKER;
use crate::platform::paths::store_dir;
use crate::util::hash::{DirHashError, HashAlgo, hash_directory};

pub use lock::{KeyGuard, KeyedLocks};

const MARKER_VERSION: u32 = 1;
const TMP_DIR: &str = "tmp";
const LOCKS_DIR: &str = "locks";

/// Top-level partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
  Source,
  Output,
}

impl Section {
  pub fn dir_name(&self) -> &'static str {
    match self {
      Section::Source => "src",
      Section::Output => "out",
    }
  }
}

/// Errors raised by local store I/O.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("store i/o error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash store entry: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to write marker for '{path}': {message}")]
  Marker { path: PathBuf, message: String },

  #[error("failed to lock '{path}': {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to publish '{path}': {source}")]
  Publish {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Contents of the completion marker inside every published entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMarker {
  /// Marker format version.
  pub version: u32,
  pub section: Section,
  pub key: String,
  /// SHA-256 of the entry contents, excluding the marker itself.
  pub content_hash: String,
}

/// A directory being populated for a key. Dropping it discards the contents.
#[derive(Debug)]
pub struct Staging {
  dir: TempDir,
  section: Section,
  key: String,
}

impl Staging {
  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  pub fn section(&self) -> Section {
    self.section
  }

  pub fn key(&self) -> &str {
    &self.key
  }
}

#[derive(Debug)]
pub struct Store {
  root: PathBuf,
  locks: KeyedLocks,
}

impl Store {
  /// Open (creating if needed) a store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for dir in [
      Section::Source.dir_name(),
      Section::Output.dir_name(),
      TMP_DIR,
      LOCKS_DIR,
    ] {
      let path = root.join(dir);
      fs::create_dir_all(&path).map_err(|source| StoreError::CreateDir { path, source })?;
    }
    debug!(root = ?root, "opened store");
    Ok(Self {
      root,
      locks: KeyedLocks::new(),
    })
  }

  /// Open the store at the configured default location (`KILN_STORE` or the data dir).
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Path an entry occupies once published, whether or not it exists.
  pub fn entry_path(&self, section: Section, key: &str) -> PathBuf {
    self.root.join(section.dir_name()).join(key)
  }

  /// Cheap presence check: the entry exists and carries a marker.
  pub fn contains(&self, section: Section, key: &str) -> bool {
    self.entry_path(section, key).join(COMPLETE_MARKER).exists()
  }

  /// Return the entry's path if it is present and its contents still match its marker.
  ///
  /// Entries with a missing, unreadable or mismatching marker are evicted so the
  /// caller can repopulate them. Callers should hold the key lock.
  pub fn lookup(&self, section: Section, key: &str) -> Result<Option<PathBuf>, StoreError> {
    let path = self.entry_path(section, key);
    if !path.exists() {
      return Ok(None);
    }

    match read_marker(&path) {
      Some(marker) if marker.key == key && marker.section == section => {
        let current = hash_directory(&path, &[COMPLETE_MARKER], HashAlgo::Sha256)?;
        if current.0 == marker.content_hash {
          debug!(section = section.dir_name(), key, "store hit");
          return Ok(Some(path));
        }
        warn!(
          path = ?path,
          expected = %marker.content_hash,
          actual = %current.0,
          "store entry corrupted, evicting"
        );
      }
      _ => {
        warn!(path = ?path, "store entry has no valid marker, evicting");
      }
    }

    fs::remove_dir_all(&path).map_err(|source| StoreError::Io { path, source })?;
    Ok(None)
  }

  /// Become the single writer for `key` until the guard is dropped.
  pub async fn lock(&self, section: Section, key: &str) -> Result<KeyGuard, StoreError> {
    let name = format!("{}-{}", section.dir_name(), key);
    let lock_path = self.root.join(LOCKS_DIR).join(format!("{}.lock", name));
    self.locks.acquire(&name, lock_path).await
  }

  /// Create a staging directory for `key` under `tmp/`.
  pub fn stage(&self, section: Section, key: &str) -> Result<Staging, StoreError> {
    let tmp = self.root.join(TMP_DIR);
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-{}-", section.dir_name(), key))
      .tempdir_in(&tmp)
      .map_err(|source| StoreError::CreateDir { path: tmp, source })?;
    debug!(path = ?dir.path(), "staging store entry");
    Ok(Staging {
      dir,
      section,
      key: key.to_string(),
    })
  }

  /// Create a scratch directory under `tmp/` that is removed on drop.
  pub fn scratch(&self, label: &str) -> Result<TempDir, StoreError> {
    let tmp = self.root.join(TMP_DIR);
    tempfile::Builder::new()
      .prefix(&format!("work-{}-", label))
      .tempdir_in(&tmp)
      .map_err(|source| StoreError::CreateDir { path: tmp, source })
  }

  /// Stamp the staged contents and atomically move them under their key.
  ///
  /// Publishing a key that already holds a complete entry is a no-op and the
  /// staged copy is discarded.
  pub fn publish(&self, staging: Staging) -> Result<PathBuf, StoreError> {
    let final_path = self.entry_path(staging.section, &staging.key);

    if self.contains(staging.section, &staging.key) {
      debug!(path = ?final_path, "entry already published, discarding staged copy");
      return Ok(final_path);
    }
    if final_path.exists() {
      fs::remove_dir_all(&final_path).map_err(|source| StoreError::Io {
        path: final_path.clone(),
        source,
      })?;
    }

    let content_hash = hash_directory(staging.path(), &[COMPLETE_MARKER], HashAlgo::Sha256)?;
    let marker = EntryMarker {
      version: MARKER_VERSION,
      section: staging.section,
      key: staging.key.clone(),
      content_hash: content_hash.0,
    };
    write_marker(staging.path(), &marker)?;

    match fs::rename(staging.path(), &final_path) {
      Ok(()) => {
        info!(path = ?final_path, "published store entry");
        Ok(final_path)
      }
      // Lost a race with another process publishing the same content
      Err(_) if self.contains(staging.section, &staging.key) => Ok(final_path),
      Err(source) => Err(StoreError::Publish {
        path: final_path,
        source,
      }),
    }
  }

  /// Remove staging and scratch directories older than `older_than`.
  ///
  /// These are left behind only when a process is killed mid-operation.
  pub fn gc_staging(&self, older_than: Duration) -> Result<usize, StoreError> {
    let tmp = self.root.join(TMP_DIR);
    let entries = fs::read_dir(&tmp).map_err(|source| StoreError::Io {
      path: tmp.clone(),
      source,
    })?;
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
      let path = entry.path();
      let age = entry
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or_default();
      if age < older_than {
        continue;
      }
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      match result {
        Ok(()) => removed += 1,
        Err(e) => warn!(path = ?path, error = %e, "failed to remove stale staging entry"),
      }
    }

    if removed > 0 {
      info!(removed, "removed stale staging entries");
    }
    Ok(removed)
  }
}

fn read_marker(entry: &Path) -> Option<EntryMarker> {
  let content = fs::read_to_string(entry.join(COMPLETE_MARKER)).ok()?;
  serde_json::from_str(&content).ok()
}

fn write_marker(dir: &Path, marker: &EntryMarker) -> Result<(), StoreError> {
  let path = dir.join(COMPLETE_MARKER);
  let content = serde_json::to_string(marker).map_err(|e| StoreError::Marker {
    path: path.clone(),
    message: e.to_string(),
  })?;
  fs::write(&path, format!("{}\n", content)).map_err(|e| StoreError::Marker {
    path,
    message: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  fn temp_store() -> (TempDir, Store) {
    let temp = TempDir::new().unwrap();
    let store = Store::open(temp.path().join("store")).unwrap();
    (temp, store)
  }

  #[test]
  fn open_creates_layout() {
    let (_temp, store) = temp_store();
    for dir in ["src", "out", "tmp", "locks"] {
      assert!(store.root().join(dir).is_dir(), "{} should exist", dir);
    }
  }

  #[test]
  #[serial]
  fn open_default_honors_env() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("env-store");
    temp_env::with_var("KILN_STORE", Some(root.to_str().unwrap()), || {
      let store = Store::open_default().unwrap();
      assert_eq!(store.root(), root.as_path());
    });
  }

  #[test]
  fn staged_entry_invisible_until_published() {
    let (_temp, store) = temp_store();
    let staging = store.stage(Section::Output, "k1").unwrap();
    fs::write(staging.path().join("file.txt"), "data").unwrap();

    assert!(!store.contains(Section::Output, "k1"));
    assert!(store.lookup(Section::Output, "k1").unwrap().is_none());

    let path = store.publish(staging).unwrap();

    assert_eq!(path, store.entry_path(Section::Output, "k1"));
    assert_eq!(fs::read_to_string(path.join("file.txt")).unwrap(), "data");
    assert!(store.lookup(Section::Output, "k1").unwrap().is_some());
  }

  #[test]
  fn dropped_staging_leaves_nothing_behind() {
    let (_temp, store) = temp_store();
    {
      let staging = store.stage(Section::Source, "abc").unwrap();
      fs::write(staging.path().join("partial"), "half").unwrap();
    }

    assert!(!store.entry_path(Section::Source, "abc").exists());
    assert_eq!(fs::read_dir(store.root().join("tmp")).unwrap().count(), 0);
  }

  #[test]
  fn second_publish_is_noop() {
    let (_temp, store) = temp_store();

    let first = store.stage(Section::Output, "same").unwrap();
    fs::write(first.path().join("a.txt"), "first").unwrap();
    store.publish(first).unwrap();

    let second = store.stage(Section::Output, "same").unwrap();
    fs::write(second.path().join("a.txt"), "second").unwrap();
    let path = store.publish(second).unwrap();

    assert_eq!(fs::read_to_string(path.join("a.txt")).unwrap(), "first");
    assert_eq!(fs::read_dir(store.root().join("tmp")).unwrap().count(), 0);
  }

  #[test]
  fn marker_records_content_hash() {
    let (_temp, store) = temp_store();
    let staging = store.stage(Section::Output, "m").unwrap();
    fs::write(staging.path().join("bin"), "binary").unwrap();
    let path = store.publish(staging).unwrap();

    let marker = read_marker(&path).unwrap();
    let expected = hash_directory(&path, &[COMPLETE_MARKER], HashAlgo::Sha256).unwrap();

    assert_eq!(marker.version, MARKER_VERSION);
    assert_eq!(marker.key, "m");
    assert_eq!(marker.content_hash, expected.0);
  }

  #[test]
  fn corrupted_entry_is_evicted() {
    let (_temp, store) = temp_store();
    let staging = store.stage(Section::Output, "c").unwrap();
    fs::write(staging.path().join("file.txt"), "original").unwrap();
    let path = store.publish(staging).unwrap();

    fs::write(path.join("file.txt"), "tampered").unwrap();

    assert!(store.lookup(Section::Output, "c").unwrap().is_none());
    assert!(!path.exists());
  }

  #[test]
  fn entry_without_marker_is_evicted() {
    let (_temp, store) = temp_store();
    let path = store.entry_path(Section::Source, "nomarker");
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("partial"), "x").unwrap();

    assert!(store.lookup(Section::Source, "nomarker").unwrap().is_none());
    assert!(!path.exists());
  }

  #[test]
  fn gc_staging_respects_age() {
    let (_temp, store) = temp_store();
    let leftover = store.root().join("tmp").join("out-dead-xyz");
    fs::create_dir_all(&leftover).unwrap();

    assert_eq!(store.gc_staging(Duration::from_secs(3600)).unwrap(), 0);
    assert!(leftover.exists());

    assert_eq!(store.gc_staging(Duration::ZERO).unwrap(), 1);
    assert!(!leftover.exists());
  }
}
