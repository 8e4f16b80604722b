//! Test utilities for kiln-lib.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::source::{FetchError, Fetcher, Origin};
use crate::util::hash::{HashAlgo, hash_directory};

/// Write `files` (relative path, content) under `root`, creating parents.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
  for (rel, content) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }
}

/// The sha256 directory hash of a tree containing exactly `files`.
pub fn tree_hash(files: &[(&str, &str)]) -> String {
  let dir = tempfile::tempdir().unwrap();
  write_files(dir.path(), files);
  hash_directory(dir.path(), &[], HashAlgo::Sha256).unwrap().0
}

/// Fetcher that writes a fixed tree and counts invocations.
pub struct TreeFetcher {
  files: Vec<(&'static str, &'static str)>,
  delay: Duration,
  calls: AtomicUsize,
}

impl TreeFetcher {
  pub fn new(files: &[(&'static str, &'static str)]) -> Self {
    Self {
      files: files.to_vec(),
      delay: Duration::from_millis(20),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for TreeFetcher {
  async fn fetch(&self, _origin: &Origin, dest: &Path) -> Result<(), FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    write_files(dest, &self.files);
    Ok(())
  }
}
