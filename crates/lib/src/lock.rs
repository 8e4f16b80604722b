//! Lock hash of a fully resolved dependency graph.
//!
//! The lock hash pins two things: the input set fingerprint and every
//! package-level lock file the source tree carries at its root. A manifest
//! whose declared lock hash no longer matches is stale relative to its source.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::inputs::EnvironmentDescriptor;
use crate::util::hash::{DirHashError, HashAlgo, hash_bytes, hash_file};

/// Version of the hashed record; bump when its shape changes.
pub const LOCK_HASH_VERSION: u32 = 1;

/// Package-manager lock files recognized at the source root.
pub const LOCK_FILES: &[&str] = &[
  "Cargo.lock",
  "flake.lock",
  "go.sum",
  "package-lock.json",
  "pnpm-lock.yaml",
  "poetry.lock",
  "yarn.lock",
];

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to hash lock file '{path}': {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: DirHashError,
  },

  #[error("failed to inspect source tree '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode lock record: {0}")]
  Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct LockRecord<'a> {
  version: u32,
  fingerprint: &'a str,
  lockfiles: BTreeMap<&'static str, String>,
}

/// Compute the lock hash of `source_tree` built against `descriptor`.
///
/// Returns lowercase sha256 hex. Lock files are hashed by content only, so the
/// result does not depend on where the tree lives.
pub fn compute_lock_hash(source_tree: &Path, descriptor: &EnvironmentDescriptor) -> Result<String, LockError> {
  if !source_tree.is_dir() {
    return Err(LockError::Io {
      path: source_tree.to_path_buf(),
      source: io::Error::new(io::ErrorKind::NotFound, "source tree does not exist"),
    });
  }

  let mut lockfiles = BTreeMap::new();
  for name in LOCK_FILES {
    let path = source_tree.join(name);
    if !path.is_file() {
      continue;
    }
    let hash = hash_file(&path, HashAlgo::Sha256).map_err(|source| LockError::Hash {
      path: path.clone(),
      source,
    })?;
    trace!(file = %name, hash = %hash, "hashed lock file");
    lockfiles.insert(*name, hash.0);
  }

  let record = LockRecord {
    version: LOCK_HASH_VERSION,
    fingerprint: &descriptor.fingerprint,
    lockfiles,
  };
  Ok(hash_bytes(&serde_json::to_vec(&record)?).0)
}
