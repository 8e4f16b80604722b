//! SourceLocator resolution.
//!
//! Turns a [`SourceLocator`] into a verified, content-addressed tree in the
//! store. A tree only becomes visible under its key after its hash matched the
//! declared one; concurrent resolves of the same locator fetch at most once.

pub mod fetch;
pub mod origin;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::{ManifestError, SourceLocator};
use crate::store::{Section, Store, StoreError};
use crate::util::hash::{HashAlgo, hash_directory};

pub use fetch::{DefaultFetcher, FetchError, Fetcher, HttpFetcher, PathFetcher};
pub use origin::{Origin, OriginError};

/// A fetched tree whose content hash matched the declared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSource {
  pub path: PathBuf,
  pub hash: String,
  pub algo: HashAlgo,
}

impl VerifiedSource {
  /// Store key, `<algo>-<hash>`.
  pub fn key(&self) -> String {
    source_key(self.algo, &self.hash)
  }
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  InvalidManifest(#[from] ManifestError),

  #[error("fetch of {origin} failed: {source}")]
  FetchFailed {
    origin: String,
    #[source]
    source: FetchError,
  },

  #[error("fetch of {origin} timed out after {timeout:?}")]
  FetchTimedOut { origin: String, timeout: Duration },

  #[error("hash mismatch: expected {expected}, got {actual}")]
  HashMismatch { expected: String, actual: String },

  #[error(transparent)]
  Store(#[from] StoreError),
}

pub fn source_key(algo: HashAlgo, hash: &str) -> String {
  format!("{}-{}", algo.as_str(), hash)
}

/// Resolve `locator` to a verified tree in `store`.
///
/// Returns the cached tree when the store already holds it. Otherwise the
/// origin is fetched into staging, hashed, and published only on a match; a
/// mismatch leaves the store untouched.
pub async fn resolve<F: Fetcher>(
  locator: &SourceLocator,
  store: &Store,
  fetcher: &F,
  timeout: Duration,
) -> Result<VerifiedSource, ResolveError> {
  let origin = locator.validate()?;
  let algo = locator.hash_algo;
  let key = source_key(algo, &locator.hash);

  let _guard = store.lock(Section::Source, &key).await?;

  if let Some(path) = store.lookup(Section::Source, &key)? {
    debug!(origin = %origin, path = ?path, "source cached");
    return Ok(VerifiedSource {
      path,
      hash: locator.hash.clone(),
      algo,
    });
  }

  let staging = store.stage(Section::Source, &key)?;
  match tokio::time::timeout(timeout, fetcher.fetch(&origin, staging.path())).await {
    Ok(Ok(())) => {}
    Ok(Err(source)) => {
      return Err(ResolveError::FetchFailed {
        origin: origin.to_string(),
        source,
      });
    }
    Err(_) => {
      return Err(ResolveError::FetchTimedOut {
        origin: origin.to_string(),
        timeout,
      });
    }
  }

  let actual = hash_directory(staging.path(), &[], algo).map_err(StoreError::from)?;
  if actual.0 != locator.hash {
    return Err(ResolveError::HashMismatch {
      expected: locator.hash.clone(),
      actual: actual.0,
    });
  }

  let path = store.publish(staging)?;
  info!(origin = %origin, hash = %locator.hash, "source verified");
  Ok(VerifiedSource {
    path,
    hash: locator.hash.clone(),
    algo,
  })
}
