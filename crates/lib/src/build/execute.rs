//! Single build realization.
//!
//! Checks the declared lock hash, derives the output key and, unless the key
//! is already in the store, runs the engine against a writable copy of the
//! source and publishes what it installed.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::engine::{BuildEngine, EngineRequest};
use crate::build::types::{BuildKeyInput, BuildOutput, Recipe};
use crate::consts::COMPLETE_MARKER;
use crate::inputs::EnvironmentDescriptor;
use crate::lock::{LockError, compute_lock_hash};
use crate::manifest::Package;
use crate::source::VerifiedSource;
use crate::store::{Section, Store, StoreError};
use crate::util::fs::copy_tree;
use crate::util::hash::{HashError, ObjectHash};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("lock hash mismatch: manifest declares {expected}, source resolves to {actual}")]
  LockHashMismatch { expected: String, actual: String },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("build failed ({})", describe_exit(.code))]
  Failed {
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  #[error("build timed out after {0:?}")]
  TimedOut(Duration),

  #[error("failed to start build engine: {0}")]
  Spawn(#[source] io::Error),

  #[error("failed to prepare build directory '{path}': {source}")]
  Prepare {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to derive build key: {0}")]
  Key(#[source] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "terminated by signal".to_string(),
  }
}

/// Inputs of one build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
  pub package: &'a Package,
  pub source: &'a VerifiedSource,
  pub environment: &'a EnvironmentDescriptor,
  pub declared_lock_hash: &'a str,
  pub recipe: &'a Recipe,
}

impl BuildRequest<'_> {
  /// Check the lock hash and derive the output key without building.
  pub fn key(&self) -> Result<ObjectHash, BuildError> {
    let actual = compute_lock_hash(&self.source.path, self.environment)?;
    if actual != self.declared_lock_hash {
      return Err(BuildError::LockHashMismatch {
        expected: self.declared_lock_hash.to_string(),
        actual,
      });
    }
    BuildKeyInput::new(
      self.package,
      &self.source.hash,
      &actual,
      &self.environment.fingerprint,
      &self.environment.vars,
      self.recipe,
    )
    .key()
    .map_err(BuildError::Key)
  }
}

/// Realize a build.
///
/// Idempotent: a key already present in the store is returned with
/// `cached = true` and the engine is not invoked. Concurrent calls for the
/// same key run the engine at most once.
pub async fn realize<E: BuildEngine>(
  request: BuildRequest<'_>,
  store: &Store,
  engine: &E,
  timeout: Duration,
) -> Result<BuildOutput, BuildError> {
  let key = request.key()?;
  info!(package = %request.package.name, version = %request.package.version, key = %key, "realizing build");

  let _guard = store.lock(Section::Output, &key.0).await?;

  if let Some(path) = store.lookup(Section::Output, &key.0)? {
    info!(key = %key, path = ?path, "build cached");
    return Ok(BuildOutput {
      key,
      path,
      cached: true,
    });
  }

  let staging = store.stage(Section::Output, &key.0)?;
  let work = store.scratch(&key.0)?;
  let src_dir = work.path().join("src");
  let tmp_dir = work.path().join("tmp");

  let source_path = request.source.path.clone();
  let copy_dst = src_dir.clone();
  tokio::task::spawn_blocking(move || copy_tree(&source_path, &copy_dst, &[COMPLETE_MARKER]))
    .await
    .map_err(|e| BuildError::Prepare {
      path: src_dir.clone(),
      source: io::Error::other(e),
    })?
    .map_err(|source| BuildError::Prepare {
      path: src_dir.clone(),
      source,
    })?;
  tokio::fs::create_dir_all(&tmp_dir)
    .await
    .map_err(|source| BuildError::Prepare {
      path: tmp_dir.clone(),
      source,
    })?;
  debug!(src = ?src_dir, out = ?staging.path(), "prepared build directories");

  let engine_request = EngineRequest {
    script: &request.recipe.script,
    src_dir: &src_dir,
    out_dir: staging.path(),
    tmp_dir: &tmp_dir,
    environment: request.environment,
  };
  let output = match tokio::time::timeout(timeout, engine.run(engine_request)).await {
    Ok(result) => result.map_err(BuildError::Spawn)?,
    Err(_) => {
      warn!(key = %key, timeout = ?timeout, "build timed out");
      return Err(BuildError::TimedOut(timeout));
    }
  };

  if !output.success() {
    warn!(key = %key, code = ?output.code, "build failed");
    return Err(BuildError::Failed {
      code: output.code,
      stdout: output.stdout,
      stderr: output.stderr,
    });
  }

  let path = store.publish(staging)?;
  info!(key = %key, path = ?path, "build complete");
  Ok(BuildOutput {
    key,
    path,
    cached: false,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::EngineOutput;
  use crate::inputs::fingerprint;
  use crate::manifest::BuildSpec;
  use crate::util::hash::HashAlgo;
  use std::collections::BTreeMap;
  use std::fs;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  /// Copies `src/main.rs` into `$out/bin/main` and records invocations.
  #[derive(Default)]
  struct CopyEngine {
    calls: AtomicUsize,
  }

  impl BuildEngine for CopyEngine {
    async fn run(&self, request: EngineRequest<'_>) -> io::Result<EngineOutput> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      fs::create_dir_all(request.out_dir.join("bin"))?;
      fs::copy(request.src_dir.join("main.rs"), request.out_dir.join("bin/main"))?;
      Ok(EngineOutput {
        code: Some(0),
        stdout: "built\n".to_string(),
        stderr: String::new(),
      })
    }
  }

  struct FailingEngine;

  impl BuildEngine for FailingEngine {
    async fn run(&self, request: EngineRequest<'_>) -> io::Result<EngineOutput> {
      fs::write(request.out_dir.join("partial"), "x")?;
      Ok(EngineOutput {
        code: Some(101),
        stdout: "Compiling ox\n".to_string(),
        stderr: "error[E0425]: cannot find value `x`\n".to_string(),
      })
    }
  }

  struct SlowEngine;

  impl BuildEngine for SlowEngine {
    async fn run(&self, _request: EngineRequest<'_>) -> io::Result<EngineOutput> {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok(EngineOutput::default())
    }
  }

  struct Fixture {
    _temp: TempDir,
    store: Store,
    package: Package,
    source: VerifiedSource,
    environment: EnvironmentDescriptor,
    lock_hash: String,
    recipe: Recipe,
  }

  impl Fixture {
    fn new() -> Self {
      let temp = TempDir::new().unwrap();
      let store = Store::open(temp.path().join("store")).unwrap();
      let src = temp.path().join("source");
      fs::create_dir_all(&src).unwrap();
      fs::write(src.join("main.rs"), "fn main() {}").unwrap();
      fs::write(src.join("Cargo.lock"), "version = 3").unwrap();

      let environment = EnvironmentDescriptor {
        native: vec![],
        libraries: vec![],
        vars: BTreeMap::new(),
        entry_hook: None,
        fingerprint: fingerprint(["pkg-config"], ["openssl"]),
      };
      let lock_hash = compute_lock_hash(&src, &environment).unwrap();

      Self {
        _temp: temp,
        store,
        package: Package {
          name: "ox".to_string(),
          version: "v0.1.1-alpha".to_string(),
        },
        source: VerifiedSource {
          path: src,
          hash: "a".repeat(64),
          algo: HashAlgo::Sha256,
        },
        environment,
        lock_hash,
        recipe: Recipe::from_spec(&BuildSpec::default(), true),
      }
    }

    fn request(&self) -> BuildRequest<'_> {
      BuildRequest {
        package: &self.package,
        source: &self.source,
        environment: &self.environment,
        declared_lock_hash: &self.lock_hash,
        recipe: &self.recipe,
      }
    }
  }

  const TIMEOUT: Duration = Duration::from_secs(10);

  #[tokio::test]
  async fn realize_publishes_output() {
    let fx = Fixture::new();
    let engine = CopyEngine::default();

    let output = realize(fx.request(), &fx.store, &engine, TIMEOUT).await.unwrap();

    assert!(!output.cached);
    assert_eq!(output.path, fx.store.entry_path(Section::Output, &output.key.0));
    assert_eq!(fs::read_to_string(output.path.join("bin/main")).unwrap(), "fn main() {}");
  }

  #[tokio::test]
  async fn second_realize_is_cached_without_engine() {
    let fx = Fixture::new();
    let engine = CopyEngine::default();

    let first = realize(fx.request(), &fx.store, &engine, TIMEOUT).await.unwrap();
    let second = realize(fx.request(), &fx.store, &engine, TIMEOUT).await.unwrap();

    assert_eq!(first.key, second.key);
    assert!(second.cached);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn lock_mismatch_stops_before_engine() {
    let fx = Fixture::new();
    let engine = CopyEngine::default();
    let stale = "0".repeat(64);
    let request = BuildRequest {
      declared_lock_hash: &stale,
      ..fx.request()
    };

    let err = realize(request, &fx.store, &engine, TIMEOUT).await.unwrap_err();

    assert!(matches!(err, BuildError::LockHashMismatch { ref expected, .. } if *expected == stale));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn failure_carries_engine_output_and_publishes_nothing() {
    let fx = Fixture::new();

    let err = realize(fx.request(), &fx.store, &FailingEngine, TIMEOUT).await.unwrap_err();

    match err {
      BuildError::Failed { code, stdout, stderr } => {
        assert_eq!(code, Some(101));
        assert_eq!(stdout, "Compiling ox\n");
        assert_eq!(stderr, "error[E0425]: cannot find value `x`\n");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    let key = fx.request().key().unwrap();
    assert!(!fx.store.contains(Section::Output, &key.0));
    assert_eq!(fs::read_dir(fx.store.root().join("tmp")).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn timeout_is_build_failure() {
    let fx = Fixture::new();

    let err = realize(fx.request(), &fx.store, &SlowEngine, Duration::from_millis(50))
      .await
      .unwrap_err();

    assert!(matches!(err, BuildError::TimedOut(_)));
    assert_eq!(fs::read_dir(fx.store.root().join("tmp")).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn source_marker_not_copied() {
    let fx = Fixture::new();
    fs::write(fx.source.path.join(COMPLETE_MARKER), "{}").unwrap();

    struct Inspect;
    impl BuildEngine for Inspect {
      async fn run(&self, request: EngineRequest<'_>) -> io::Result<EngineOutput> {
        let code = if request.src_dir.join(COMPLETE_MARKER).exists() { 1 } else { 0 };
        Ok(EngineOutput {
          code: Some(code),
          ..Default::default()
        })
      }
    }

    realize(fx.request(), &fx.store, &Inspect, TIMEOUT).await.unwrap();
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_realize_builds_once() {
    let fx = Arc::new(Fixture::new());
    let engine = Arc::new(CopyEngine::default());

    let handles: Vec<_> = (0..6)
      .map(|_| {
        let fx = fx.clone();
        let engine = engine.clone();
        tokio::spawn(async move { realize(fx.request(), &fx.store, &*engine, TIMEOUT).await.map(|o| o.key) })
      })
      .collect();

    let mut keys = Vec::new();
    for handle in handles {
      keys.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
  }
}
