//! Manifest evaluation.
//!
//! The [`Evaluator`] drives the four components for one manifest: resolve the
//! source, build the input graph, then either realize the package or compose
//! the devShell. Errors from any component reach the caller untouched, tagged
//! with an [`ErrorTag`]. Nothing is retried implicitly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::build::{BuildEngine, BuildError, BuildOutput, BuildRequest, Recipe, ShellEngine, realize};
use crate::inputs::{EnvironmentDescriptor, GraphError, HostEnvironment, InputEnvironment, build_environment};
use crate::lock::{LockError, compute_lock_hash};
use crate::manifest::{Manifest, ManifestError};
use crate::shell::{ComposeError, LiveEnvironment, compose};
use crate::source::{DefaultFetcher, FetchError, Fetcher, ResolveError, VerifiedSource, resolve};
use crate::store::{Store, StoreError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// The error taxonomy surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
  InvalidManifest,
  FetchFailed,
  HashMismatch,
  UnresolvedInput,
  LockHashMismatch,
  BuildFailed,
  /// Local I/O failure in the store or a source tree.
  Store,
}

impl ErrorTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorTag::InvalidManifest => "InvalidManifest",
      ErrorTag::FetchFailed => "FetchFailed",
      ErrorTag::HashMismatch => "HashMismatch",
      ErrorTag::UnresolvedInput => "UnresolvedInput",
      ErrorTag::LockHashMismatch => "LockHashMismatch",
      ErrorTag::BuildFailed => "BuildFailed",
      ErrorTag::Store => "Store",
    }
  }
}

impl fmt::Display for ErrorTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum EvalError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Compose(#[from] ComposeError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl EvalError {
  pub fn tag(&self) -> ErrorTag {
    match self {
      EvalError::Manifest(_) | EvalError::Compose(ComposeError::InvalidEntryHook) => ErrorTag::InvalidManifest,
      EvalError::Resolve(err) => match err {
        ResolveError::InvalidManifest(_) => ErrorTag::InvalidManifest,
        ResolveError::FetchFailed { .. } | ResolveError::FetchTimedOut { .. } => ErrorTag::FetchFailed,
        ResolveError::HashMismatch { .. } => ErrorTag::HashMismatch,
        ResolveError::Store(_) => ErrorTag::Store,
      },
      EvalError::Graph(GraphError::UnresolvedInput(_)) => ErrorTag::UnresolvedInput,
      EvalError::Build(err) => match err {
        BuildError::LockHashMismatch { .. } => ErrorTag::LockHashMismatch,
        BuildError::Failed { .. } | BuildError::TimedOut(_) | BuildError::Spawn(_) => ErrorTag::BuildFailed,
        BuildError::Lock(_) | BuildError::Prepare { .. } | BuildError::Key(_) | BuildError::Store(_) => {
          ErrorTag::Store
        }
      },
      EvalError::Lock(_) | EvalError::Store(_) => ErrorTag::Store,
    }
  }

  /// Whether re-invoking the same evaluation could succeed.
  ///
  /// Only transient origin-side failures qualify.
  pub fn is_retryable(&self) -> bool {
    match self {
      EvalError::Resolve(ResolveError::FetchFailed { source, .. }) => source.is_retryable(),
      EvalError::Resolve(ResolveError::FetchTimedOut { .. }) => true,
      _ => false,
    }
  }

  /// The build engine's raw stdout and stderr, for `BuildFailed`.
  pub fn engine_output(&self) -> Option<(&str, &str)> {
    match self {
      EvalError::Build(BuildError::Failed { stdout, stderr, .. }) => Some((stdout, stderr)),
      _ => None,
    }
  }
}

/// Options passed explicitly to the evaluator.
#[derive(Debug, Clone)]
pub struct EvalConfig {
  pub fetch_timeout: Option<Duration>,
  pub build_timeout: Option<Duration>,
  /// Interactive shell for entering a devShell that has no entry hook.
  pub shell: Option<String>,
  /// Run the package's test phase during builds.
  pub check: bool,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      fetch_timeout: None,
      build_timeout: None,
      shell: None,
      check: true,
    }
  }
}

impl EvalConfig {
  pub fn fetch_timeout(&self) -> Duration {
    self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT)
  }

  pub fn build_timeout(&self) -> Duration {
    self.build_timeout.unwrap_or(DEFAULT_BUILD_TIMEOUT)
  }
}

/// Drives manifest evaluations against one store.
///
/// An evaluator may be shared; evaluations of distinct manifests run in
/// parallel and coordinate through the store's keyed locks.
pub struct Evaluator<F, E, I> {
  store: Arc<Store>,
  fetcher: F,
  engine: E,
  inputs: I,
  config: EvalConfig,
}

impl Evaluator<DefaultFetcher, ShellEngine, HostEnvironment> {
  /// Evaluator using the network, `/bin/sh` and the host's installed tools.
  pub fn host(store: Arc<Store>, config: EvalConfig) -> Result<Self, FetchError> {
    Ok(Self::new(
      store,
      DefaultFetcher::new()?,
      ShellEngine::new(),
      HostEnvironment::new(),
      config,
    ))
  }
}

impl<F: Fetcher, E: BuildEngine, I: InputEnvironment> Evaluator<F, E, I> {
  pub fn new(store: Arc<Store>, fetcher: F, engine: E, inputs: I, config: EvalConfig) -> Self {
    Self {
      store,
      fetcher,
      engine,
      inputs,
      config,
    }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn config(&self) -> &EvalConfig {
    &self.config
  }

  /// Fetch and verify the manifest's source.
  pub async fn resolve_source(&self, manifest: &Manifest) -> Result<VerifiedSource, EvalError> {
    manifest.validate()?;
    self.fetch_source(manifest).await
  }

  async fn fetch_source(&self, manifest: &Manifest) -> Result<VerifiedSource, EvalError> {
    let locator = manifest.locator();
    Ok(resolve(&locator, &self.store, &self.fetcher, self.config.fetch_timeout()).await?)
  }

  /// Resolve the package's build inputs.
  pub fn build_environment(&self, manifest: &Manifest) -> Result<EnvironmentDescriptor, EvalError> {
    Ok(build_environment(
      &manifest.inputs.native,
      &manifest.inputs.libraries,
      &manifest.env,
      None,
      &self.inputs,
    )?)
  }

  /// Compute the lock hash the manifest should declare.
  ///
  /// The manifest's own lockHash is not checked; it may be empty.
  pub async fn lock_hash(&self, manifest: &Manifest) -> Result<String, EvalError> {
    manifest.validate_unlocked()?;
    let environment = self.build_environment(manifest)?;
    let source = self.fetch_source(manifest).await?;
    Ok(compute_lock_hash(&source.path, &environment)?)
  }

  /// Produce the package output, building it unless already in the store.
  pub async fn build_package(&self, manifest: &Manifest) -> Result<BuildOutput, EvalError> {
    manifest.validate()?;
    info!(package = %manifest.identity(), "evaluating package");

    let environment = self.build_environment(manifest)?;
    let source = self.resolve_source(manifest).await?;
    let check = manifest.build.check && self.config.check;
    let recipe = Recipe::from_spec(&manifest.build, check);
    debug!(builder = ?recipe.builder, check, "rendered recipe");

    let request = BuildRequest {
      package: &manifest.package,
      source: &source,
      environment: &environment,
      declared_lock_hash: &manifest.lock_hash,
      recipe: &recipe,
    };
    Ok(realize(request, &self.store, &self.engine, self.config.build_timeout()).await?)
  }

  /// Compose the manifest's devShell.
  ///
  /// Independent of the package build: the source is not fetched, the
  /// store is not touched and no lockHash is required.
  pub fn dev_shell(&self, manifest: &Manifest) -> Result<LiveEnvironment, EvalError> {
    manifest.validate_unlocked()?;
    let Some(shell) = &manifest.dev_shell else {
      return Err(
        ManifestError::Invalid {
          field: "devShell",
          reason: "manifest does not declare a devShell".to_string(),
        }
        .into(),
      );
    };
    info!(package = %manifest.identity(), "evaluating devShell");

    let environment = build_environment(
      &shell.inputs,
      &Vec::<String>::new(),
      &manifest.env,
      shell.entry_hook.as_deref(),
      &self.inputs,
    )?;
    Ok(compose(&environment, None)?)
  }
}
