mod build;
mod gc;
mod hash;
mod lock;
mod shell;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use kiln_lib::build::ShellEngine;
use kiln_lib::eval::{EvalConfig, EvalError, Evaluator};
use kiln_lib::inputs::HostEnvironment;
use kiln_lib::manifest::{Manifest, ManifestError, find_manifest};
use kiln_lib::source::DefaultFetcher;
use kiln_lib::store::Store;

pub use build::cmd_build;
pub use gc::cmd_gc;
pub use hash::cmd_hash;
pub use lock::cmd_lock;
pub use shell::cmd_shell;

type HostEvaluator = Evaluator<DefaultFetcher, ShellEngine, HostEnvironment>;

/// Find the manifest file: an explicit file, a directory to search, or the current directory.
fn resolve_manifest(path: Option<&Path>) -> Result<PathBuf, EvalError> {
  let dir = match path {
    Some(path) if path.is_file() => return Ok(path.to_path_buf()),
    Some(path) => path.to_path_buf(),
    None => std::env::current_dir().map_err(|source| ManifestError::Read {
      path: PathBuf::from("."),
      source,
    })?,
  };

  find_manifest(&dir).ok_or_else(|| {
    ManifestError::Read {
      path: dir,
      source: io::Error::new(io::ErrorKind::NotFound, "no kiln.lua or kiln.json found"),
    }
    .into()
  })
}

fn load_manifest(path: Option<&Path>) -> Result<Manifest> {
  let path = resolve_manifest(path)?;
  let manifest = Manifest::load(&path).map_err(EvalError::from)?;
  Ok(manifest)
}

fn open_store(root: Option<&Path>) -> Result<Arc<Store>> {
  let store = match root {
    Some(root) => Store::open(root),
    None => Store::open_default(),
  }
  .map_err(EvalError::from)
  .context("Failed to open store")?;
  Ok(Arc::new(store))
}

fn host_evaluator(store: Option<&Path>, config: EvalConfig) -> Result<HostEvaluator> {
  let store = open_store(store)?;
  Evaluator::host(store, config).context("Failed to initialize fetcher")
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
