//! Implementation of the `kiln lock` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::eval::EvalConfig;

use super::{host_evaluator, load_manifest, runtime};
use crate::output::{OutputFormat, print_json, print_success, print_warning};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockSummary<'a> {
  package: String,
  lock_hash: &'a str,
  declared: &'a str,
  up_to_date: bool,
}

/// Print the lock hash the manifest should declare.
///
/// Fetches the source (through the store) and resolves the build inputs,
/// but never builds.
pub fn cmd_lock(manifest: Option<&Path>, store: Option<&Path>, config: EvalConfig, output: OutputFormat) -> Result<()> {
  let manifest = load_manifest(manifest)?;
  let evaluator = host_evaluator(store, config)?;

  let rt = runtime()?;
  let lock_hash = rt
    .block_on(evaluator.lock_hash(&manifest))
    .with_context(|| format!("Failed to compute lock hash for {}", manifest.identity()))?;
  let up_to_date = lock_hash == manifest.lock_hash;

  if output.is_json() {
    return print_json(&LockSummary {
      package: manifest.identity(),
      lock_hash: &lock_hash,
      declared: &manifest.lock_hash,
      up_to_date,
    });
  }

  println!("{}", lock_hash);
  if up_to_date {
    print_success("lockHash is up to date");
  } else if manifest.lock_hash.is_empty() {
    print_warning("manifest does not declare a lockHash yet");
  } else {
    print_warning(&format!("manifest declares lockHash {}", manifest.lock_hash));
  }
  Ok(())
}
