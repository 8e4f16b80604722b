//! Implementation of the `kiln build` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::eval::EvalConfig;

use super::{host_evaluator, load_manifest, runtime};
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct BuildSummary<'a> {
  package: String,
  key: &'a str,
  path: &'a Path,
  cached: bool,
}

/// Build the package declared by the manifest.
///
/// Prints the output's store key and path. A second build of an unchanged
/// manifest is served from the store without invoking the build engine.
pub fn cmd_build(manifest: Option<&Path>, store: Option<&Path>, config: EvalConfig, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let manifest = load_manifest(manifest)?;
  let evaluator = host_evaluator(store, config)?;

  let rt = runtime()?;
  let built = rt
    .block_on(evaluator.build_package(&manifest))
    .with_context(|| format!("Failed to build {}", manifest.identity()))?;

  if output.is_json() {
    return print_json(&BuildSummary {
      package: manifest.identity(),
      key: &built.key.0,
      path: &built.path,
      cached: built.cached,
    });
  }

  if built.cached {
    print_success(&format!("{} (cached)", manifest.identity()));
  } else {
    print_success(&format!("Built {}", manifest.identity()));
  }
  print_stat("Key", &built.key.0);
  print_stat("Path", &built.path.display().to_string());
  print_stat("Source", truncate_hash(&manifest.source.hash));
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
