//! Implementation of the `kiln shell` command.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use kiln_lib::eval::EvalConfig;
use kiln_lib::shell::{IN_SHELL_VAR, Shell};

use super::{host_evaluator, load_manifest};
use crate::output::print_warning;

/// Enter the manifest's devShell, or print an activation script for it.
///
/// Entering replaces the current process: with an entry hook the hook runs,
/// otherwise an interactive shell starts with the composed environment.
pub fn cmd_shell(manifest: Option<&Path>, store: Option<&Path>, print: bool, shell: Option<String>) -> Result<()> {
  let manifest = load_manifest(manifest)?;
  let config = EvalConfig {
    shell: shell.clone(),
    ..EvalConfig::default()
  };
  let evaluator = host_evaluator(store, config)?;
  let live = evaluator
    .dev_shell(&manifest)
    .with_context(|| format!("Failed to compose devShell for {}", manifest.identity()))?;

  if print {
    let target = match shell.as_deref() {
      Some(name) => name.parse::<Shell>().map_err(|e| anyhow!(e))?,
      None => Shell::detect(),
    };
    print!("{}", live.activation_script(target));
    return Ok(());
  }

  if std::env::var_os(IN_SHELL_VAR).is_some() {
    print_warning("already inside a kiln shell; nesting");
  }

  let shell = evaluator.config().shell.as_deref();
  let err = match live.enter(shell) {
    Ok(never) => match never {},
    Err(err) => err,
  };
  Err(err).context("Failed to enter devShell")
}
